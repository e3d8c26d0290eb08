//! Message handlers for the tag engine
//!
//! Each handler advances tag state, records history, and queues derived
//! lifecycle events on the aggregator. A read's whole transition happens
//! inside one handler call; persistence runs after the batch.

use super::TagEngine;
use crate::domain::epc::decode_tag_data;
use crate::domain::events::{epoch_ms, TagEvent, TagEventType};
use crate::domain::tag::SOURCE_FIXED;
use crate::domain::types::{
    InventoryData, SchedulerRunState, SensorConfigNotification, TagRead,
};
use crate::services::sensors::{Sensor, SensorRegistry, DEFAULT_FACILITY};
use crate::services::tagref::{TagRef, TagState};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Events produced by a single read
type ReadEvents = SmallVec<[TagEvent; 4]>;

/// Resolve the facility that owns an antenna alias ("<device_id>-<antenna>")
fn facility_for_alias(registry: &SensorRegistry, alias: &str) -> String {
    alias
        .rsplit_once('-')
        .and_then(|(device_id, _)| registry.get(device_id))
        .map(|s| s.facility_id.to_string())
        .unwrap_or_else(|| DEFAULT_FACILITY.to_string())
}

/// True when the alias belongs to an Exit-personality sensor
fn alias_is_exit(registry: &SensorRegistry, alias: &str) -> bool {
    alias
        .rsplit_once('-')
        .and_then(|(device_id, _)| registry.get(device_id))
        .map(|s| s.is_exit())
        .unwrap_or(false)
}

fn tag_event(
    tagref: &TagRef,
    event_type: TagEventType,
    facility_id: &str,
    location: &str,
    timestamp: u64,
) -> TagEvent {
    TagEvent {
        epc: tagref.tag.epc.clone(),
        tid: tagref.tag.tid.clone(),
        event_type,
        facility_id: facility_id.to_string(),
        location: location.to_string(),
        timestamp,
    }
}

impl TagEngine {
    /// Handle a validated batch of reads from one sensor
    pub(crate) async fn handle_inventory_data(&mut self, data: InventoryData) {
        if self.suspended {
            self.metrics.record_read_dropped_suspended();
            debug!(device_id = %data.device_id, reads = %data.data.len(), "reads_dropped_suspended");
            return;
        }

        let sensor = self.registry.get_or_create(&data.device_id);
        for read in &data.data {
            if read.validate().is_err() {
                self.metrics.record_read_malformed();
                continue;
            }
            self.process_read(&sensor, read, data.sent_on).await;
        }

        let batch = self.aggregator.take_batch();
        self.publish(batch);
        self.persist_dirty().await;
    }

    /// Run one read through the filters and the state machine
    async fn process_read(&mut self, sensor: &Arc<Sensor>, read: &TagRead, sent_on: u64) {
        if !sensor.accepts_rssi(read.rssi) {
            self.metrics.record_read_dropped_rssi();
            return;
        }

        let ts = if read.last_read_on > 0 {
            read.last_read_on
        } else if sent_on > 0 {
            sent_on
        } else {
            epoch_ms()
        };

        if !self.tags.contains_key(&read.epc) && !self.admit_first_read(sensor, read).await {
            return;
        }

        let antenna_id = read.antenna_id.unwrap_or_default();
        let alias = sensor.antenna_alias(antenna_id);
        let margin = self.config.hysteresis_margin() as f64;
        let exit_threshold = self.config.exit_read_threshold();
        let registry = self.registry.clone();

        let Some(tagref) = self.tags.get_mut(&read.epc) else {
            return;
        };

        tagref.record_rssi(&alias, read.rssi);
        if !read.tid.is_empty() {
            tagref.tag.tid = read.tid.clone();
        }
        tagref.tag.source = SOURCE_FIXED.to_string();
        tagref.last_read = ts;
        tagref.tag.last_read = ts;
        tagref.dirty = true;
        self.metrics.record_read_processed();

        let mut events = ReadEvents::new();
        match tagref.state {
            TagState::Unknown => {
                // POS reads never cause arrival; only last_read moves
                if !sensor.is_pos() {
                    if let Some(location) = tagref.arbitrate_location(margin) {
                        tagref.set_location(&location, &sensor.facility_id, ts);
                        tagref.transition(TagState::Present, ts);
                        tagref.tag.arrived = ts;
                        tagref.tag.event = TagEventType::Arrived.as_str().to_string();
                        if sensor.is_exit() {
                            tagref.exit_reads = 1;
                        }
                        events.push(tag_event(
                            tagref,
                            TagEventType::Arrived,
                            &sensor.facility_id,
                            &tagref.location.clone(),
                            ts,
                        ));
                    }
                }
            }
            TagState::Present => {
                if sensor.is_pos() {
                    // conservative POS rule: cycle count, no state change
                    tagref.tag.cycle_count = true;
                    tagref.tag.event = TagEventType::CycleCount.as_str().to_string();
                    events.push(tag_event(
                        tagref,
                        TagEventType::CycleCount,
                        &tagref.facility_id.clone(),
                        &tagref.location.clone(),
                        ts,
                    ));
                } else {
                    if let Some(winner) = tagref.arbitrate_location(margin) {
                        if winner != tagref.location {
                            let old_facility = tagref.facility_id.clone();
                            let old_location = tagref.location.clone();
                            let new_facility = facility_for_alias(&registry, &winner);

                            if new_facility == old_facility {
                                tagref.set_location(&winner, &new_facility, ts);
                                tagref.tag.event = TagEventType::Moved.as_str().to_string();
                                events.push(tag_event(
                                    tagref,
                                    TagEventType::Moved,
                                    &new_facility,
                                    &winner,
                                    ts,
                                ));
                            } else {
                                // cross-facility: a departure and an arrival,
                                // atomically in that order
                                events.push(tag_event(
                                    tagref,
                                    TagEventType::Departed,
                                    &old_facility,
                                    &old_location,
                                    ts,
                                ));
                                tagref.set_location(&winner, &new_facility, ts);
                                tagref.tag.arrived = ts;
                                tagref.tag.event = TagEventType::Arrived.as_str().to_string();
                                events.push(tag_event(
                                    tagref,
                                    TagEventType::Arrived,
                                    &new_facility,
                                    &winner,
                                    ts,
                                ));
                            }
                        }
                    }

                    if sensor.is_exit() {
                        tagref.exit_reads += 1;
                        if tagref.exit_reads >= exit_threshold {
                            tagref.transition(TagState::Exiting, ts);
                            debug!(epc = %tagref.epc(), "tag_exiting");
                        }
                    } else {
                        tagref.exit_reads = 0;
                    }
                }
            }
            TagState::Exiting => {
                if !sensor.is_pos() {
                    if let Some(winner) = tagref.arbitrate_location(margin) {
                        if winner != tagref.location {
                            let winner_is_exit = alias_is_exit(&registry, &winner);
                            let facility = facility_for_alias(&registry, &winner);
                            tagref.set_location(&winner, &facility, ts);
                            if !winner_is_exit {
                                // a stronger ordinary sensor clears the exit
                                tagref.transition(TagState::Present, ts);
                                tagref.exit_reads = 0;
                                debug!(epc = %tagref.epc(), location = %tagref.location, "tag_exit_cleared");
                            }
                        }
                    }
                }
            }
            TagState::Departed | TagState::DepartedExit => {
                let blocked = sensor.is_pos()
                    || (tagref.state == TagState::DepartedExit && sensor.is_exit());
                if !blocked {
                    let winner = tagref.arbitrate_location(margin).unwrap_or(alias.clone());
                    let facility = facility_for_alias(&registry, &winner);
                    tagref.set_location(&winner, &facility, ts);
                    tagref.transition(TagState::Present, ts);
                    tagref.exit_reads = 0;
                    tagref.tag.event = TagEventType::Returned.as_str().to_string();
                    events.push(tag_event(
                        tagref,
                        TagEventType::Returned,
                        &facility,
                        &winner,
                        ts,
                    ));
                    info!(epc = %tagref.epc(), location = %winner, "tag_returned");
                }
            }
        }

        for event in events {
            self.aggregator.push(event);
        }
    }

    /// Create or rehydrate the TagRef for an EPC seen for the first time
    /// since startup. Returns false when the read must be dropped.
    async fn admit_first_read(&mut self, sensor: &Arc<Sensor>, read: &TagRead) -> bool {
        let stored = match self.store.find_by_epc(&read.epc).await {
            Ok(found) => found.filter(|t| !t.is_empty()),
            Err(e) => {
                self.metrics.record_store_error();
                warn!(epc = %read.epc, error = %e, "tag_rehydrate_failed");
                None
            }
        };

        let window_size = self.config.rssi_window_size();
        match stored {
            Some(tag) => {
                debug!(epc = %read.epc, epc_state = %tag.epc_state, "tag_rehydrated");
                self.tags.insert(read.epc.clone(), TagRef::rehydrate(tag, window_size));
                true
            }
            None => {
                if sensor.is_pos() {
                    // POS reads never create TagRefs
                    self.metrics.record_read_dropped_pos();
                    return false;
                }
                let mut tagref = TagRef::new(&read.epc, window_size);
                match decode_tag_data(&self.decoders, &read.epc) {
                    Ok(decoded) => {
                        tagref.tag.product_id = decoded.product_id;
                        tagref.tag.uri = decoded.uri;
                        tagref.tag.filter_value = decoded.filter_value;
                        tagref.tag.encode_format = decoded.encode_format;
                    }
                    Err(e) => {
                        // unknown encodings are accepted with an empty product id
                        debug!(epc = %read.epc, error = %e, "epc_decode_undefined");
                    }
                }
                self.tags.insert(read.epc.clone(), tagref);
                true
            }
        }
    }

    /// Apply a sensor config notification to the registry
    pub(crate) fn handle_sensor_config(&mut self, notification: &SensorConfigNotification) {
        if notification.validate().is_err() {
            self.metrics.record_reading_invalid();
            return;
        }
        self.registry.apply_config(notification);
    }

    /// Flip the scheduler gate
    pub(crate) fn handle_run_state(&mut self, state: &SchedulerRunState) {
        let running = state.is_running();
        if self.suspended == running {
            info!(run_state = %state.run_state, running = %running, "scheduler_run_state_changed");
        }
        self.suspended = !running;
        self.metrics.set_running(running);
    }

    /// Aggregate-departed tick: age Exiting tags into DepartedExit and flush
    /// pooled departures older than the threshold
    pub(crate) async fn handle_aggregate_tick(&mut self, now: u64) {
        let exiting_ageout = self.config.exiting_ageout_ms();

        let mut departed = Vec::new();
        for tagref in self.tags.values_mut() {
            if tagref.state == TagState::Exiting
                && now.saturating_sub(tagref.last_read) >= exiting_ageout
            {
                tagref.transition(TagState::DepartedExit, now);
                tagref.tag.event = TagEventType::Departed.as_str().to_string();
                info!(epc = %tagref.epc(), location = %tagref.location, "tag_departed_exit");
                departed.push(tag_event(
                    tagref,
                    TagEventType::Departed,
                    &tagref.facility_id.clone(),
                    &tagref.location.clone(),
                    tagref.last_read,
                ));
            }
        }
        for event in departed {
            self.aggregator.push_departed(event);
        }

        let due = self.aggregator.flush_due(now);
        if !due.is_empty() {
            info!(count = %due.len(), "departed_events_flushed");
            self.publish(due);
        }
        self.persist_dirty().await;
    }

    /// Hourly ageout: synthesize departures for silent Present tags and
    /// discard refs whose departure has been persisted
    pub(crate) async fn handle_ageout_tick(&mut self, now: u64) {
        let mut departed = Vec::new();
        for tagref in self.tags.values_mut() {
            if tagref.state != TagState::Present {
                continue;
            }
            let threshold = self.config.age_out_ms(&tagref.facility_id);
            if now.saturating_sub(tagref.last_read) >= threshold {
                tagref.transition(TagState::Departed, now);
                tagref.tag.event = TagEventType::Departed.as_str().to_string();
                info!(epc = %tagref.epc(), location = %tagref.location, "tag_aged_out");
                departed.push(tag_event(
                    tagref,
                    TagEventType::Departed,
                    &tagref.facility_id.clone(),
                    &tagref.location.clone(),
                    tagref.last_read,
                ));
            }
        }
        let aged = departed.len();
        for event in departed {
            self.aggregator.push_departed(event);
        }

        self.persist_dirty().await;

        // departed refs survive until persisted (dirty cleared), so a failed
        // upsert is retried on the next tick instead of losing the departure.
        // Once persisted, Departed refs go immediately; DepartedExit refs keep
        // a reclaim window of one exiting-ageout from the transition, NOT the
        // Present ageout horizon, so this hourly pass sweeps them promptly.
        let departed_ttl = self.config.exiting_ageout_ms();
        let before = self.tags.len();
        self.tags.retain(|_, tagref| match tagref.state {
            TagState::Departed => tagref.dirty,
            TagState::DepartedExit => {
                tagref.dirty
                    || now.saturating_sub(tagref.last_state_change) < departed_ttl
            }
            _ => true,
        });

        if aged > 0 || before != self.tags.len() {
            info!(
                aged_out = %aged,
                discarded = %(before - self.tags.len()),
                "ageout_pass_complete"
            );
        }
    }
}
