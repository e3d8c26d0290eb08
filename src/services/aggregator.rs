//! Outbound event aggregation
//!
//! Batch-local events (arrivals, moves, returns, cycle counts, and the
//! paired cross-facility departed+arrived) flush at the end of each engine
//! message. Timer-driven departures pool per facility and flush once they
//! are older than the aggregation threshold, so a burst of age-outs leaves
//! as one envelope.

use crate::domain::events::TagEvent;
use rustc_hash::FxHashMap;

pub struct EventAggregator {
    /// Events flushed at the end of the current engine message
    batch: Vec<TagEvent>,
    /// Timer-driven departed events awaiting the aggregation threshold
    pending_departed: FxHashMap<String, Vec<TagEvent>>,
    threshold_ms: u64,
}

impl EventAggregator {
    pub fn new(threshold_ms: u64) -> Self {
        Self {
            batch: Vec::new(),
            pending_departed: FxHashMap::default(),
            threshold_ms,
        }
    }

    /// Enqueue a batch-local event
    pub fn push(&mut self, event: TagEvent) {
        self.batch.push(event);
    }

    /// Enqueue a timer-driven departed event into the per-facility pool
    pub fn push_departed(&mut self, event: TagEvent) {
        self.pending_departed
            .entry(event.facility_id.clone())
            .or_default()
            .push(event);
    }

    /// Drain the batch-local events in non-decreasing timestamp order.
    /// The sort is stable, so a departed+arrived pair sharing a timestamp
    /// keeps its causal order.
    pub fn take_batch(&mut self) -> Vec<TagEvent> {
        let mut events = std::mem::take(&mut self.batch);
        events.sort_by_key(|e| e.timestamp);
        events
    }

    /// Drain pooled departed events older than the threshold, in
    /// non-decreasing timestamp order
    pub fn flush_due(&mut self, now: u64) -> Vec<TagEvent> {
        let threshold = self.threshold_ms;
        let mut due = Vec::new();

        for events in self.pending_departed.values_mut() {
            let mut idx = 0;
            while idx < events.len() {
                if now.saturating_sub(events[idx].timestamp) >= threshold {
                    due.push(events.swap_remove(idx));
                } else {
                    idx += 1;
                }
            }
        }
        self.pending_departed.retain(|_, events| !events.is_empty());

        due.sort_by_key(|e| e.timestamp);
        due
    }

    /// Drain everything regardless of age; used on shutdown
    pub fn flush_all(&mut self) -> Vec<TagEvent> {
        let mut events: Vec<TagEvent> = std::mem::take(&mut self.batch);
        for (_, mut pooled) in self.pending_departed.drain() {
            events.append(&mut pooled);
        }
        events.sort_by_key(|e| e.timestamp);
        events
    }

    pub fn pending_departed_count(&self) -> usize {
        self.pending_departed.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::TagEventType;

    fn departed(epc: &str, facility: &str, ts: u64) -> TagEvent {
        TagEvent {
            epc: epc.to_string(),
            tid: String::new(),
            event_type: TagEventType::Departed,
            facility_id: facility.to_string(),
            location: "RSP-000001-0".to_string(),
            timestamp: ts,
        }
    }

    #[test]
    fn test_flush_due_respects_threshold() {
        let mut agg = EventAggregator::new(30_000);
        agg.push_departed(departed("e1", "salesFloor", 10_000));
        agg.push_departed(departed("e2", "salesFloor", 50_000));
        assert_eq!(agg.pending_departed_count(), 2);

        let due = agg.flush_due(45_000);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].epc, "e1");
        assert_eq!(agg.pending_departed_count(), 1);

        let due = agg.flush_due(90_000);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].epc, "e2");
        assert_eq!(agg.pending_departed_count(), 0);
    }

    #[test]
    fn test_flush_due_orders_across_facilities() {
        let mut agg = EventAggregator::new(1_000);
        agg.push_departed(departed("e2", "backStock", 2_000));
        agg.push_departed(departed("e1", "salesFloor", 1_000));
        agg.push_departed(departed("e3", "salesFloor", 3_000));

        let due = agg.flush_due(100_000);
        let epcs: Vec<&str> = due.iter().map(|e| e.epc.as_str()).collect();
        assert_eq!(epcs, vec!["e1", "e2", "e3"]);
    }

    #[test]
    fn test_take_batch_is_stable_for_pairs() {
        let mut agg = EventAggregator::new(30_000);
        let mut dep = departed("e1", "salesFloor", 7_000);
        dep.event_type = TagEventType::Departed;
        let mut arr = departed("e1", "backStock", 7_000);
        arr.event_type = TagEventType::Arrived;

        agg.push(dep);
        agg.push(arr);

        let batch = agg.take_batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].event_type, TagEventType::Departed);
        assert_eq!(batch[1].event_type, TagEventType::Arrived);
        assert!(agg.take_batch().is_empty());
    }

    #[test]
    fn test_flush_all_drains_everything() {
        let mut agg = EventAggregator::new(30_000);
        agg.push(departed("e1", "salesFloor", 1_000));
        agg.push_departed(departed("e2", "salesFloor", 2_000));

        let events = agg.flush_all();
        assert_eq!(events.len(), 2);
        assert_eq!(agg.pending_departed_count(), 0);
    }
}
