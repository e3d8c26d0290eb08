//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention. All
//! counters use Relaxed ordering intentionally; these are statistical
//! counters only, never coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Lock-free metrics collector.
///
/// Recording operations are lock-free; `report()` swaps interval counters to
/// get a consistent since-last-report view.
pub struct Metrics {
    /// Readings received off the bus (monotonic)
    readings_received: AtomicU64,
    /// Readings rejected by validation or payload decoding (monotonic)
    readings_invalid: AtomicU64,
    /// Tag reads processed by the engine (monotonic)
    reads_processed: AtomicU64,
    /// Reads processed since last report (reset on report)
    reads_since_report: AtomicU64,
    /// Reads dropped below the sensor RSSI floor (monotonic)
    reads_dropped_rssi: AtomicU64,
    /// POS reads on unknown EPCs dropped (monotonic)
    reads_dropped_pos: AtomicU64,
    /// Reads dropped while the scheduler gate is suspended (monotonic)
    reads_dropped_suspended: AtomicU64,
    /// Malformed reads dropped (monotonic)
    reads_malformed: AtomicU64,
    /// Reads dropped on a full engine queue (monotonic)
    reads_dropped_queue: AtomicU64,
    /// Lifecycle events emitted (monotonic)
    events_emitted: AtomicU64,
    /// Inventory event envelopes published (monotonic)
    envelopes_published: AtomicU64,
    /// ASN EPCs reconciled (monotonic)
    asn_epcs_processed: AtomicU64,
    /// ASN payloads rejected (monotonic)
    asn_errors: AtomicU64,
    /// Store operation failures (monotonic)
    store_errors: AtomicU64,
    /// Active TagRefs in the engine (gauge)
    active_tag_refs: AtomicU64,
    /// Pending departed events awaiting aggregation (gauge)
    pending_departed: AtomicU64,
    /// Scheduler gate state: 1 running, 0 suspended (gauge)
    run_state_running: AtomicU64,
}

/// Point-in-time summary of all metrics
#[derive(Debug, Clone, Copy)]
pub struct MetricsSummary {
    pub readings_received: u64,
    pub readings_invalid: u64,
    pub reads_processed: u64,
    pub reads_in_interval: u64,
    pub reads_dropped_rssi: u64,
    pub reads_dropped_pos: u64,
    pub reads_dropped_suspended: u64,
    pub reads_malformed: u64,
    pub reads_dropped_queue: u64,
    pub events_emitted: u64,
    pub envelopes_published: u64,
    pub asn_epcs_processed: u64,
    pub asn_errors: u64,
    pub store_errors: u64,
    pub active_tag_refs: u64,
    pub pending_departed: u64,
    pub running: bool,
}

impl MetricsSummary {
    /// Log the summary as a single structured event
    pub fn log(&self) {
        info!(
            readings = %self.readings_received,
            invalid = %self.readings_invalid,
            reads = %self.reads_processed,
            reads_interval = %self.reads_in_interval,
            dropped_rssi = %self.reads_dropped_rssi,
            dropped_pos = %self.reads_dropped_pos,
            dropped_suspended = %self.reads_dropped_suspended,
            malformed = %self.reads_malformed,
            dropped_queue = %self.reads_dropped_queue,
            events = %self.events_emitted,
            envelopes = %self.envelopes_published,
            asn_epcs = %self.asn_epcs_processed,
            store_errors = %self.store_errors,
            active_tags = %self.active_tag_refs,
            pending_departed = %self.pending_departed,
            running = %self.running,
            "metrics_summary"
        );
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            readings_received: AtomicU64::new(0),
            readings_invalid: AtomicU64::new(0),
            reads_processed: AtomicU64::new(0),
            reads_since_report: AtomicU64::new(0),
            reads_dropped_rssi: AtomicU64::new(0),
            reads_dropped_pos: AtomicU64::new(0),
            reads_dropped_suspended: AtomicU64::new(0),
            reads_malformed: AtomicU64::new(0),
            reads_dropped_queue: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            envelopes_published: AtomicU64::new(0),
            asn_epcs_processed: AtomicU64::new(0),
            asn_errors: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            active_tag_refs: AtomicU64::new(0),
            pending_departed: AtomicU64::new(0),
            run_state_running: AtomicU64::new(1),
        }
    }

    pub fn record_reading_received(&self) {
        self.readings_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reading_invalid(&self) {
        self.readings_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_processed(&self) {
        self.reads_processed.fetch_add(1, Ordering::Relaxed);
        self.reads_since_report.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_dropped_rssi(&self) {
        self.reads_dropped_rssi.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_dropped_pos(&self) {
        self.reads_dropped_pos.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_dropped_suspended(&self) {
        self.reads_dropped_suspended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_malformed(&self) {
        self.reads_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_dropped_queue(&self) {
        self.reads_dropped_queue.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_events_emitted(&self, count: u64) {
        self.events_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_envelope_published(&self) {
        self.envelopes_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_asn_epcs(&self, count: u64) {
        self.asn_epcs_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_asn_error(&self) {
        self.asn_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_tag_refs(&self, count: u64) {
        self.active_tag_refs.store(count, Ordering::Relaxed);
    }

    pub fn set_pending_departed(&self, count: u64) {
        self.pending_departed.store(count, Ordering::Relaxed);
    }

    pub fn set_running(&self, running: bool) {
        self.run_state_running.store(running as u64, Ordering::Relaxed);
    }

    /// Snapshot all metrics without touching the interval counters; used by
    /// the Prometheus endpoint so scrapes don't skew the periodic report
    pub fn snapshot(&self) -> MetricsSummary {
        MetricsSummary {
            reads_in_interval: self.reads_since_report.load(Ordering::Relaxed),
            ..self.load_totals()
        }
    }

    /// Snapshot all metrics, resetting the interval counters
    pub fn report(&self) -> MetricsSummary {
        MetricsSummary {
            reads_in_interval: self.reads_since_report.swap(0, Ordering::Relaxed),
            ..self.load_totals()
        }
    }

    fn load_totals(&self) -> MetricsSummary {
        MetricsSummary {
            readings_received: self.readings_received.load(Ordering::Relaxed),
            readings_invalid: self.readings_invalid.load(Ordering::Relaxed),
            reads_processed: self.reads_processed.load(Ordering::Relaxed),
            reads_in_interval: 0,
            reads_dropped_rssi: self.reads_dropped_rssi.load(Ordering::Relaxed),
            reads_dropped_pos: self.reads_dropped_pos.load(Ordering::Relaxed),
            reads_dropped_suspended: self.reads_dropped_suspended.load(Ordering::Relaxed),
            reads_malformed: self.reads_malformed.load(Ordering::Relaxed),
            reads_dropped_queue: self.reads_dropped_queue.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            envelopes_published: self.envelopes_published.load(Ordering::Relaxed),
            asn_epcs_processed: self.asn_epcs_processed.load(Ordering::Relaxed),
            asn_errors: self.asn_errors.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            active_tag_refs: self.active_tag_refs.load(Ordering::Relaxed),
            pending_departed: self.pending_departed.load(Ordering::Relaxed),
            running: self.run_state_running.load(Ordering::Relaxed) == 1,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
