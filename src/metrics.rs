//! Prometheus metrics for refresh latency and board activity.
//!
//! This module provides metrics for:
//! - Whole-board refresh latency
//! - Per-slice fetch latency and failures
//! - Detected opportunity changes
//! - Tracked opportunity count

use std::time::Instant;

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use tracing::debug;

use crate::tracking::OpportunityChange;

// === Metric Name Constants ===

/// Board refresh latency metric name.
pub const METRIC_REFRESH_LATENCY: &str = "refresh_latency_ms";
/// Slice fetch latency metric name.
pub const METRIC_SLICE_FETCH_LATENCY: &str = "slice_fetch_latency_ms";
/// Refreshes counter metric name.
pub const METRIC_REFRESHES: &str = "refreshes_total";
/// Slice fetch failures counter metric name.
pub const METRIC_SLICE_FETCH_FAILURES: &str = "slice_fetch_failures_total";
/// Stale refreshes counter metric name.
pub const METRIC_STALE_REFRESHES: &str = "stale_refreshes_discarded_total";
/// Opportunity changes counter metric name, labelled by kind.
pub const METRIC_OPPORTUNITY_CHANGES: &str = "opportunity_changes_total";
/// Tracked opportunities gauge metric name.
pub const METRIC_TRACKED_OPPORTUNITIES: &str = "tracked_opportunities";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_REFRESH_LATENCY,
        "Time to fetch and merge every slice of the board in milliseconds"
    );
    describe_histogram!(
        METRIC_SLICE_FETCH_LATENCY,
        "Single slice fetch latency in milliseconds"
    );

    describe_counter!(METRIC_REFRESHES, "Total number of board refreshes");
    describe_counter!(
        METRIC_SLICE_FETCH_FAILURES,
        "Total number of slices skipped because their fetch failed"
    );
    describe_counter!(
        METRIC_STALE_REFRESHES,
        "Total number of refreshes discarded because a newer one was applied"
    );
    describe_counter!(
        METRIC_OPPORTUNITY_CHANGES,
        "Total number of opportunity changes detected"
    );

    describe_gauge!(
        METRIC_TRACKED_OPPORTUNITIES,
        "Opportunities currently tracked for duration"
    );

    debug!("Metrics initialized");
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Record whole-board refresh latency.
pub fn record_refresh_latency(start: Instant) {
    histogram!(METRIC_REFRESH_LATENCY).record(elapsed_ms(start));
}

pub fn inc_refreshes() {
    counter!(METRIC_REFRESHES).increment(1);
}

pub fn inc_slice_fetch_failures() {
    counter!(METRIC_SLICE_FETCH_FAILURES).increment(1);
}

pub fn inc_stale_refreshes_discarded() {
    counter!(METRIC_STALE_REFRESHES).increment(1);
}

/// Count a batch of changes under their kind label.
pub fn record_opportunity_changes(changes: &[OpportunityChange]) {
    for change in changes {
        counter!(METRIC_OPPORTUNITY_CHANGES, "kind" => change.kind.to_string()).increment(1);
    }
}

pub fn set_tracked_opportunities(count: usize) {
    gauge!(METRIC_TRACKED_OPPORTUNITIES).set(count as f64);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Elapsed milliseconds so far, without recording.
    pub fn elapsed_ms(&self) -> f64 {
        elapsed_ms(self.start)
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(elapsed_ms(self.start));
    }
}

/// Timer for one data slice fetch, successful or not.
pub fn timer_slice_fetch() -> LatencyTimer {
    LatencyTimer::new(METRIC_SLICE_FETCH_LATENCY)
}
