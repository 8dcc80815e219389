// Metrics module for lock observability
// Counters and gauges published through the `metrics` facade; no-ops until a recorder is installed

use metrics::{counter, describe_counter, describe_gauge, gauge};

pub const ACQUISITIONS_TOTAL: &str = "clusterlock_acquisitions_total";
pub const CONTENTIONS_TOTAL: &str = "clusterlock_contentions_total";
pub const RELEASES_TOTAL: &str = "clusterlock_releases_total";
pub const FORCED_RELEASES_TOTAL: &str = "clusterlock_forced_releases_total";
pub const REFRESHED_TOTAL: &str = "clusterlock_refreshed_total";
pub const SWEPT_TOTAL: &str = "clusterlock_swept_total";
pub const HELD_LOCKS: &str = "clusterlock_held_locks";

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn describe_metrics() {
    describe_counter!(ACQUISITIONS_TOTAL, "Total number of first-time lock acquisitions");
    describe_counter!(
        CONTENTIONS_TOTAL,
        "Total number of acquisitions rejected because the lock was held"
    );
    describe_counter!(RELEASES_TOTAL, "Total number of locks released by their holder");
    describe_counter!(
        FORCED_RELEASES_TOTAL,
        "Total number of locks freed by clear, destroy or holder loss"
    );
    describe_counter!(REFRESHED_TOTAL, "Total number of lease refreshes written");
    describe_counter!(SWEPT_TOTAL, "Total number of stale locks freed by the janitor");
    describe_gauge!(HELD_LOCKS, "Number of locks currently held by this node");
}

pub(crate) fn record_acquisition() {
    counter!(ACQUISITIONS_TOTAL).increment(1);
}

pub(crate) fn record_contention() {
    counter!(CONTENTIONS_TOTAL).increment(1);
}

pub(crate) fn record_release() {
    counter!(RELEASES_TOTAL).increment(1);
}

pub(crate) fn record_forced_releases(count: usize) {
    counter!(FORCED_RELEASES_TOTAL).increment(count as u64);
}

pub(crate) fn record_refreshed(count: u64) {
    counter!(REFRESHED_TOTAL).increment(count);
}

pub(crate) fn record_swept(count: usize) {
    counter!(SWEPT_TOTAL).increment(count as u64);
}

pub(crate) fn set_held_locks(count: usize) {
    gauge!(HELD_LOCKS).set(count as f64);
}
