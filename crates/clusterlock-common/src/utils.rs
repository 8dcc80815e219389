//! Utility functions for clusterlock

/// Current wall-clock time as epoch milliseconds.
///
/// All persisted timestamps (`lockTime`, `expirationTime`, `lastModified`)
/// use this representation so that rows written by different nodes compare
/// directly.
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Add a duration in milliseconds to an epoch-millis timestamp without overflowing.
pub fn add_millis(timestamp: i64, millis: u64) -> i64 {
    timestamp.saturating_add(i64::try_from(millis).unwrap_or(i64::MAX))
}
