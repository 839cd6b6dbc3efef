/// Primary key of a `jobs` row (BIGSERIAL).
pub type DbId = i64;

/// UTC instant used for every job timestamp.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Whole seconds of a duration, rounded up, for human-facing messages.
pub fn whole_secs(duration: std::time::Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
