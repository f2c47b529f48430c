use std::time::Duration;

/// Interval used when a job is started with an unusable interval.
pub const DEFAULT_INTERVAL_MS: u64 = 3000;

/// Coerces a requested interval to a positive number of milliseconds.
pub fn coerce_interval_ms(requested: u64) -> u64 {
    if requested == 0 {
        DEFAULT_INTERVAL_MS
    } else {
        requested
    }
}

pub fn job_interval(requested_ms: u64) -> Duration {
    Duration::from_millis(coerce_interval_ms(requested_ms))
}
