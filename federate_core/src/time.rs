use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds from epoch. Monotonic within a single run.
pub type Instant = i64;

/// Signed nanosecond duration.
pub type Interval = i64;

/// Sentinel for "no tag granted yet" — `last_granted_tag`'s initial value.
pub const NEVER: Instant = i64::MIN;

/// Sentinel for an unbounded/never-ending logical horizon.
pub const FOREVER: Instant = i64::MAX;

/// Current wall-clock time as nanoseconds since the Unix epoch.
///
/// Saturates rather than panics if the system clock is set before the
/// epoch; a federate with a broken clock should fail the startup handshake
/// downstream, not panic here.
pub fn physical_time_now() -> Instant {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_time_is_positive_and_increasing() {
        let a = physical_time_now();
        let b = physical_time_now();
        assert!(a > 0);
        assert!(b >= a);
    }
}
