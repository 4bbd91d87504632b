use std::cmp;
use std::time::Duration;

/// Delay before reconnect attempt `attempt` (1-based).
///
/// Doubles from `base` and saturates at `max`; attempt 0 is treated as 1.
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let factor = 1u64 << exponent;
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(factor);
    cmp::min(Duration::from_millis(delay_ms), max)
}
