#![forbid(unsafe_code)]

pub mod chat;
pub mod eventsub;
pub mod helix;
pub mod subscriptions;

use std::time::Duration;

/// Exponential reconnect backoff, clamped to `[min, max]`.
pub(crate) fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
	let pow = attempt.min(16);
	let ms = min.as_millis().saturating_mul(1u128 << pow);
	let delay = Duration::from_millis(ms.min(u64::MAX as u128) as u64);
	delay.min(max).max(min)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_grows_and_clamps() {
		let min = Duration::from_millis(500);
		let max = Duration::from_secs(30);

		assert_eq!(backoff_delay(0, min, max), min);
		assert_eq!(backoff_delay(1, min, max), Duration::from_secs(1));
		assert_eq!(backoff_delay(2, min, max), Duration::from_secs(2));
		assert_eq!(backoff_delay(30, min, max), max);
	}
}
