use std::time::Duration;

use rand::Rng;

/// Exponential backoff for the reconnect retry loop (§4.7 "base 250 ms, max 30 s, unbounded
/// attempts"). Reconnect jitter is fine, unlike workflow backoff, which must stay deterministic
/// for replay (§9 "do not use jitter inside workflows").
pub struct ReconnectBackoff {
	base_ms: u64,
	max_ms: u64,
	attempt: u32,
}

impl ReconnectBackoff {
	pub fn new(base_ms: u64, max_ms: u64) -> Self {
		ReconnectBackoff {
			base_ms,
			max_ms,
			attempt: 0,
		}
	}

	pub fn reset(&mut self) {
		self.attempt = 0;
	}

	/// Delay before the next attempt, with +/-20% jitter, then advances the attempt counter.
	pub fn next_delay(&mut self) -> Duration {
		let exp = self.base_ms.saturating_mul(1u64 << self.attempt.min(20));
		let capped = exp.min(self.max_ms);
		self.attempt = self.attempt.saturating_add(1);

		let jitter_span = capped / 5;
		let jitter: i64 = if jitter_span == 0 {
			0
		} else {
			rand::thread_rng().gen_range(-(jitter_span as i64)..=(jitter_span as i64))
		};
		let delayed = (capped as i64 + jitter).max(0) as u64;
		Duration::from_millis(delayed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_grows_and_caps() {
		let mut backoff = ReconnectBackoff::new(250, 30_000);
		let mut last = Duration::ZERO;
		for _ in 0..30 {
			let delay = backoff.next_delay();
			assert!(delay <= Duration::from_millis(30_000 + 30_000 / 5));
			last = delay;
		}
		assert!(last >= Duration::from_millis(30_000 - 30_000 / 5));
	}

	#[test]
	fn reset_restarts_from_base() {
		let mut backoff = ReconnectBackoff::new(250, 30_000);
		backoff.next_delay();
		backoff.next_delay();
		backoff.reset();
		let delay = backoff.next_delay();
		assert!(delay <= Duration::from_millis(250 + 250 / 5));
	}
}
