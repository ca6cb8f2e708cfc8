//! Exponential backoff for attach attempts.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Delay schedule: `initial`, `initial * multiplier`, ... capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
	initial: Duration,
	max: Duration,
	multiplier: f64,
	next: Duration,
	failures: u32,
}

impl Backoff {
	pub fn new(config: &ReconnectConfig) -> Self {
		let initial = Duration::from_millis(config.initial_delay_ms);
		Self {
			initial,
			max: Duration::from_millis(config.max_delay_ms).max(initial),
			multiplier: config.multiplier.max(1.0),
			next: initial,
			failures: 0,
		}
	}

	/// Records a failure and returns how long to wait before the next attempt.
	pub fn next_delay(&mut self) -> Duration {
		self.failures = self.failures.saturating_add(1);
		let delay = self.next;
		let grown_ms = (delay.as_millis() as f64 * self.multiplier) as u64;
		self.next = Duration::from_millis(grown_ms).min(self.max);
		delay
	}

	/// Failures since the last reset.
	pub fn failures(&self) -> u32 {
		self.failures
	}

	pub fn reset(&mut self) {
		self.next = self.initial;
		self.failures = 0;
	}
}
