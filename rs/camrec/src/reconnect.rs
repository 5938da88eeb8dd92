use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Observer, Result, TracingObserver};

/// How long to wait between attempts, and how many to make.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
	/// The delay before the first retry.
	#[serde(with = "humantime_serde")]
	pub initial: Duration,

	/// The delay never grows past this.
	/// An attempt that lasted at least this long resets the delay back to `initial`.
	#[serde(with = "humantime_serde")]
	pub max: Duration,

	/// The delay is multiplied by this after each consecutive failure.
	pub multiplier: f64,

	/// The maximum number of consecutive retries, or unbounded.
	/// Failures before an attempt that lasted at least `max` don't count.
	pub limit: Option<u32>,
}

impl RetryPolicy {
	/// Retry right away, forever.
	pub fn immediate() -> Self {
		Self {
			initial: Duration::ZERO,
			max: Duration::from_secs(30),
			multiplier: 2.0,
			limit: None,
		}
	}

	/// Double the delay after every failure, starting at `initial` and capped at `max`.
	pub fn exponential(initial: Duration, max: Duration) -> Self {
		Self {
			initial,
			max,
			multiplier: 2.0,
			limit: None,
		}
	}

	pub fn with_limit(mut self, limit: u32) -> Self {
		self.limit = Some(limit);
		self
	}

	/// The delay following `delay`.
	pub fn next(&self, delay: Duration) -> Duration {
		// NaN and shrinking multipliers keep the delay constant.
		let secs = delay.as_secs_f64() * self.multiplier.max(1.0);
		Duration::try_from_secs_f64(secs).unwrap_or(self.max).min(self.max)
	}
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self::immediate()
	}
}

/// Keeps starting fresh attempts until one fails permanently.
pub struct Reconnect {
	policy: RetryPolicy,
	observer: Arc<dyn Observer>,
}

impl Reconnect {
	pub fn new(policy: RetryPolicy) -> Self {
		Self {
			policy,
			observer: Arc::new(TracingObserver),
		}
	}

	pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
		self.observer = observer;
		self
	}

	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}

	/// Call `attempt` with a 1-based attempt number until it fails permanently or `cancel` fires.
	///
	/// Each call should build everything from scratch; nothing is carried between attempts.
	/// The attempt is expected to watch `cancel` itself, so it can shut down cleanly.
	///
	/// Returns `Ok` when cancelled or when an attempt succeeds, otherwise the permanent error,
	/// or the last transient error once the retry limit is reached without a long run in between.
	pub async fn run<F, Fut, T>(&self, mut attempt: F, cancel: &CancellationToken) -> Result<()>
	where
		F: FnMut(u32) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut delay = self.policy.initial;
		let mut count: u32 = 0;
		let mut failures: u32 = 0;

		loop {
			count = count.saturating_add(1);
			let started = Instant::now();

			let err = match attempt(count).await {
				Ok(_) | Err(Error::Cancelled) => return Ok(()),
				Err(err) if err.is_permanent() => return Err(err),
				Err(err) => err,
			};

			if cancel.is_cancelled() {
				return Ok(());
			}

			// A long healthy run means the endpoint is back; start over.
			if started.elapsed() >= self.policy.max {
				delay = self.policy.initial;
				failures = 0;
			}

			failures = failures.saturating_add(1);
			if self.policy.limit.is_some_and(|limit| failures > limit) {
				tracing::error!(attempts = count, failures, %err, "giving up");
				return Err(err);
			}

			self.observer.retrying(count, delay, &err);

			tokio::select! {
				biased;
				_ = cancel.cancelled() => return Ok(()),
				_ = tokio::time::sleep(delay) => {}
			}

			delay = self.policy.next(delay);
		}
	}
}
