//! Timer-driven polling, bounded retry and cancellation.
//!
//! Reads are polled at a fixed cadence without a retry bound; a failed read is logged and tried
//! again on the next tick. One-shot submissions go through [`submit_with_retry`], which retries
//! transient failures with exponential backoff and gives up after a fixed number of attempts.
//! Every network call is bounded by [`with_deadline`].

use crate::recovery::types::RecoveryError;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, future::retry};
use futures::stream::{self, BoxStream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Timing and retry settings shared by all stages.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
	/// Tries per one-shot submission, including the first.
	pub submit_attempts: u32,
	/// Delay between two poll reads.
	pub poll_interval: Duration,
	/// Deadline for a single network call.
	pub call_timeout: Duration,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			submit_attempts: 3,
			poll_interval: Duration::from_secs(5),
			call_timeout: Duration::from_secs(30),
			initial_backoff: Duration::from_millis(500),
			max_backoff: Duration::from_secs(10),
		}
	}
}

impl RetryPolicy {
	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(self.initial_backoff)
			.with_max_interval(self.max_backoff)
			// the attempt counter is the only bound
			.with_max_elapsed_time(None)
			.build()
	}
}

/// Cooperative cancellation shared by every wait of one orchestrator.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
	sender: Arc<watch::Sender<bool>>,
	receiver: watch::Receiver<bool>,
}

impl Default for CancellationSignal {
	fn default() -> Self {
		Self::new()
	}
}

impl CancellationSignal {
	pub fn new() -> Self {
		let (sender, receiver) = watch::channel(false);
		Self {
			sender: Arc::new(sender),
			receiver,
		}
	}

	pub fn cancel(&self) {
		self.sender.send_replace(true);
	}

	pub fn is_cancelled(&self) -> bool {
		*self.receiver.borrow()
	}

	/// Resolves once [`cancel`](Self::cancel) has been called on any clone.
	pub async fn cancelled(&self) {
		let mut receiver = self.receiver.clone();
		// the sender lives as long as `self`, so this only returns once cancelled
		let _ = receiver.wait_for(|cancelled| *cancelled).await;
	}
}

/// Bound `call` by `deadline`, mapping expiry to [`RecoveryError::Timeout`].
pub async fn with_deadline<T, E, Fut>(deadline: Duration, call: Fut) -> Result<T, RecoveryError>
where
	Fut: Future<Output = Result<T, E>>,
	E: Into<RecoveryError>,
{
	match tokio::time::timeout(deadline, call).await {
		Ok(result) => result.map_err(Into::into),
		Err(_) => Err(RecoveryError::Timeout(deadline)),
	}
}

/// Run a one-shot submission, retrying transient failures.
///
/// Each attempt is bounded by the policy's call deadline. The last error is returned once
/// `submit_attempts` tries have failed or a non-transient error occurs.
pub async fn submit_with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut operation: F) -> Result<T, RecoveryError>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, RecoveryError>>,
{
	let max_attempts = policy.submit_attempts.max(1);
	let call_timeout = policy.call_timeout;
	let mut attempt = 0u32;

	retry(policy.backoff(), || {
		attempt += 1;
		let current = attempt;
		let call = with_deadline(call_timeout, operation());
		async move {
			match call.await {
				Ok(value) => {
					debug!("{} succeeded on attempt {}", what, current);
					Ok(value)
				}
				Err(e) if e.is_transient() && current < max_attempts => {
					warn!("{} failed on attempt {}/{}: {}", what, current, max_attempts, e);
					Err(backoff::Error::transient(e))
				}
				Err(e) => {
					warn!("{} gave up after attempt {}: {}", what, current, e);
					Err(backoff::Error::permanent(e))
				}
			}
		}
	})
	.await
}

struct PollState<F, P> {
	read: F,
	until: P,
	next_tick: Option<Instant>,
	finished: bool,
}

/// Lazily poll `read` every `interval`.
///
/// The first read happens immediately. Failed reads are logged and retried on the next tick,
/// never yielded. The stream ends right after yielding a value for which `until` holds, or as
/// soon as `cancel` fires, in which case no further read is started.
pub fn poll_stream<'a, T, F, Fut, P>(
	what: &'static str,
	interval: Duration,
	call_timeout: Duration,
	cancel: CancellationSignal,
	read: F,
	until: P,
) -> BoxStream<'a, T>
where
	T: Send + 'a,
	F: FnMut() -> Fut + Send + 'a,
	Fut: Future<Output = Result<T, RecoveryError>> + Send + 'a,
	P: Fn(&T) -> bool + Send + 'a,
{
	let state = PollState {
		read,
		until,
		next_tick: None,
		finished: false,
	};

	stream::unfold(state, move |mut state| {
		let cancel = cancel.clone();
		async move {
			if state.finished {
				return None;
			}
			loop {
				if let Some(next_tick) = state.next_tick {
					tokio::select! {
						_ = cancel.cancelled() => return None,
						_ = tokio::time::sleep_until(next_tick) => {}
					}
				}
				if cancel.is_cancelled() {
					return None;
				}
				state.next_tick = Some(Instant::now() + interval);

				let read = with_deadline(call_timeout, (state.read)());
				let outcome = tokio::select! {
					_ = cancel.cancelled() => return None,
					outcome = read => outcome,
				};

				match outcome {
					Ok(value) => {
						state.finished = (state.until)(&value);
						return Some((value, state));
					}
					Err(e) => warn!("{} poll failed, retrying next tick: {}", what, e),
				}
			}
		}
	})
	.boxed()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::ChainError;
	use crate::recovery::types::ErrorKind;
	use crate::relay::RelayError;
	use std::sync::atomic::{AtomicU32, Ordering};

	fn fast_policy(attempts: u32) -> RetryPolicy {
		RetryPolicy {
			submit_attempts: attempts,
			poll_interval: Duration::from_secs(5),
			call_timeout: Duration::from_secs(1),
			initial_backoff: Duration::from_millis(10),
			max_backoff: Duration::from_millis(50),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn transient_failures_below_the_bound_are_absorbed() {
		let calls = &AtomicU32::new(0);
		let result = submit_with_retry(&fast_policy(3), "submit", || async move {
			if calls.fetch_add(1, Ordering::SeqCst) < 2 {
				Err(RecoveryError::from(ChainError::SubmitError("nonce too low".into())))
			} else {
				Ok(7)
			}
		})
		.await;

		assert_eq!(result.unwrap(), 7);
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn retry_gives_up_after_the_bound() {
		let calls = &AtomicU32::new(0);
		let result: Result<(), _> = submit_with_retry(&fast_policy(3), "submit", || async move {
			calls.fetch_add(1, Ordering::SeqCst);
			Err(RecoveryError::from(RelayError::Status {
				status: 503,
				body: "busy".into(),
			}))
		})
		.await;

		assert!(matches!(result, Err(RecoveryError::Relay(RelayError::Status { status: 503, .. }))));
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn permanent_failures_are_not_retried() {
		let calls = &AtomicU32::new(0);
		let result: Result<(), _> = submit_with_retry(&fast_policy(5), "submit", || async move {
			calls.fetch_add(1, Ordering::SeqCst);
			Err(RecoveryError::from(RelayError::Rejected("bad subject".into())))
		})
		.await;

		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn stalled_relay_calls_time_out_and_are_retried() {
		let calls = &AtomicU32::new(0);
		let result: Result<(), _> = submit_with_retry(&fast_policy(2), "submitRecovery", || async move {
			calls.fetch_add(1, Ordering::SeqCst);
			std::future::pending::<Result<(), RelayError>>()
				.await
				.map_err(RecoveryError::from)
		})
		.await;

		let err = result.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Timeout);
		assert!(err.is_transient());
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn deadline_surfaces_timeout() {
		let result: Result<(), RecoveryError> = with_deadline(Duration::from_secs(2), async {
			tokio::time::sleep(Duration::from_secs(60)).await;
			Ok::<(), RecoveryError>(())
		})
		.await;

		assert!(matches!(result, Err(RecoveryError::Timeout(d)) if d == Duration::from_secs(2)));
	}

	#[tokio::test(start_paused = true)]
	async fn poll_skips_failed_reads_and_stops_at_condition() {
		let calls = Arc::new(AtomicU32::new(0));
		let counter = calls.clone();
		let stream = poll_stream(
			"weight",
			Duration::from_secs(5),
			Duration::from_secs(1),
			CancellationSignal::new(),
			move || {
				let n = counter.fetch_add(1, Ordering::SeqCst);
				async move {
					if n == 1 {
						Err(RecoveryError::from(ChainError::ReadError("flaky".into())))
					} else {
						Ok(n)
					}
				}
			},
			|n: &u32| *n >= 3,
		);

		let seen: Vec<u32> = stream.collect().await;
		assert_eq!(seen, vec![0, 2, 3]);
		assert_eq!(calls.load(Ordering::SeqCst), 4);
	}

	#[tokio::test(start_paused = true)]
	async fn cancellation_stops_polling_without_further_reads() {
		let calls = Arc::new(AtomicU32::new(0));
		let counter = calls.clone();
		let cancel = CancellationSignal::new();
		let mut stream = poll_stream(
			"weight",
			Duration::from_secs(5),
			Duration::from_secs(1),
			cancel.clone(),
			move || {
				counter.fetch_add(1, Ordering::SeqCst);
				async { Ok::<u32, RecoveryError>(0) }
			},
			|_| false,
		);

		assert_eq!(stream.next().await, Some(0));
		cancel.cancel();
		assert_eq!(stream.next().await, None);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(cancel.is_cancelled());
	}

	#[tokio::test(start_paused = true)]
	async fn reads_are_spaced_by_the_interval() {
		let start = Instant::now();
		let stream = poll_stream(
			"tick",
			Duration::from_secs(5),
			Duration::from_secs(1),
			CancellationSignal::new(),
			|| async { Ok::<Instant, RecoveryError>(Instant::now()) },
			move |at: &Instant| *at >= start + Duration::from_secs(10),
		);

		let ticks: Vec<Instant> = stream.collect().await;
		let offsets: Vec<u64> = ticks.iter().map(|t| (*t - start).as_secs()).collect();
		assert_eq!(offsets, vec![0, 5, 10]);
	}
}
