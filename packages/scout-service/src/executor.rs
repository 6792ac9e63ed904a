use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use scout_config::Executor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
	Started,
	RetrievalComplete,
	EnrichmentComplete,
	PaginationApplied,
	Ready,
	TimedOut,
	Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
	pub stage: ProgressStage,
	pub elapsed_ms: u64,
	pub details: Value,
}

/// Append-only record of the stages one call went through.
#[derive(Debug)]
pub struct ProgressTrace {
	started: Instant,
	events: Vec<ProgressEvent>,
}
impl ProgressTrace {
	pub fn start(details: Value) -> Self {
		let mut trace = Self { started: Instant::now(), events: Vec::with_capacity(6) };

		trace.record(ProgressStage::Started, details);

		trace
	}

	pub fn record(&mut self, stage: ProgressStage, details: Value) {
		let elapsed_ms = self.elapsed_ms();

		self.events.push(ProgressEvent { stage, elapsed_ms, details });
	}

	pub fn elapsed_ms(&self) -> u64 {
		u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
	}

	pub fn events(&self) -> &[ProgressEvent] {
		&self.events
	}

	pub fn into_events(self) -> Vec<ProgressEvent> {
		self.events
	}
}

#[derive(Debug)]
pub enum Bounded<T> {
	Completed(T),
	TimedOut,
	/// The task panicked or was cancelled by the runtime.
	Aborted(String),
}

/// Caller timeout minus the safety margin, never below one millisecond.
pub fn internal_deadline(cfg: &Executor) -> Duration {
	Duration::from_millis(cfg.query_timeout_ms.saturating_sub(cfg.safety_margin_ms).max(1))
}

/// Races `work` against `deadline`. On timeout the task is detached and left to finish on its own.
pub async fn run_bounded<F, T>(work: F, deadline: Duration) -> Bounded<T>
where
	F: Future<Output = T> + Send + 'static,
	T: Send + 'static,
{
	let handle = tokio::spawn(work);

	tokio::select! {
		joined = handle => match joined {
			Ok(value) => Bounded::Completed(value),
			Err(err) => Bounded::Aborted(err.to_string()),
		},
		_ = tokio::time::sleep(deadline) => Bounded::TimedOut,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn deadline_never_reaches_zero() {
		let cfg = Executor { query_timeout_ms: 500, safety_margin_ms: 2_000 };

		assert_eq!(internal_deadline(&cfg), Duration::from_millis(1));
		assert_eq!(internal_deadline(&Executor::default()), Duration::from_millis(28_000));
	}

	#[tokio::test(start_paused = true)]
	async fn pending_work_times_out() {
		let outcome = run_bounded(std::future::pending::<()>(), Duration::from_millis(100)).await;

		assert!(matches!(outcome, Bounded::TimedOut));
	}

	#[tokio::test(start_paused = true)]
	async fn trace_reports_elapsed_time() {
		let mut trace = ProgressTrace::start(serde_json::json!({}));

		tokio::time::advance(Duration::from_millis(120)).await;
		trace.record(ProgressStage::Ready, serde_json::json!({}));

		let events = trace.into_events();

		assert_eq!(events[0].stage, ProgressStage::Started);
		assert_eq!(events[1].elapsed_ms, 120);
	}
}
