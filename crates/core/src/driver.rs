//! Work-item orchestration: the glue between election, capture, and the
//! external collaborators (task server, prompt surface, readiness flag).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::capture::{ChunkSink, StreamCapture};
use crate::error::Result;

/// One unit of work pulled from the task server.
#[derive(Debug, Clone)]
pub struct Job {
	pub task_id: String,
	pub prompt: String,
}

/// Terminal state reported back for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
	Completed(String),
	Failed(String),
}

/// Client interface to the local task server.
#[async_trait]
pub trait TaskServer: Send + Sync {
	/// Polls for the next job; None when there is nothing to do.
	async fn next_job(&self) -> Option<Job>;
	/// Reports a terminal outcome. Best-effort, like the chunk relay.
	async fn report(&self, task_id: &str, outcome: JobOutcome);
	/// Returns the chunk relay bound to one task id.
	fn chunk_sink(&self, task_id: &str) -> Arc<dyn ChunkSink>;
}

/// Triggers the upstream exchange for a prompt. In a browser this is the
/// DOM fill-and-submit layer; here it is whatever client actually issues
/// the streaming request the capture tap then observes.
#[async_trait]
pub trait PromptSurface: Send + Sync {
	async fn submit(&self, prompt: &str) -> Result<()>;
}

/// Ephemeral per-worker flag set once by the out-of-scope injector.
pub trait ReadinessSignal: Send + Sync {
	/// Read-and-clear. Returns true at most once per injection.
	fn take(&self) -> bool;
}

/// Polls `probe` on a fixed sub-interval until it yields a value or the
/// overall timeout elapses, resolving to None ("not found") rather than
/// hanging indefinitely.
pub async fn wait_for<T>(
	interval: Duration,
	timeout: Duration,
	mut probe: impl FnMut() -> Option<T> + Send,
) -> Option<T> {
	let deadline = tokio::time::Instant::now() + timeout;
	loop {
		if let Some(found) = probe() {
			return Some(found);
		}
		if tokio::time::Instant::now() >= deadline {
			return None;
		}
		sleep(interval).await;
	}
}

/// Sequences work items for the leading worker.
pub struct TaskDriver {
	server: Arc<dyn TaskServer>,
	surface: Arc<dyn PromptSurface>,
	capture: Arc<StreamCapture>,
	url_part: String,
	poll_interval: Duration,
}

impl TaskDriver {
	pub fn new(
		server: Arc<dyn TaskServer>,
		surface: Arc<dyn PromptSurface>,
		capture: Arc<StreamCapture>,
		url_part: impl Into<String>,
		poll_interval: Duration,
	) -> Self {
		Self { server, surface, capture, url_part: url_part.into(), poll_interval }
	}

	/// Runs one job: arm the capture, trigger the submission, await the
	/// stream, report. Every failure maps to a failed job report, never a
	/// fatal error.
	pub async fn run_job(&self, job: Job) {
		info!(target = "relay.worker", task_id = %job.task_id, "starting job");

		let sink = self.server.chunk_sink(&job.task_id);
		let pending = match self.capture.begin(&self.url_part, sink) {
			Ok(pending) => pending,
			Err(err) => {
				warn!(target = "relay.worker", task_id = %job.task_id, error = %err, "capture unavailable");
				self.server.report(&job.task_id, JobOutcome::Failed(err.to_string())).await;
				return;
			}
		};

		if let Err(err) = self.surface.submit(&job.prompt).await {
			warn!(target = "relay.worker", task_id = %job.task_id, error = %err, "submission failed");
			pending.cancel();
			self.server.report(&job.task_id, JobOutcome::Failed(err.to_string())).await;
			return;
		}

		match pending.wait().await {
			Ok(text) => {
				info!(target = "relay.worker", task_id = %job.task_id, bytes = text.len(), "job completed");
				self.server.report(&job.task_id, JobOutcome::Completed(text)).await;
			}
			Err(err) => {
				warn!(target = "relay.worker", task_id = %job.task_id, error = %err, "job failed");
				self.server.report(&job.task_id, JobOutcome::Failed(err.to_string())).await;
			}
		}
	}

	/// Leader-only loop: poll for jobs and run them serially. Cancelled
	/// from outside (task abort) on demotion to follower.
	pub async fn work_loop(&self) {
		loop {
			if let Some(job) = self.server.next_job().await {
				self.run_job(job).await;
			}
			sleep(self.poll_interval).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use parking_lot::Mutex;

	use super::*;
	use crate::capture::{NetworkObserver, SessionTap};
	use crate::error::RelayError;

	#[derive(Default)]
	struct TapSlot {
		tap: Mutex<Option<SessionTap>>,
	}

	struct SlotObserver(Arc<TapSlot>);

	impl NetworkObserver for SlotObserver {
		fn install(&self, tap: SessionTap) {
			*self.0.tap.lock() = Some(tap);
		}

		fn restore(&self) {
			self.0.tap.lock().take();
		}
	}

	#[derive(Default)]
	struct RecordingSink {
		chunks: Mutex<Vec<String>>,
	}

	impl ChunkSink for RecordingSink {
		fn deliver(&self, chunk: &str) {
			self.chunks.lock().push(chunk.to_string());
		}
	}

	#[derive(Default)]
	struct MockServer {
		sink: Arc<RecordingSink>,
		reports: Mutex<Vec<(String, JobOutcome)>>,
	}

	#[async_trait]
	impl TaskServer for MockServer {
		async fn next_job(&self) -> Option<Job> {
			None
		}

		async fn report(&self, task_id: &str, outcome: JobOutcome) {
			self.reports.lock().push((task_id.to_string(), outcome));
		}

		fn chunk_sink(&self, _task_id: &str) -> Arc<dyn ChunkSink> {
			Arc::clone(&self.sink) as Arc<dyn ChunkSink>
		}
	}

	/// Plays a canned stream through the installed tap when submitted to.
	struct ScriptedSurface {
		slot: Arc<TapSlot>,
		fail: bool,
	}

	#[async_trait]
	impl PromptSurface for ScriptedSurface {
		async fn submit(&self, _prompt: &str) -> Result<()> {
			if self.fail {
				return Err(RelayError::Timeout { ms: 10_000, condition: "a visible input element".to_string() });
			}
			let tap = self.slot.tap.lock().clone().expect("tap installed before submit");
			tap.opened();
			tap.progress("hello ");
			tap.progress("hello world[null,null,null,[\"id\"]");
			Ok(())
		}
	}

	fn rig(fail_submit: bool) -> (TaskDriver, Arc<MockServer>) {
		let slot = Arc::new(TapSlot::default());
		let server = Arc::new(MockServer::default());
		let capture = Arc::new(StreamCapture::new(Arc::new(SlotObserver(Arc::clone(&slot)))));
		let surface = Arc::new(ScriptedSurface { slot, fail: fail_submit });
		let driver = TaskDriver::new(
			server.clone(),
			surface,
			capture,
			"GenerateContent",
			Duration::from_secs(3),
		);
		(driver, server)
	}

	#[tokio::test(start_paused = true)]
	async fn run_job_reports_completed_text() {
		let (driver, server) = rig(false);
		driver.run_job(Job { task_id: "t1".to_string(), prompt: "hi".to_string() }).await;

		let reports = server.reports.lock().clone();
		assert_eq!(
			reports,
			[("t1".to_string(), JobOutcome::Completed("hello world[null,null,null,[\"id\"]".to_string()))]
		);
		let chunks = server.sink.chunks.lock().clone();
		assert_eq!(chunks.last().map(String::as_str), Some(crate::capture::END_OF_STREAM));
	}

	#[tokio::test(start_paused = true)]
	async fn submit_failure_cancels_capture_and_reports_failed() {
		let (driver, server) = rig(true);
		driver.run_job(Job { task_id: "t2".to_string(), prompt: "hi".to_string() }).await;

		let reports = server.reports.lock().clone();
		assert_eq!(reports.len(), 1);
		assert_eq!(reports[0].0, "t2");
		assert!(matches!(reports[0].1, JobOutcome::Failed(_)));
		assert!(server.sink.chunks.lock().is_empty());

		// The cancelled capture released the single-flight slot.
		driver.run_job(Job { task_id: "t3".to_string(), prompt: "hi".to_string() }).await;
		assert_eq!(server.reports.lock().len(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn wait_for_resolves_once_the_probe_succeeds() {
		let mut calls = 0;
		let found = wait_for(Duration::from_millis(200), Duration::from_secs(10), move || {
			calls += 1;
			(calls >= 3).then_some(calls)
		})
		.await;
		assert_eq!(found, Some(3));
	}

	#[tokio::test(start_paused = true)]
	async fn wait_for_resolves_to_not_found_on_timeout() {
		let started = tokio::time::Instant::now();
		let found: Option<()> = wait_for(Duration::from_millis(200), Duration::from_secs(2), || None).await;
		assert_eq!(found, None);
		assert!(started.elapsed() >= Duration::from_secs(2));
	}
}
