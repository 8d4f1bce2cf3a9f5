//! Single-flight capture of a progressively-growing streamed response.
//!
//! The upstream protocol has no terminator an observer can rely on, so the
//! end of a stream is inferred twice over: a structural signature that
//! matches only the unique final framing block, and a grace timer armed on
//! the transport's completion event as the fallback for response shapes
//! the signature does not recognize. A false negative costs 1.5s; a false
//! positive would truncate the stream, which is why the signature is as
//! narrow as it is.

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{RelayError, Result};


/// Reserved marker delivered as the last chunk of every session.
pub const END_OF_STREAM: &str = "__END_OF_STREAM__";

const ARM_TIMEOUT: Duration = Duration::from_secs(60);
const GRACE_PERIOD: Duration = Duration::from_millis(1500);

/// Matches only the final framing block of the upstream protocol, the one
/// carrying the closing id list. Intermediate metadata blocks never take
/// this shape, so a match mid-stream cannot fire early.
static FINAL_BLOCK_SIGNATURE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r#"\[\s*null\s*,\s*null\s*,\s*null\s*,\s*\[\s*""#).expect("static pattern"));

/// Downstream consumer of stream chunks. Delivery is fire-and-forget.
pub trait ChunkSink: Send + Sync {
	fn deliver(&self, chunk: &str);
}

/// Injectable hook over the outgoing transport.
///
/// Implementations wrap the actual client as a decorator rather than
/// patching shared global state; `restore` must be idempotent, and the
/// capture single-flight guard is the only discipline keeping two taps
/// from being installed at once.
pub trait NetworkObserver: Send + Sync {
	fn install(&self, tap: SessionTap);
	fn restore(&self);
}

/// Transport error surfaced to the caller together with the partial text.
struct StreamFailure {
	cause: String,
	partial: String,
}

type CaptureResult = std::result::Result<String, StreamFailure>;

struct SessionState {
	/// Offset up to which chunks have been handed to the sink. Never
	/// exceeds `text.len()`.
	delivered: usize,
	/// Full response text observed so far; only ever grows by appending.
	text: String,
	terminated: bool,
	grace: Option<JoinHandle<()>>,
	done: Option<oneshot::Sender<CaptureResult>>,
}

struct Session {
	state: Mutex<SessionState>,
	armed: Mutex<Option<oneshot::Sender<()>>>,
	sink: Arc<dyn ChunkSink>,
	observer: Arc<dyn NetworkObserver>,
	grace_period: Duration,
}

impl Session {
	fn opened(&self) {
		if let Some(tx) = self.armed.lock().take() {
			debug!(target = "relay.capture", "matching request observed");
			let _ = tx.send(());
		}
	}

	/// One progress notification: deliver the unread suffix, then test it
	/// against the end-of-stream signature.
	fn progress(&self, text: &str) {
		let mut s = self.state.lock();
		if s.terminated || text.len() < s.text.len() {
			return;
		}
		s.text = text.to_string();
		if s.delivered == s.text.len() {
			return;
		}
		let suffix = s.text[s.delivered..].to_string();
		s.delivered = s.text.len();
		self.sink.deliver(&suffix);

		if FINAL_BLOCK_SIGNATURE.is_match(&suffix) {
			debug!(target = "relay.capture", "final signature block detected");
			if self.finalize_locked(&mut s, None) {
				drop(s);
				self.observer.restore();
			}
		}
	}

	/// Transport completion without a signature match: arm the grace timer
	/// instead of finalizing outright.
	fn loaded(self: &Arc<Self>) {
		let mut s = self.state.lock();
		if s.terminated || s.grace.is_some() {
			return;
		}
		debug!(target = "relay.capture", "transport complete, arming grace timer");
		let session = Arc::clone(self);
		let grace_period = self.grace_period;
		s.grace = Some(tokio::spawn(async move {
			tokio::time::sleep(grace_period).await;
			session.finalize(None);
		}));
	}

	fn errored(&self, cause: &str) {
		self.finalize(Some(cause.to_string()));
	}

	fn aborted(&self) {
		self.finalize(Some("request aborted".to_string()));
	}

	fn finalize(&self, failure: Option<String>) {
		let fired = {
			let mut s = self.state.lock();
			self.finalize_locked(&mut s, failure)
		};
		if fired {
			self.observer.restore();
		}
	}

	/// Exactly-once teardown: flush the unsent suffix, emit the sentinel,
	/// resolve the completion channel, and report whether this call won.
	fn finalize_locked(&self, s: &mut SessionState, failure: Option<String>) -> bool {
		if s.terminated {
			return false;
		}
		s.terminated = true;
		if let Some(timer) = s.grace.take() {
			timer.abort();
		}

		if s.delivered < s.text.len() {
			let tail = s.text[s.delivered..].to_string();
			s.delivered = s.text.len();
			self.sink.deliver(&tail);
		}
		self.sink.deliver(END_OF_STREAM);

		if let Some(tx) = s.done.take() {
			let result = match failure {
				None => Ok(s.text.clone()),
				Some(cause) => Err(StreamFailure { cause, partial: s.text.clone() }),
			};
			let _ = tx.send(result);
		}
		debug!(target = "relay.capture", bytes = s.text.len(), "stream finalized");
		true
	}
}

/// Cloneable handle driven by the [`NetworkObserver`] implementation.
#[derive(Clone)]
pub struct SessionTap {
	url_part: Arc<str>,
	session: Arc<Session>,
}

impl SessionTap {
	/// URL-substring match for the target streaming endpoint; everything
	/// else passes through unobserved.
	pub fn matches(&self, url: &str) -> bool {
		url.contains(&*self.url_part)
	}

	/// A matching outgoing request was observed; cancels the arm timeout.
	pub fn opened(&self) {
		self.session.opened();
	}

	/// The full response text observed so far (not a delta).
	pub fn progress(&self, text: &str) {
		self.session.progress(text);
	}

	/// The transport reported clean completion.
	pub fn loaded(&self) {
		self.session.loaded();
	}

	/// The transport reported an error.
	pub fn errored(&self, cause: &str) {
		self.session.errored(cause);
	}

	/// The request was aborted.
	pub fn aborted(&self) {
		self.session.aborted();
	}
}

/// Uninstalls the tap and releases the single-flight slot when the
/// pending capture goes away, however it goes away. `restore` is
/// idempotent, so this is safe after finalize has already uninstalled.
struct FlightGuard {
	active: Arc<AtomicBool>,
	observer: Arc<dyn NetworkObserver>,
}

impl Drop for FlightGuard {
	fn drop(&mut self) {
		self.observer.restore();
		self.active.store(false, Ordering::SeqCst);
	}
}

/// An installed capture awaiting its stream.
pub struct PendingCapture {
	armed_rx: oneshot::Receiver<()>,
	done_rx: oneshot::Receiver<CaptureResult>,
	arm_timeout: Duration,
	_guard: FlightGuard,
}

impl PendingCapture {
	/// Awaits stream completion.
	///
	/// Rejects and uninstalls if no matching request is observed within
	/// the arm timeout. A transport error rejects with the partial text
	/// attached; finalization has already flushed chunks and the sentinel
	/// by then.
	pub async fn wait(self) -> Result<String> {
		let PendingCapture { armed_rx, done_rx, arm_timeout, _guard } = self;

		if tokio::time::timeout(arm_timeout, armed_rx).await.is_err() {
			return Err(RelayError::Timeout {
				ms: arm_timeout.as_millis() as u64,
				condition: "a matching upstream request".to_string(),
			});
		}

		match done_rx.await {
			Ok(Ok(text)) => Ok(text),
			Ok(Err(failure)) => Err(RelayError::Stream { cause: failure.cause, partial: failure.partial }),
			Err(_) => Err(RelayError::Channel("capture session dropped".to_string())),
		}
	}

	/// Uninstalls a capture whose triggering action never happened (for
	/// example the submission itself failed). Equivalent to dropping;
	/// this just names the intent at the call site.
	pub fn cancel(self) {}
}

/// Installs single-flight stream captures over an injected observer.
pub struct StreamCapture {
	observer: Arc<dyn NetworkObserver>,
	active: Arc<AtomicBool>,
	arm_timeout: Duration,
	grace_period: Duration,
}

impl StreamCapture {
	pub fn new(observer: Arc<dyn NetworkObserver>) -> Self {
		Self {
			observer,
			active: Arc::new(AtomicBool::new(false)),
			arm_timeout: ARM_TIMEOUT,
			grace_period: GRACE_PERIOD,
		}
	}

	/// Installs the observation tap for the next exchange matching
	/// `url_part` and returns the pending session.
	///
	/// Installation happens before this returns, so the caller can safely
	/// trigger the action that produces the request afterwards. At most
	/// one capture may be active per worker; a second call fails with
	/// [`RelayError::CaptureBusy`] without touching the installed tap.
	pub fn begin(&self, url_part: &str, sink: Arc<dyn ChunkSink>) -> Result<PendingCapture> {
		if self.active.swap(true, Ordering::SeqCst) {
			return Err(RelayError::CaptureBusy);
		}

		let (armed_tx, armed_rx) = oneshot::channel();
		let (done_tx, done_rx) = oneshot::channel();
		let session = Arc::new(Session {
			state: Mutex::new(SessionState {
				delivered: 0,
				text: String::new(),
				terminated: false,
				grace: None,
				done: Some(done_tx),
			}),
			armed: Mutex::new(Some(armed_tx)),
			sink,
			observer: Arc::clone(&self.observer),
			grace_period: self.grace_period,
		});

		debug!(target = "relay.capture", url_part, "installing capture tap");
		self.observer.install(SessionTap { url_part: Arc::from(url_part), session });

		Ok(PendingCapture {
			armed_rx,
			done_rx,
			arm_timeout: self.arm_timeout,
			_guard: FlightGuard {
				active: Arc::clone(&self.active),
				observer: Arc::clone(&self.observer),
			},
		})
	}

	/// Convenience wrapper: install and await in one call.
	pub async fn capture(&self, url_part: &str, sink: Arc<dyn ChunkSink>) -> Result<String> {
		self.begin(url_part, sink)?.wait().await
	}
}
