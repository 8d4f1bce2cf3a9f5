//! Error types shared by the election and capture components.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
	/// A bounded wait ran out before its condition was met.
	#[error("timed out after {ms}ms waiting for {condition}")]
	Timeout { ms: u64, condition: String },

	/// A capture session is already installed in this worker.
	#[error("a stream capture is already in progress")]
	CaptureBusy,

	/// The transport reported an error or abort mid-stream. The partial
	/// accumulated text rides along so the caller can still report it.
	#[error("stream failed: {cause}")]
	Stream { cause: String, partial: String },

	/// The upstream submission itself failed before any stream began.
	#[error("upstream request failed: {0}")]
	Upstream(String),

	/// Internal completion channel tore down without resolving.
	#[error("capture channel closed: {0}")]
	Channel(String),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}
