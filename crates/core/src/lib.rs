//! Core of the prompt relay worker.
//!
//! Two hard problems live here: leaderless election of exactly one active
//! worker over a shared key/value medium with no atomic primitives
//! ([`election`]), and exactly-once capture of a streamed response body
//! whose end must be inferred heuristically ([`capture`]). [`driver`]
//! holds the thin glue that sequences one work item through both, behind
//! trait seams for the external collaborators.

pub mod capture;
pub mod driver;
pub mod election;
pub mod error;
pub mod lease;

pub use capture::{ChunkSink, END_OF_STREAM, NetworkObserver, PendingCapture, SessionTap, StreamCapture};
pub use driver::{Job, JobOutcome, PromptSurface, ReadinessSignal, TaskDriver, TaskServer, wait_for};
pub use election::{LeaderElector, Role};
pub use error::{RelayError, Result};
pub use lease::{LeaseRecord, LeaseStore};
