//! Lease record and the shared key/value medium it lives in.
//!
//! The lease is the sole coordination channel between workers. The medium
//! offers plain read/write/clear with no compare-and-swap, so ownership is
//! last-writer-wins and staleness is judged against the renewal interval.

use serde::{Deserialize, Serialize};

/// Time-bounded leadership claim stored under the well-known lease key.
///
/// Only the worker that currently believes it owns the lease mutates it,
/// so `timestamp` is monotonically non-decreasing per owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseRecord {
	/// Opaque worker identity.
	pub id: String,
	/// Last renewal time, epoch milliseconds.
	pub timestamp: u64,
}

impl LeaseRecord {
	pub fn new(id: impl Into<String>, now_ms: u64) -> Self {
		Self { id: id.into(), timestamp: now_ms }
	}

	/// Parses a raw stored value. Garbled or truncated records read as
	/// absent; the next tick re-evaluates from scratch, so no retry logic
	/// is needed here.
	pub fn parse(raw: &str) -> Option<Self> {
		serde_json::from_str(raw).ok()
	}

	pub fn to_json(&self) -> String {
		serde_json::to_string(self).unwrap_or_default()
	}

	/// True once the record has gone unrenewed past the staleness window.
	pub fn is_stale(&self, now_ms: u64, ttl_ms: u64) -> bool {
		now_ms.saturating_sub(self.timestamp) > ttl_ms
	}
}

/// Shared key/value medium visible to every worker in the fleet.
///
/// Reads tolerate a missing value; writes are best-effort (implementations
/// log failures rather than propagate them, since the next election tick
/// rewrites the record anyway).
pub trait LeaseStore: Send + Sync {
	fn load(&self) -> Option<String>;
	fn store(&self, raw: &str);
	fn clear(&self);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_round_trips_wire_shape() {
		let record = LeaseRecord::new("w-1", 1_000);
		let parsed = LeaseRecord::parse(&record.to_json()).expect("parse");
		assert_eq!(parsed, record);
	}

	#[test]
	fn parse_treats_garbage_as_absent() {
		assert!(LeaseRecord::parse("not json").is_none());
		assert!(LeaseRecord::parse("{\"id\":3}").is_none());
	}

	#[test]
	fn staleness_is_strictly_past_the_window() {
		let record = LeaseRecord::new("w-1", 1_000);
		assert!(!record.is_stale(13_500, 12_500));
		assert!(record.is_stale(13_501, 12_500));
	}
}
