//! Tick-driven leader election over the shared lease medium.
//!
//! The read-check-write sequence is not atomic: two workers can both see a
//! stale record and both claim. The race is bounded, not fixed — on the
//! next tick only the worker whose id matches the stored record keeps
//! renewing, so duplicate leadership self-corrects within one interval.
//! Downstream work must be idempotent per task id to tolerate the overlap.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::lease::{LeaseRecord, LeaseStore};

// Staleness window is 2.5x the renewal interval.
const STALE_NUM: u64 = 5;
const STALE_DEN: u64 = 2;

/// Role of this worker, derived fresh on every election tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
	#[default]
	Unknown,
	Follower,
	Leader,
}

/// Claims, renews, or yields the shared lease on a fixed period.
pub struct LeaderElector {
	id: String,
	store: Arc<dyn LeaseStore>,
	interval: Duration,
	role: Role,
}

impl LeaderElector {
	pub fn new(id: impl Into<String>, store: Arc<dyn LeaseStore>, interval: Duration) -> Self {
		Self { id: id.into(), store, interval, role: Role::Unknown }
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn role(&self) -> Role {
		self.role
	}

	/// Staleness window: 2.5x the renewal interval.
	pub fn staleness_ms(&self) -> u64 {
		self.interval.as_millis() as u64 * STALE_NUM / STALE_DEN
	}

	/// Runs one election round and returns the resulting role.
	///
	/// Absent, unparseable, or stale record: overwrite with our own claim
	/// and lead. Record owned by us: refresh the timestamp. Anything else:
	/// follow. Role changes only ever happen here, at tick boundaries.
	pub fn tick(&mut self, now_ms: u64) -> Role {
		let record = self.store.load().and_then(|raw| LeaseRecord::parse(&raw));
		let next = match record {
			Some(rec) if !rec.is_stale(now_ms, self.staleness_ms()) => {
				if rec.id == self.id {
					self.renew(now_ms);
					Role::Leader
				} else {
					Role::Follower
				}
			}
			_ => {
				self.renew(now_ms);
				Role::Leader
			}
		};

		if next != self.role {
			info!(target = "relay.election", id = %self.id, from = ?self.role, to = ?next, "role change");
		}
		self.role = next;
		next
	}

	/// Proactively clears the lease on teardown while leading, so a
	/// successor claims on its next tick instead of waiting out the
	/// staleness window.
	pub fn release(&mut self) {
		if self.role == Role::Leader {
			debug!(target = "relay.election", id = %self.id, "releasing lease");
			self.store.clear();
		}
		self.role = Role::Unknown;
	}

	fn renew(&self, now_ms: u64) {
		self.store.store(&LeaseRecord::new(self.id.clone(), now_ms).to_json());
	}
}
