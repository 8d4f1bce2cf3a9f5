//! File-backed implementations of the shared coordination state.
//!
//! Every worker on the host points at the same state directory; the lease
//! file is the shared medium the election runs over. Plain reads and
//! writes, no locking: the election protocol is built to absorb the races
//! that come with that.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use relay::{LeaseStore, ReadinessSignal};
use tracing::warn;

const LEASE_FILE: &str = "lease.json";
const READY_FILE: &str = "ready";

/// Lease record persisted as one JSON file in the state dir.
pub struct FileLeaseStore {
	path: PathBuf,
}

impl FileLeaseStore {
	pub fn new(state_dir: &Path) -> Self {
		Self { path: state_dir.join(LEASE_FILE) }
	}
}

impl LeaseStore for FileLeaseStore {
	fn load(&self) -> Option<String> {
		fs::read_to_string(&self.path).ok()
	}

	fn store(&self, raw: &str) {
		if let Some(parent) = self.path.parent() {
			let _ = fs::create_dir_all(parent);
		}
		if let Err(err) = fs::write(&self.path, raw) {
			warn!(target = "relay.election", path = %self.path.display(), error = %err, "lease write failed");
		}
	}

	fn clear(&self) {
		if let Err(err) = fs::remove_file(&self.path) {
			if err.kind() != ErrorKind::NotFound {
				warn!(target = "relay.election", path = %self.path.display(), error = %err, "lease clear failed");
			}
		}
	}
}

/// Marker file created once by the out-of-scope injection collaborator.
/// Removing it is the read-and-clear, so the flag is consumed exactly once
/// even with a rival worker racing for it.
pub struct FileReadiness {
	path: PathBuf,
}

impl FileReadiness {
	pub fn new(state_dir: &Path) -> Self {
		Self { path: state_dir.join(READY_FILE) }
	}
}

impl ReadinessSignal for FileReadiness {
	fn take(&self) -> bool {
		match fs::remove_file(&self.path) {
			Ok(()) => true,
			Err(err) if err.kind() == ErrorKind::NotFound => false,
			Err(err) => {
				warn!(target = "relay.worker", path = %self.path.display(), error = %err, "readiness check failed");
				false
			}
		}
	}
}
