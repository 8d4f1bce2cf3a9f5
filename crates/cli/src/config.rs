//! Worker configuration: endpoints, timing constants, identity.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cli::Cli;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5101";
pub const DEFAULT_UPSTREAM_URL: &str =
	"https://alkalimakersuite-pa.clients6.google.com/$rpc/google.internal.alkali.applications.makersuitepa.v1.MakerSuiteService/GenerateContent";

/// URL-substring signature identifying the target streaming endpoint;
/// requests that do not contain it pass through unobserved.
pub const TARGET_URL_PART: &str = "MakerSuiteService/GenerateContent";

const ELECTION_INTERVAL: Duration = Duration::from_secs(5);
const READINESS_INTERVAL: Duration = Duration::from_secs(1);
const READINESS_TIMEOUT: Duration = Duration::from_secs(60);
const JOB_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct Config {
	pub server_url: String,
	pub upstream_url: String,
	pub target_signature: String,
	pub state_dir: PathBuf,
	pub worker_id: String,
	pub election_interval: Duration,
	pub readiness_interval: Duration,
	pub readiness_timeout: Duration,
	pub job_poll_interval: Duration,
}

impl Config {
	pub fn from_cli(cli: Cli) -> Self {
		Self {
			server_url: cli.server_url,
			upstream_url: cli.upstream_url,
			target_signature: TARGET_URL_PART.to_string(),
			state_dir: cli.state_dir.unwrap_or_else(default_state_dir),
			worker_id: cli.worker_id.unwrap_or_else(generate_worker_id),
			election_interval: ELECTION_INTERVAL,
			readiness_interval: READINESS_INTERVAL,
			readiness_timeout: READINESS_TIMEOUT,
			job_poll_interval: JOB_POLL_INTERVAL,
		}
	}
}

fn default_state_dir() -> PathBuf {
	dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("relay")
}

/// Unique per process; pid plus start time is enough to keep two workers
/// on one host from colliding on the lease.
fn generate_worker_id() -> String {
	let millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
	format!("{}-{}", std::process::id(), millis)
}
