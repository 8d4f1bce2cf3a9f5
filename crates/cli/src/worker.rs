//! Election-driven main loop for one worker process.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use relay::{
	LeaderElector, NetworkObserver, PromptSurface, ReadinessSignal, Role, StreamCapture, TaskDriver, wait_for,
};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::server::TaskServerClient;
use crate::state::{FileLeaseStore, FileReadiness};
use crate::upstream::UpstreamClient;

fn now_ms() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Runs the worker until ctrl-c: tick elections on the fixed period, hold
/// leader-only work while leading, release the lease on the way out so a
/// follower can take over without waiting out the staleness window.
pub async fn run(config: Config) -> anyhow::Result<()> {
	let store = Arc::new(FileLeaseStore::new(&config.state_dir));
	let readiness = Arc::new(FileReadiness::new(&config.state_dir));
	let mut elector = LeaderElector::new(config.worker_id.clone(), store, config.election_interval);

	let server = Arc::new(TaskServerClient::new(config.server_url.clone()));
	let upstream = Arc::new(UpstreamClient::new(config.upstream_url.clone()));
	let capture = Arc::new(StreamCapture::new(Arc::clone(&upstream) as Arc<dyn NetworkObserver>));
	let driver = Arc::new(TaskDriver::new(
		server,
		Arc::clone(&upstream) as Arc<dyn PromptSurface>,
		capture,
		config.target_signature.clone(),
		config.job_poll_interval,
	));

	info!(target = "relay.worker", id = %elector.id(), state_dir = %config.state_dir.display(), "worker started");

	let mut ticker = tokio::time::interval(config.election_interval);
	let mut leader_task: Option<JoinHandle<()>> = None;

	loop {
		tokio::select! {
			_ = ticker.tick() => {
				match elector.tick(now_ms()) {
					Role::Leader if leader_task.is_none() => {
						leader_task = Some(spawn_leader_work(Arc::clone(&driver), Arc::clone(&readiness), &config));
					}
					Role::Follower => {
						// Demotion cancels leader work synchronously.
						if let Some(task) = leader_task.take() {
							task.abort();
						}
					}
					_ => {}
				}
			}
			_ = tokio::signal::ctrl_c() => {
				info!(target = "relay.worker", "shutting down");
				if let Some(task) = leader_task.take() {
					task.abort();
				}
				elector.release();
				return Ok(());
			}
		}
	}
}

/// Leader-only work: consume the readiness flag once, then poll for jobs.
/// The injection collaborator may not have run yet, so a bounded wait that
/// comes back "not found" just logs and goes around again; demotion aborts
/// the whole task.
fn spawn_leader_work(
	driver: Arc<TaskDriver>,
	readiness: Arc<FileReadiness>,
	config: &Config,
) -> JoinHandle<()> {
	let interval = config.readiness_interval;
	let timeout = config.readiness_timeout;
	tokio::spawn(async move {
		loop {
			let found = wait_for(interval, timeout, || readiness.take().then_some(())).await;
			if found.is_some() {
				break;
			}
			debug!(target = "relay.worker", "readiness flag not found, retrying");
		}
		info!(target = "relay.worker", "readiness consumed, starting job polling");
		driver.work_loop().await;
	})
}
