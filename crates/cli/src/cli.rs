//! Command-line interface for the relay worker.

use std::path::PathBuf;

use clap::Parser;

use crate::config;

#[derive(Debug, Parser)]
#[command(name = "relay", version, about = "Relays streamed prompt responses to a local task server")]
pub struct Cli {
	/// Base URL of the local task server.
	#[arg(long, default_value = config::DEFAULT_SERVER_URL)]
	pub server_url: String,

	/// Upstream streaming endpoint prompts are submitted to.
	#[arg(long, default_value = config::DEFAULT_UPSTREAM_URL)]
	pub upstream_url: String,

	/// Directory holding the shared lease and readiness files.
	/// Defaults to the user config dir.
	#[arg(long)]
	pub state_dir: Option<PathBuf>,

	/// Stable worker identity; generated when omitted.
	#[arg(long)]
	pub worker_id: Option<String>,

	/// Increase log verbosity (-v for debug, -vv for trace).
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,
}
