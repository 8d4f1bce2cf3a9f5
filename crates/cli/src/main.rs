use clap::Parser;
use relay_cli::{cli::Cli, config::Config, logging, worker};
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let config = Config::from_cli(cli);
	if let Err(err) = worker::run(config).await {
		error!(target = "relay", error = %err, "worker exited");
		std::process::exit(1);
	}
}
