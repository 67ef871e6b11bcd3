//! Run one node's part of a DHT experiment against an in-process testnet.

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use tracing::{error, info, Level};

use dht_experiment::{Commands, Config, DhtModule, Result, Scenario, Testnet};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Experiment configuration (TOML)
    #[arg(long)]
    config: PathBuf,
    /// Scenario file to run
    #[arg(long)]
    scenario: PathBuf,
    /// Id of this node, overrides `my_id` of the configuration
    #[arg(long)]
    my_id: Option<u32>,
    /// Output directory, overrides `output_dir` of the configuration
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Simulated latency of every testnet reply, in milliseconds
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,
    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "Experiment failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_file(&cli.config)?;
    if let Some(my_id) = cli.my_id {
        config.my_id = Some(my_id);
    }
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    config.validate()?;

    let scenario = Scenario::from_file(&cli.scenario)?;
    let commands = Commands::new();
    scenario.validate(&commands)?;

    let my_id = config.my_id()?;
    let peers = config.peers()?;
    let address = peers
        .get(&my_id)
        .map(|peer| peer.address)
        .ok_or_else(|| dht_experiment::Error::Config(format!("no address for peer {my_id}")))?;

    let testnet = Testnet::from_peers(&peers)?.with_latency(Duration::from_millis(cli.latency_ms));
    let overlay = testnet.node(address)?;

    info!(my_id, %address, node = %overlay.id(), "Starting experiment");

    let mut module = DhtModule::new(config);
    module.on_id_received(my_id, peers)?;
    module.on_overlay_available(overlay)?;

    let report = scenario.run(&module, &commands).await?;
    info!(executed = report.executed, failed = report.failed, "Scenario done");

    module.stop()?;

    Ok(())
}
