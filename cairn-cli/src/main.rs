//! cairn - mirror an on-chain append-only dataset, verified block by block.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cairn_sync::CairnClient;

use crate::config::FileConfig;

#[derive(Parser)]
#[command(name = "cairn", version, about = "Verifying mirror for an on-chain MMR dataset")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, short, default_value = "cairn.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Catch up on history and follow the chain head.
    Run,
    /// Re-verify and re-push the whole DAG trail to the block store.
    Repin,
    /// Print every stored key/value pair.
    Dump,
    /// Compare the local mirror against the chain.
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "cairn failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> cairn_core::Result<()> {
    let file_config = FileConfig::load(&cli.config)?;
    let client = CairnClient::open(file_config.to_cairn_config(), file_config.adapter()).await?;

    match cli.command {
        Command::Run => {
            client.start().await?;
            info!("mirror running, ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            client.shutdown().await?;
        }
        Command::Repin => {
            let report = client.republish().await?;
            println!("pushed {} blocks, {} failures", report.pushed, report.failed);
            client.shutdown().await?;
        }
        Command::Dump => {
            for (key, value) in client.dump()? {
                println!("{key}\t{value}");
            }
            client.shutdown().await?;
        }
        Command::Status => {
            let status = client.status().await?;
            println!("local leaves (contiguous): {}", status.local_contiguous + 1);
            println!("local committed:           {}", status.local_committed);
            println!("local root:                {}", status.local_root);
            println!("chain leaves:              {}", status.chain_leaves);
            println!("chain root:                {}", status.chain_root);
            println!("in sync:                   {}", status.in_sync);
            client.shutdown().await?;
        }
    }
    Ok(())
}
