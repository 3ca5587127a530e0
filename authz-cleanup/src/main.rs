#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::Result;
use authz_controller_runtime::k8s::DryRun;
use clap::{Parser, Subcommand};
use tracing::info;

mod duplicates;
mod orphans;

/// Sweeps generated role bindings left behind by earlier controller versions
#[derive(Parser)]
#[clap(version, about)]
struct Args {
    #[clap(long, env = "AUTHZ_CLEANUP_LOG_LEVEL", default_value = "authz_cleanup=info,warn")]
    log_level: kubert::LogFilter,

    #[clap(long, env = "AUTHZ_CLEANUP_LOG_FORMAT", default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    /// Log the deletes and updates that would be made instead of making them
    #[clap(long, env = "DRY_RUN")]
    dry_run: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Delete redundant membership bindings of cluster and project bindings
    Duplicates,

    /// Delete group role bindings whose project bindings no longer exist
    Orphans,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let Args {
        log_level,
        log_format,
        client,
        dry_run,
        command,
    } = Args::parse();

    log_format.try_init(log_level)?;

    let store = DryRun::new(client.try_client().await?, dry_run);
    if store.is_enabled() {
        info!("Dry run; no changes will be made");
    }

    match command {
        Command::Duplicates => {
            let summary = duplicates::run(&store).await?;
            info!(bindings = summary.bindings, duplicates = summary.duplicates, "Done");
        }
        Command::Orphans => {
            let summary = orphans::run(&store).await?;
            info!(orphans = summary.orphans, stripped = summary.stripped, "Done");
        }
    }
    Ok(())
}
