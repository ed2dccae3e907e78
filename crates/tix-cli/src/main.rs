use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tix-cli")]
#[command(about = "Ticket sales impact pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync cycle.
    Sync,
    /// Run sync cycles on TIX_SYNC_CRON until interrupted.
    Schedule,
    /// Print the newest recorded sync outcomes as markdown.
    Report {
        #[arg(long, default_value_t = 10)]
        runs: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = tix_sync::run_sync_once_from_env().await?;
            println!("sync complete: run_id={} {}", summary.run_id, summary.message());
        }
        Commands::Schedule => {
            let mut config = tix_sync::SyncConfig::from_env();
            config.scheduler_enabled = true;
            let pipeline_config = tix_sync::PipelineConfig::load(&config.pipeline_config_path)?;
            let pipeline = Arc::new(tix_sync::SyncPipeline::new(config, pipeline_config));

            let Some(mut sched) = tix_sync::maybe_build_scheduler(pipeline).await? else {
                return Ok(());
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Report { runs } => {
            let pipeline = tix_sync::pipeline_from_env()?;
            let history = pipeline.outcome_history().await?;
            print!("{}", tix_sync::report_outcomes_markdown(&history, runs));
        }
    }

    Ok(())
}
