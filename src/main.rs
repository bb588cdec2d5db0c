use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use cinescope::config::Settings;
use cinescope::logging::{init_tracing, with_bootstrap_logging};
use cinescope::pipeline::{RunOptions, Shutdown};
use cinescope::stages::{self, Stage};
use cinescope::util::env;

#[derive(Parser, Debug)]
#[command(name = "cinescope", version, about = "Enrich an IMDb watchlist with TMDb, OMDb and DDD metadata")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct StageArgs {
    /// Ignore existing output and reprocess every title
    #[arg(long, default_value_t = false)]
    force: bool,
    /// Process at most N titles this run
    #[arg(long)]
    limit: Option<usize>,
}

impl From<StageArgs> for RunOptions {
    fn from(args: StageArgs) -> Self {
        RunOptions {
            force: args.force,
            limit: args.limit,
        }
    }
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Stage 1: look up every watchlist title on TMDb
    Tmdb(StageArgs),
    /// Stage 2: add OMDb details, within the daily request quota
    Omdb(StageArgs),
    /// Stage 3: add "Does the Dog Die?" content warnings
    Ddd(StageArgs),
    /// Run all three stages in order
    All(StageArgs),
    /// Show today's OMDb quota usage (no network)
    Quota,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = ?err, "cinescope failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    env::init_env();
    let settings = with_bootstrap_logging(|| -> Result<Settings> {
        let settings = Settings::from_env()?;
        settings.ensure_directories()?;
        Ok(settings)
    })?;
    init_tracing(&settings.log_level, Some(settings.log_file().as_path()))?;

    let today = chrono::Local::now().date_naive();
    let shutdown = Shutdown::new();

    match cli.command {
        Commands::Quota => {
            stages::report_quota(&settings, today)?;
        }
        Commands::All(args) => {
            shutdown.install_ctrl_c();
            stages::run_all(&settings, args.into(), shutdown, today).await?;
        }
        Commands::Tmdb(args) => {
            shutdown.install_ctrl_c();
            stages::run_stage(Stage::Tmdb, &settings, args.into(), shutdown, today).await?;
        }
        Commands::Omdb(args) => {
            shutdown.install_ctrl_c();
            stages::run_stage(Stage::Omdb, &settings, args.into(), shutdown, today).await?;
        }
        Commands::Ddd(args) => {
            shutdown.install_ctrl_c();
            stages::run_stage(Stage::Ddd, &settings, args.into(), shutdown, today).await?;
        }
    }
    Ok(())
}
