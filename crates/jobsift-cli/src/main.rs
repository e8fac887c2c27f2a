use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use jobsift_core::RunStatus;
use jobsift_pipeline::scheduler::run_scheduler_until_ctrl_c;
use jobsift_pipeline::{summarize_recent_runs, Pipeline, PipelineConfig};
use jobsift_storage::PgJobWriter;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "jobsift")]
#[command(about = "Collect, deduplicate, filter and rank job postings")]
struct Cli {
    /// Pipeline configuration file; missing means defaults.
    #[arg(long, global = true, default_value = "jobsift.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every enabled stage once.
    Run(RunArgs),
    /// Apply Postgres migrations.
    Migrate,
    /// Run the pipeline on the configured cron schedule until Ctrl-C.
    Schedule,
    /// Summarize the most recent runs.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// Skip collection and resume from a collected snapshot.
    #[arg(long)]
    skip_collect: bool,
    /// Snapshot to resume from; defaults to the latest collected one.
    #[arg(long, requires = "skip_collect")]
    snapshot: Option<PathBuf>,
    #[arg(long)]
    skip_dedup: bool,
    #[arg(long)]
    skip_extract: bool,
    #[arg(long)]
    skip_filter: bool,
    /// Do everything except writing to the job store.
    #[arg(long)]
    dry_run: bool,
    /// Disable the semantic deduplication tier.
    #[arg(long)]
    no_semantic: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        let stages = &mut config.stages;
        stages.collect &= !self.skip_collect;
        stages.dedup &= !self.skip_dedup;
        stages.extract &= !self.skip_extract;
        stages.filter &= !self.skip_filter;
        stages.store &= !self.dry_run;
        if self.no_semantic {
            config.dedup.semantic_enabled = false;
        }
        if let Some(snapshot) = &self.snapshot {
            config.resume_snapshot = Some(snapshot.clone());
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = PipelineConfig::from_file_and_env(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            args.apply(&mut config);
            let pipeline = Pipeline::from_config(config).await?;
            let report = pipeline.run().await?;
            println!("{}", report.one_line_summary());
            if let Some(dir) = &report.report_dir {
                println!("report: {}", dir.display());
            }
            if report.status != RunStatus::Success {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Migrate => {
            let url = config
                .storage
                .database_url
                .as_deref()
                .context("DATABASE_URL is not set")?;
            let writer = PgJobWriter::connect(url).await?;
            writer.migrate().await?;
            println!("migrations applied");
        }
        Commands::Schedule => {
            if !config.scheduler.enabled {
                warn!("scheduler disabled in config; starting it because `schedule` was requested");
                config.scheduler.enabled = true;
            }
            let crons = config.scheduler.crons.clone();
            let pipeline = Arc::new(Pipeline::from_config(config).await?);
            info!(crons = ?crons, "starting scheduler");
            run_scheduler_until_ctrl_c(pipeline, &crons).await?;
        }
        Commands::Report { runs } => {
            println!("{}", summarize_recent_runs(&config.reports_root(), runs)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_only_ever_disable_stages() {
        let cli = Cli::parse_from(["jobsift", "run", "--skip-collect", "--snapshot", "snap.json", "--dry-run", "--no-semantic"]);
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        let mut config = PipelineConfig::default();
        config.stages.extract = false;
        args.apply(&mut config);
        assert!(!config.stages.collect);
        assert!(config.stages.dedup);
        assert!(!config.stages.extract);
        assert!(!config.stages.store);
        assert!(!config.dedup.semantic_enabled);
        assert_eq!(config.resume_snapshot, Some(PathBuf::from("snap.json")));
    }

    #[test]
    fn snapshot_requires_skip_collect() {
        assert!(Cli::try_parse_from(["jobsift", "run", "--snapshot", "snap.json"]).is_err());
    }

    #[test]
    fn report_defaults_to_five_runs() {
        let cli = Cli::parse_from(["jobsift", "--config", "alt.yaml", "report"]);
        assert_eq!(cli.config, PathBuf::from("alt.yaml"));
        assert!(matches!(cli.command, Some(Commands::Report { runs: 5 })));
    }
}
