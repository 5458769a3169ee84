use std::{path::PathBuf, process::exit, sync::Arc, time::Duration};

use clap::Parser;
use colored::Colorize;
use fleet::{
    config::RunConfig,
    coordinator::RaceOutcome,
    estimator::{self, SizingRequest, MAX_WORKERS},
    lifecycle::FleetManager,
    provider::{
        artifact::LocalArtifacts, channel::InMemoryChannels, compute::LocalCluster,
        telemetry::LocalTelemetry,
    },
};
use shared::log::init_log;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..=14),
        help = "The number of workers to divide the search across"
    )]
    workers: u32,

    #[arg(
        long,
        default_value_t = 10,
        help = "The difficulty of nonce discovery. This corresponds to the number of leading zero bits required in the digest"
    )]
    difficulty: u32,

    #[arg(long, default_value = "blockdata", help = "Block payload the nonce is appended to")]
    payload: String,

    #[arg(long, default_value_t = 1u64 << 32, help = "Size of the nonce space to sweep")]
    space: u64,

    #[arg(
        long,
        default_value_t = 0,
        help = "Abort the run after this many seconds. 0 disables the deadline"
    )]
    timeout: u64,

    #[arg(long, help = "Collect worker search positions when a run is aborted")]
    logscram: bool,

    #[arg(long, help = "Size the fleet from historical statistics at this confidence level")]
    confidence: Option<f64>,

    #[arg(long, help = "Target runtime in seconds for confidence sizing")]
    target_runtime: Option<f64>,

    #[arg(long, help = "Prefer the smallest viable worker count when sizing")]
    minimize: bool,

    #[arg(long, help = "Path to the worker executable staged before provisioning")]
    artifact: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    init_log();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => exit(0),
        Err(err) => {
            error!("{err:#}");
            exit(1);
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let channels = Arc::new(InMemoryChannels::new());
    let telemetry = Arc::new(LocalTelemetry::new());
    let artifacts = Arc::new(LocalArtifacts::new());
    let cluster = Arc::new(LocalCluster::new(channels.clone(), telemetry.clone()));

    let workers = match args.confidence {
        Some(confidence) => {
            if confidence <= 0.0 || confidence >= 1.0 {
                anyhow::bail!("--confidence must lie strictly between 0 and 1");
            }
            let Some(target_runtime) = args.target_runtime else {
                anyhow::bail!("--confidence requires --target-runtime");
            };
            let request = SizingRequest {
                target_runtime,
                difficulty: args.difficulty,
                confidence,
                minimize_instances: args.minimize,
                max_workers: MAX_WORKERS,
            };
            let sized = estimator::size_fleet(telemetry.as_ref(), &request).await?;
            info!("confidence sizing picked {sized} workers");
            sized
        }
        None => args.workers,
    };

    let config = RunConfig {
        workers,
        difficulty: args.difficulty,
        payload: args.payload,
        space: args.space,
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        collect_logs: args.logscram,
        ready_deadline: Duration::from_secs(60),
        artifact: args.artifact,
    };

    let manager = FleetManager::new(config, cluster, channels, telemetry, artifacts);

    // an interrupt only cancels the token; the lifecycle owns the teardown
    let abort = CancellationToken::new();
    {
        let abort = abort.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, scramming");
                abort.cancel();
            }
        });
    }

    let report = manager.run(&abort).await?;

    match report.outcome {
        RaceOutcome::Won(result) => {
            println!("{}", "----------------------------------------".green());
            println!("{}", "           NONCE  DISCOVERED            ".bold().green());
            println!("{}", "----------------------------------------".green());
            println!("golden nonce: {}", result.nonce.to_string().bold());
            println!("digest:       {}", result.digest_hex);
            println!("zero bits:    {}", result.leading_zeros);
            println!(
                "found by:     {} in {:.3}s ({:.3}s total)",
                result.worker, result.elapsed_secs, report.total_secs
            );
            Ok(())
        }
        RaceOutcome::Exhausted => {
            anyhow::bail!("search space exhausted with no qualifying nonce")
        }
        RaceOutcome::Aborted => anyhow::bail!("run aborted before a nonce was found"),
    }
}
