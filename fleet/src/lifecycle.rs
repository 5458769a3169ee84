use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

use shared::{
    channel::{cancel_channel, ChannelProvider, ASSIGN_CHANNEL, RESULT_CHANNEL},
    envelope::WorkAssignment,
    errors::{FleetError, FleetResult},
    partition, pow,
    telemetry::{TelemetryStore, RUN_STREAM},
    timestamp,
    types::{RunId, WorkerId},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::RunConfig,
    coordinator::{RaceCoordinator, RaceOutcome},
    provider::{ArtifactStore, Provisioner, WorkerHandle},
};

/// Name the worker executable is staged under.
const WORKER_ARTIFACT: &str = "worker";

#[derive(Debug)]
pub struct RunReport {
    pub run: RunId,
    pub outcome: RaceOutcome,
    pub search_secs: f64,
    pub total_secs: f64,
}

/// Drives one run front to back: stage, provision, ready-wait, dispatch,
/// race. The scram executes on every exit path and at most once in effect.
pub struct FleetManager {
    config: RunConfig,
    run: RunId,
    provisioner: Arc<dyn Provisioner>,
    channels: Arc<dyn ChannelProvider>,
    telemetry: Arc<dyn TelemetryStore>,
    artifacts: Arc<dyn ArtifactStore>,
    handles: Mutex<Vec<WorkerHandle>>,
    scrammed: AtomicBool,
}

impl FleetManager {
    pub fn new(
        config: RunConfig,
        provisioner: Arc<dyn Provisioner>,
        channels: Arc<dyn ChannelProvider>,
        telemetry: Arc<dyn TelemetryStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            run: RunId::generate(),
            provisioner,
            channels,
            telemetry,
            artifacts,
            handles: Mutex::new(Vec::new()),
            scrammed: AtomicBool::new(false),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run
    }

    pub async fn run(&self, abort: &CancellationToken) -> FleetResult<RunReport> {
        let started = Instant::now();
        info!(
            "{}: {} workers over [0, {}), difficulty {}",
            self.run, self.config.workers, self.config.space, self.config.difficulty
        );

        let raced = self.execute(abort).await;

        // teardown runs no matter how the race ended
        if let Err(err) = self.scram().await {
            error!("{}: {err}", self.run);
        }

        let total_secs = started.elapsed().as_secs_f64();
        match raced {
            Ok((outcome, search_secs)) => {
                let success = matches!(outcome, RaceOutcome::Won(_));
                self.record_run(success, search_secs, total_secs).await;
                Ok(RunReport { run: self.run.clone(), outcome, search_secs, total_secs })
            }
            Err(err) => {
                if matches!(err, FleetError::RaceTimeout(_)) {
                    self.record_run(false, total_secs, total_secs).await;
                }
                Err(err)
            }
        }
    }

    async fn execute(&self, abort: &CancellationToken) -> FleetResult<(RaceOutcome, f64)> {
        pow::check_difficulty(self.config.difficulty)?;
        let ranges = partition::partition(self.config.space, self.config.workers)?;

        self.stage_artifact().await?;

        let handles = self.provisioner.provision(self.config.workers).await?;
        *self.handles.lock().unwrap() = handles.clone();
        self.provisioner.wait_ready(&handles, self.config.ready_deadline).await?;
        info!("{}: {} workers ready", self.run, handles.len());

        let assignments = self.channels.channel(ASSIGN_CHANNEL, true).await?;
        let results = self.channels.channel(RESULT_CHANNEL, true).await?;

        let workers: Vec<WorkerId> = (0..self.config.workers).map(WorkerId).collect();
        let work: Vec<WorkAssignment> = workers
            .iter()
            .zip(ranges)
            .map(|(&worker, range)| WorkAssignment {
                worker,
                range,
                difficulty: self.config.difficulty,
                payload: self.config.payload.clone(),
                run: self.run.clone(),
            })
            .collect();

        let coordinator = RaceCoordinator {
            run: self.run.clone(),
            workers,
            channels: self.channels.clone(),
            collect_logs: self.config.collect_logs,
        };
        coordinator.dispatch(&assignments, work).await?;

        let race_started = Instant::now();
        let outcome = coordinator.race(&results, self.config.timeout, abort).await?;
        let race_secs = race_started.elapsed().as_secs_f64();

        // the winner's own clock is the search time; everything else falls
        // back to the race clock
        let search_secs = match &outcome {
            RaceOutcome::Won(result) => result.elapsed_secs,
            _ => race_secs,
        };
        Ok((outcome, search_secs))
    }

    async fn stage_artifact(&self) -> FleetResult<()> {
        let Some(path) = &self.config.artifact else {
            debug!("{}: no artifact to stage", self.run);
            return Ok(());
        };
        let bytes = std::fs::read(path).map_err(|err| {
            FleetError::ProvisioningFailure(format!("read artifact {}: {err}", path.display()))
        })?;
        self.artifacts.upload(WORKER_ARTIFACT, bytes.into()).await
    }

    /// Emergency teardown. Safe to invoke more than once; only the first
    /// call does the work. Every step runs even when an earlier one fails,
    /// and the failures are collected rather than short-circuited.
    pub async fn scram(&self) -> FleetResult<()> {
        if self.scrammed.swap(true, Ordering::SeqCst) {
            debug!("{}: scram already executed", self.run);
            return Ok(());
        }
        info!("{}: scram", self.run);
        let mut failures = Vec::new();

        // stop outstanding searches
        let coordinator = RaceCoordinator {
            run: self.run.clone(),
            workers: (0..self.config.workers).map(WorkerId).collect(),
            channels: self.channels.clone(),
            collect_logs: self.config.collect_logs,
        };
        if let Err(err) = coordinator.broadcast_cancel(None).await {
            error!("{}: scram cancel broadcast: {err}", self.run);
            failures.push(format!("cancel broadcast: {err}"));
        }

        // release the compute
        let handles = self.handles.lock().unwrap().clone();
        if let Err(err) = self.provisioner.terminate(&handles).await {
            error!("{}: scram terminate: {err}", self.run);
            failures.push(format!("terminate: {err}"));
        }

        // drain every channel of the run
        let mut names = vec![ASSIGN_CHANNEL.to_string(), RESULT_CHANNEL.to_string()];
        names.extend((0..self.config.workers).map(|i| cancel_channel(WorkerId(i))));
        for name in names {
            match self.channels.channel(&name, false).await {
                Ok(channel) => {
                    if let Err(err) = channel.purge().await {
                        error!("{}: scram purge {name}: {err}", self.run);
                        failures.push(format!("purge {name}: {err}"));
                    }
                }
                Err(err) => {
                    error!("{}: scram open {name}: {err}", self.run);
                    failures.push(format!("open {name}: {err}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FleetError::PartialTeardownFailure(failures))
        }
    }

    /// The run summary the sizing estimator later queries.
    async fn record_run(&self, success: bool, search_secs: f64, total_secs: f64) {
        let event = serde_json::json!({
            "run": self.run.as_str(),
            "workers": self.config.workers,
            "difficulty": self.config.difficulty,
            "success": success,
            "search_secs": search_secs,
            "total_secs": total_secs,
            "overhead_secs": (total_secs - search_secs).max(0.0),
        });
        if let Err(err) = self.telemetry.append_event(RUN_STREAM, timestamp(), event).await {
            warn!("{}: run summary not recorded: {err}", self.run);
        }
    }
}
