use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::future::join_all;
use shared::{
    channel::{ChannelProvider, ASSIGN_CHANNEL, RESULT_CHANNEL},
    errors::{FleetError, FleetResult},
    telemetry::TelemetryStore,
};
use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use worker::runtime::WorkerRuntime;

use super::{Provisioner, WorkerHandle};

const READY_POLL: Duration = Duration::from_millis(100);

struct SpawnedWorker {
    release: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs the fleet on the local machine: every provisioned handle is a
/// worker runtime on this process's own cores.
pub struct LocalCluster {
    channels: Arc<dyn ChannelProvider>,
    telemetry: Arc<dyn TelemetryStore>,
    ready: Arc<AtomicUsize>,
    spawned: Mutex<Vec<SpawnedWorker>>,
    terminations: AtomicUsize,
}

impl LocalCluster {
    pub fn new(channels: Arc<dyn ChannelProvider>, telemetry: Arc<dyn TelemetryStore>) -> Self {
        Self {
            channels,
            telemetry,
            ready: Arc::new(AtomicUsize::new(0)),
            spawned: Mutex::new(Vec::new()),
            terminations: AtomicUsize::new(0),
        }
    }

    /// How many times `terminate` actually tore workers down. A repeated
    /// scram leaves this untouched.
    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provisioner for LocalCluster {
    async fn provision(&self, count: u32) -> FleetResult<Vec<WorkerHandle>> {
        let assignments = self.channels.channel(ASSIGN_CHANNEL, true).await?;
        let results = self.channels.channel(RESULT_CHANNEL, true).await?;

        let cores = num_cpus::get();
        let mut handles = Vec::with_capacity(count as usize);
        for i in 0..count {
            let handle = WorkerHandle(format!("local-{i}"));
            let release = CancellationToken::new();
            let runtime = WorkerRuntime {
                instance: handle.0.clone(),
                core: Some(i as usize % cores),
                channels: self.channels.clone(),
                telemetry: self.telemetry.clone(),
                shutdown: release.clone(),
            };

            let ready = self.ready.clone();
            let assignments = assignments.clone();
            let results = results.clone();
            let instance = handle.0.clone();
            let task = tokio::spawn(async move {
                ready.fetch_add(1, Ordering::SeqCst);
                if let Err(err) = runtime.run(assignments, results).await {
                    error!("{instance}: worker runtime failed: {err}");
                }
            });

            self.spawned.lock().unwrap().push(SpawnedWorker { release, task });
            handles.push(handle);
        }
        info!("provisioned {count} local workers");
        Ok(handles)
    }

    async fn wait_ready(&self, handles: &[WorkerHandle], deadline: Duration) -> FleetResult<()> {
        let give_up = time::Instant::now() + deadline;
        loop {
            let ready = self.ready.load(Ordering::SeqCst);
            if ready >= handles.len() {
                return Ok(());
            }
            if time::Instant::now() >= give_up {
                return Err(FleetError::ProvisioningFailure(format!(
                    "{ready}/{} workers ready within {deadline:?}",
                    handles.len()
                )));
            }
            time::sleep(READY_POLL).await;
        }
    }

    async fn terminate(&self, handles: &[WorkerHandle]) -> FleetResult<()> {
        let spawned: Vec<SpawnedWorker> = {
            let mut guard = self.spawned.lock().unwrap();
            guard.drain(..).collect()
        };
        if spawned.is_empty() {
            return Ok(());
        }
        self.terminations.fetch_add(1, Ordering::SeqCst);

        for worker in &spawned {
            worker.release.cancel();
        }
        let tasks: Vec<JoinHandle<()>> = spawned.into_iter().map(|worker| worker.task).collect();
        for joined in join_all(tasks).await {
            if let Err(err) = joined {
                error!("worker task join: {err}");
            }
        }
        debug!("terminated {} local workers", handles.len());
        Ok(())
    }
}
