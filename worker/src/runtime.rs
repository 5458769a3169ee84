use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use core_affinity::CoreId;
use shared::{
    channel::{cancel_channel, ChannelProvider, MessageChannel},
    envelope::{Envelope, MessageKind, ResultMessage, WorkAssignment},
    errors::{FleetError, FleetResult},
    telemetry::{TelemetryStore, WORKER_STREAM},
    timestamp,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::search::{SearchOutcome, SearchTask};

/// How long one bounded receive waits before the loop re-polls.
const RECEIVE_WAIT: Duration = Duration::from_millis(500);

/// One provisioned worker: pulls a single assignment, sweeps it on a pinned
/// search thread while listening for cancellation, and reports a terminal
/// state either way.
pub struct WorkerRuntime {
    pub instance: String,
    pub core: Option<usize>,
    pub channels: Arc<dyn ChannelProvider>,
    pub telemetry: Arc<dyn TelemetryStore>,
    pub shutdown: CancellationToken,
}

impl WorkerRuntime {
    pub async fn run(
        self,
        assignments: Arc<dyn MessageChannel>,
        results: Arc<dyn MessageChannel>,
    ) -> FleetResult<()> {
        let Some(assignment) = self.next_assignment(&assignments).await? else {
            debug!("{}: released before any assignment arrived", self.instance);
            return Ok(());
        };
        self.work(assignment, &results).await
    }

    /// Blocks on the assignment channel until one arrives or the runtime is
    /// released. Consumption is acknowledged so the assignment is never
    /// handed out twice.
    async fn next_assignment(
        &self,
        assignments: &Arc<dyn MessageChannel>,
    ) -> FleetResult<Option<WorkAssignment>> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(None),
                received = assignments.receive_one(RECEIVE_WAIT) => {
                    let Some(delivery) = received? else { continue };
                    assignments.acknowledge(&delivery).await?;
                    match Envelope::from_bytes(&delivery.payload) {
                        Ok(envelope) => match envelope.kind {
                            MessageKind::Assignment(assignment) => return Ok(Some(assignment)),
                            other => {
                                warn!("{}: ignoring {} on the assignment channel", self.instance, other.label());
                            }
                        },
                        Err(err) => error!("{}: dropping undecodable assignment: {err}", self.instance),
                    }
                }
            }
        }
    }

    async fn work(
        &self,
        assignment: WorkAssignment,
        results: &Arc<dyn MessageChannel>,
    ) -> FleetResult<()> {
        let WorkAssignment { worker, range, difficulty, payload, run } = assignment;
        info!("{}: assigned {} as {worker}, difficulty {difficulty}", self.instance, range);

        let cancels = self.channels.channel(&cancel_channel(worker), false).await?;

        let halt = Arc::new(AtomicBool::new(false));
        let cursor = Arc::new(AtomicU64::new(range.start));
        let task = SearchTask {
            worker,
            payload,
            range,
            difficulty,
            halt: halt.clone(),
            cursor: cursor.clone(),
        };

        let (done_tx, mut done_rx) = oneshot::channel();
        let core = self.core;
        std::thread::spawn(move || {
            if let Some(id) = core {
                let _ = core_affinity::set_for_current(CoreId { id });
            }
            let _ = done_tx.send(task.run());
        });

        let mut collect_logs = false;
        let mut released = false;
        let outcome = loop {
            tokio::select! {
                outcome = &mut done_rx => {
                    break outcome
                        .map_err(|_| FleetError::Protocol("search thread dropped its result".to_string()))?;
                }
                _ = self.shutdown.cancelled(), if !released => {
                    // hard release from the provisioner, no log request
                    released = true;
                    halt.store(true, Ordering::Relaxed);
                }
                received = cancels.receive_one(RECEIVE_WAIT) => {
                    let Some(delivery) = received? else { continue };
                    cancels.acknowledge(&delivery).await?;
                    match Envelope::from_bytes(&delivery.payload) {
                        Ok(envelope) => match envelope.kind {
                            MessageKind::Cancel(signal) => {
                                let at = cursor.load(Ordering::Relaxed);
                                info!("{worker}: cancel received for {} at nonce {at}", signal.run);
                                collect_logs |= signal.collect_logs;
                                halt.store(true, Ordering::Relaxed);
                            }
                            other => {
                                warn!("{worker}: ignoring {} on the cancel channel", other.label());
                            }
                        },
                        Err(err) => error!("{worker}: dropping undecodable cancel: {err}"),
                    }
                }
            }
        };

        match outcome {
            SearchOutcome::Found { nonce, digest, leading_zeros, elapsed } => {
                let elapsed_secs = elapsed.as_secs_f64();
                info!("{worker}: golden nonce {nonce} after {elapsed_secs:.3}s");
                let result = ResultMessage {
                    worker,
                    nonce,
                    digest_hex: hex::encode(digest),
                    leading_zeros,
                    elapsed_secs,
                    success: true,
                };
                let envelope = Envelope::new(run.clone(), MessageKind::Result(result));
                results.send(envelope.to_bytes()?).await?;
                self.telemetry
                    .append_event(
                        WORKER_STREAM,
                        timestamp(),
                        serde_json::json!({
                            "event": "found",
                            "run": run.as_str(),
                            "instance": self.instance,
                            "worker": worker.as_u32(),
                            "difficulty": difficulty,
                            "nonce": nonce,
                            "leading_zeros": leading_zeros,
                            "search_secs": elapsed_secs,
                        }),
                    )
                    .await?;
            }
            SearchOutcome::Exhausted { elapsed } => {
                let elapsed_secs = elapsed.as_secs_f64();
                warn!("{worker}: range {range} exhausted with no qualifying nonce");
                let result = ResultMessage::exhausted(worker, elapsed_secs);
                let envelope = Envelope::new(run.clone(), MessageKind::Result(result));
                results.send(envelope.to_bytes()?).await?;
                self.telemetry
                    .append_event(
                        WORKER_STREAM,
                        timestamp(),
                        serde_json::json!({
                            "event": "exhausted",
                            "run": run.as_str(),
                            "instance": self.instance,
                            "worker": worker.as_u32(),
                            "difficulty": difficulty,
                            "search_secs": elapsed_secs,
                        }),
                    )
                    .await?;
            }
            SearchOutcome::Cancelled { last_nonce, elapsed } => {
                debug!("{worker}: stopped at nonce {last_nonce} after {:.3}s", elapsed.as_secs_f64());
                if collect_logs {
                    self.telemetry
                        .append_event(
                            WORKER_STREAM,
                            timestamp(),
                            serde_json::json!({
                                "event": "cancelled",
                                "run": run.as_str(),
                                "instance": self.instance,
                                "worker": worker.as_u32(),
                                "nonce": last_nonce,
                            }),
                        )
                        .await?;
                }
            }
        }

        Ok(())
    }
}
