use std::{collections::HashSet, sync::Arc, time::Duration};

use shared::{
    channel::{cancel_channel, ChannelProvider, MessageChannel},
    envelope::{CancelSignal, Envelope, MessageKind, ResultMessage, WorkAssignment},
    errors::{FleetError, FleetResult},
    types::{RunId, WorkerId},
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long one bounded receive waits before the race loop re-polls.
const RECEIVE_WAIT: Duration = Duration::from_millis(500);

/// Terminal states of one race.
#[derive(Debug)]
pub enum RaceOutcome {
    /// The first qualifying result, accepted as authoritative.
    Won(ResultMessage),
    /// Every worker swept its whole range without a hit.
    Exhausted,
    /// An external abort cancelled the run.
    Aborted,
}

/// Collects the first qualifying result and stops everyone else.
pub struct RaceCoordinator {
    pub run: RunId,
    pub workers: Vec<WorkerId>,
    pub channels: Arc<dyn ChannelProvider>,
    pub collect_logs: bool,
}

impl RaceCoordinator {
    /// One assignment envelope per worker onto the shared dispatch channel.
    pub async fn dispatch(
        &self,
        assignments: &Arc<dyn MessageChannel>,
        work: Vec<WorkAssignment>,
    ) -> FleetResult<()> {
        for assignment in work {
            debug!("{}: dispatching {} to {}", self.run, assignment.range, assignment.worker);
            let envelope = Envelope::new(self.run.clone(), MessageKind::Assignment(assignment));
            assignments.send(envelope.to_bytes()?).await?;
        }
        Ok(())
    }

    /// Runs the race to a terminal state. Whatever that state is, the
    /// cancellation is fanned out before this returns, so no worker keeps
    /// searching for a run that is already over.
    pub async fn race(
        &self,
        results: &Arc<dyn MessageChannel>,
        timeout: Option<Duration>,
        abort: &CancellationToken,
    ) -> FleetResult<RaceOutcome> {
        let deadline = timeout.map(|wait| Instant::now() + wait);
        let mut exhausted: HashSet<WorkerId> = HashSet::new();

        let outcome = loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    warn!("{}: no result before the deadline", self.run);
                    self.broadcast_cancel(None).await?;
                    let wait = timeout.unwrap_or_default();
                    return Err(FleetError::RaceTimeout(wait.as_secs()));
                }
            }

            tokio::select! {
                _ = abort.cancelled() => {
                    warn!("{}: externally aborted", self.run);
                    break RaceOutcome::Aborted;
                }
                received = results.receive_one(RECEIVE_WAIT) => {
                    let Some(delivery) = received? else { continue };
                    // consume the message so it is never redelivered
                    results.acknowledge(&delivery).await?;
                    let envelope = match Envelope::from_bytes(&delivery.payload) {
                        Ok(envelope) => envelope,
                        Err(err) => {
                            error!("{}: dropping undecodable result: {err}", self.run);
                            continue;
                        }
                    };
                    if envelope.run != self.run {
                        debug!("{}: ignoring stale result for {}", self.run, envelope.run);
                        continue;
                    }
                    match envelope.kind {
                        MessageKind::Result(result) if result.success => {
                            info!(
                                "{}: {} wins with nonce {} after {:.3}s",
                                self.run, result.worker, result.nonce, result.elapsed_secs
                            );
                            break RaceOutcome::Won(result);
                        }
                        MessageKind::Result(result) => {
                            debug!("{}: {} swept its whole range", self.run, result.worker);
                            exhausted.insert(result.worker);
                            if exhausted.len() == self.workers.len() {
                                warn!("{}: every range exhausted, no qualifying nonce", self.run);
                                break RaceOutcome::Exhausted;
                            }
                        }
                        other => {
                            warn!("{}: ignoring {} on the result channel", self.run, other.label());
                        }
                    }
                }
            }
        };

        let winner = match &outcome {
            RaceOutcome::Won(result) => Some(result.worker),
            _ => None,
        };
        self.broadcast_cancel(winner).await?;
        Ok(outcome)
    }

    /// True fan-out: one cancel envelope per non-winning worker, each on
    /// that worker's own channel. A single shared message would only stop
    /// whichever worker happened to poll first.
    pub async fn broadcast_cancel(&self, winner: Option<WorkerId>) -> FleetResult<()> {
        let mut notified = 0;
        for &worker in &self.workers {
            if Some(worker) == winner {
                continue;
            }
            let channel = self.channels.channel(&cancel_channel(worker), false).await?;
            let signal = CancelSignal { run: self.run.clone(), collect_logs: self.collect_logs };
            let envelope = Envelope::new(self.run.clone(), MessageKind::Cancel(signal));
            channel.send(envelope.to_bytes()?).await?;
            notified += 1;
        }
        debug!("{}: cancellation fanned out to {notified} workers", self.run);
        Ok(())
    }
}
