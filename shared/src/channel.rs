use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{errors::FleetResult, types::WorkerId};

/// Shared channel the coordinator drops one assignment per worker onto.
pub const ASSIGN_CHANNEL: &str = "assign";
/// Shared channel every worker reports its terminal result to.
pub const RESULT_CHANNEL: &str = "result";

/// Each worker owns its own cancellation channel; a run-ending condition
/// fans one signal out per worker instead of leaving a single message for
/// whichever worker polls first.
pub fn cancel_channel(worker: WorkerId) -> String {
    format!("scram.{worker}")
}

/// A message pulled off a channel. It stays in flight, invisible to other
/// receivers, until acknowledged or its visibility deadline lapses.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: u64,
    pub payload: Bytes,
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, payload: Bytes) -> FleetResult<()>;

    /// Bounded wait for at most one message. `None` after `wait` with
    /// nothing delivered; callers re-poll.
    async fn receive_one(&self, wait: Duration) -> FleetResult<Option<Delivery>>;

    /// Deletes a delivery so it is never redelivered.
    async fn acknowledge(&self, delivery: &Delivery) -> FleetResult<()>;

    /// Drops everything queued and in flight.
    async fn purge(&self) -> FleetResult<()>;
}

#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Opens the named channel, creating it on first use.
    async fn channel(&self, name: &str, ordered: bool) -> FleetResult<Arc<dyn MessageChannel>>;
}
