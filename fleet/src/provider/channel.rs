use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use shared::{
    channel::{ChannelProvider, Delivery, MessageChannel},
    errors::FleetResult,
};
use tokio::sync::Notify;
use tracing::trace;

/// How long a received message stays invisible before it returns to the
/// queue for redelivery.
const VISIBILITY: Duration = Duration::from_secs(10);

/// How often a waiting receiver re-checks for lapsed in-flight messages.
const REDELIVERY_TICK: Duration = Duration::from_millis(100);

/// In-process queue fabric. Channels are created on first open and shared
/// by name, so senders and receivers meet without a registration step.
pub struct InMemoryChannels {
    channels: Mutex<HashMap<String, Arc<InMemoryChannel>>>,
    visibility: Duration,
}

impl InMemoryChannels {
    pub fn new() -> Self {
        Self::with_visibility(VISIBILITY)
    }

    pub fn with_visibility(visibility: Duration) -> Self {
        Self { channels: Mutex::new(HashMap::new()), visibility }
    }
}

#[async_trait]
impl ChannelProvider for InMemoryChannels {
    async fn channel(&self, name: &str, ordered: bool) -> FleetResult<Arc<dyn MessageChannel>> {
        let mut guard = self.channels.lock().unwrap();
        let channel = guard
            .entry(name.to_string())
            .or_insert_with(|| {
                trace!("channel `{name}` created (ordered: {ordered})");
                Arc::new(InMemoryChannel::new(name, self.visibility))
            })
            .clone();
        Ok(channel)
    }
}

struct ChannelState {
    queue: VecDeque<Delivery>,
    /// Delivered but unacknowledged, keyed by id, with the instant the
    /// message becomes visible again.
    in_flight: HashMap<u64, (Bytes, Instant)>,
}

pub struct InMemoryChannel {
    name: String,
    state: Mutex<ChannelState>,
    arrival: Notify,
    next_id: AtomicU64,
    visibility: Duration,
}

impl InMemoryChannel {
    fn new(name: &str, visibility: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(ChannelState { queue: VecDeque::new(), in_flight: HashMap::new() }),
            arrival: Notify::new(),
            next_id: AtomicU64::new(0),
            visibility,
        }
    }

    fn try_pop(&self) -> Option<Delivery> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        // lapsed in-flight messages become visible again
        let lapsed: Vec<u64> = state
            .in_flight
            .iter()
            .filter(|(_, (_, visible_at))| *visible_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in lapsed {
            if let Some((payload, _)) = state.in_flight.remove(&id) {
                trace!("{}: redelivering message {id}", self.name);
                state.queue.push_back(Delivery { id, payload });
            }
        }

        let delivery = state.queue.pop_front()?;
        state.in_flight.insert(delivery.id, (delivery.payload.clone(), now + self.visibility));
        Some(delivery)
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, payload: Bytes) -> FleetResult<()> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().queue.push_back(Delivery { id, payload });
        self.arrival.notify_one();
        Ok(())
    }

    async fn receive_one(&self, wait: Duration) -> FleetResult<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_pop() {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let tick = (deadline - now).min(REDELIVERY_TICK);
            let _ = tokio::time::timeout(tick, self.arrival.notified()).await;
        }
    }

    async fn acknowledge(&self, delivery: &Delivery) -> FleetResult<()> {
        // a lapsed delivery may already be back in the queue; acknowledging
        // it again is harmless
        self.state.lock().unwrap().in_flight.remove(&delivery.id);
        Ok(())
    }

    async fn purge(&self) -> FleetResult<()> {
        let mut state = self.state.lock().unwrap();
        let dropped = state.queue.len() + state.in_flight.len();
        state.queue.clear();
        state.in_flight.clear();
        if dropped > 0 {
            trace!("{}: purged {dropped} messages", self.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(provider: &InMemoryChannels, name: &str) -> Arc<dyn MessageChannel> {
        provider.channel(name, true).await.unwrap()
    }

    #[tokio::test]
    async fn acknowledged_messages_are_not_redelivered() {
        let provider = InMemoryChannels::with_visibility(Duration::from_millis(20));
        let channel = open(&provider, "q").await;

        channel.send(Bytes::from_static(b"one")).await.unwrap();
        let delivery = channel.receive_one(Duration::from_millis(100)).await.unwrap().unwrap();
        channel.acknowledge(&delivery).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(channel.receive_one(Duration::from_millis(50)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unacknowledged_messages_come_back() {
        let provider = InMemoryChannels::with_visibility(Duration::from_millis(20));
        let channel = open(&provider, "q").await;

        channel.send(Bytes::from_static(b"one")).await.unwrap();
        let first = channel.receive_one(Duration::from_millis(100)).await.unwrap().unwrap();

        let second = channel.receive_one(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.payload, first.payload);
    }

    #[tokio::test]
    async fn purge_drops_queued_and_in_flight() {
        let provider = InMemoryChannels::with_visibility(Duration::from_millis(20));
        let channel = open(&provider, "q").await;

        channel.send(Bytes::from_static(b"one")).await.unwrap();
        channel.send(Bytes::from_static(b"two")).await.unwrap();
        let _in_flight = channel.receive_one(Duration::from_millis(100)).await.unwrap().unwrap();

        channel.purge().await.unwrap();
        assert!(channel.receive_one(Duration::from_millis(100)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn channels_are_shared_by_name() {
        let provider = InMemoryChannels::new();
        let sender = open(&provider, "shared").await;
        let receiver = open(&provider, "shared").await;

        sender.send(Bytes::from_static(b"hello")).await.unwrap();
        let delivery = receiver.receive_one(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(delivery.payload, Bytes::from_static(b"hello"));
    }
}
