use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::FleetResult;

/// Stream receiving one summary event per completed run.
pub const RUN_STREAM: &str = "run";
/// Stream receiving per-worker lifecycle events.
pub const WORKER_STREAM: &str = "worker";

/// Aggregate over the matching samples. `count` of zero means the store has
/// never seen such a run; consumers must reject it, not divide by it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub count: u64,
    pub mean: f64,
    pub stddev: f64,
}

impl SampleStats {
    pub fn empty() -> Self {
        Self { count: 0, mean: 0.0, stddev: 0.0 }
    }
}

/// Typed filter over run summaries: successful runs at this difficulty and
/// worker count, aggregated over the named numeric field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsQuery {
    pub metric: String,
    pub difficulty: u32,
    pub workers: u32,
}

impl StatsQuery {
    pub fn search_secs(difficulty: u32, workers: u32) -> Self {
        Self { metric: "search_secs".to_string(), difficulty, workers }
    }
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn append_event(
        &self,
        stream: &str,
        timestamp: i64,
        payload: serde_json::Value,
    ) -> FleetResult<()>;

    async fn query(&self, query: &StatsQuery) -> FleetResult<SampleStats>;
}
