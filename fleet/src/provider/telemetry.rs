use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use shared::{
    errors::FleetResult,
    telemetry::{SampleStats, StatsQuery, TelemetryStore, RUN_STREAM},
};
use tracing::trace;

struct Event {
    stream: String,
    payload: Value,
}

/// Keeps every event in memory and aggregates on demand. Stands in for a
/// hosted log/statistics service during local runs and tests.
pub struct LocalTelemetry {
    events: Mutex<Vec<Event>>,
}

impl LocalTelemetry {
    pub fn new() -> Self {
        Self { events: Mutex::new(Vec::new()) }
    }

    /// Payloads recorded on the given stream, oldest first.
    pub fn snapshot(&self, stream: &str) -> Vec<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.stream == stream)
            .map(|event| event.payload.clone())
            .collect()
    }
}

#[async_trait]
impl TelemetryStore for LocalTelemetry {
    async fn append_event(&self, stream: &str, timestamp: i64, payload: Value) -> FleetResult<()> {
        trace!("telemetry {stream} @{timestamp}: {payload}");
        self.events.lock().unwrap().push(Event { stream: stream.to_string(), payload });
        Ok(())
    }

    async fn query(&self, query: &StatsQuery) -> FleetResult<SampleStats> {
        let events = self.events.lock().unwrap();
        let samples: Vec<f64> = events
            .iter()
            .filter(|event| event.stream == RUN_STREAM)
            .filter_map(|event| {
                let payload = &event.payload;
                let matches = payload.get("difficulty")?.as_u64()? == u64::from(query.difficulty)
                    && payload.get("workers")?.as_u64()? == u64::from(query.workers)
                    && payload.get("success")?.as_bool()?;
                if !matches {
                    return None;
                }
                payload.get(query.metric.as_str())?.as_f64()
            })
            .collect();

        let count = samples.len() as u64;
        if count == 0 {
            return Ok(SampleStats::empty());
        }
        let mean = samples.iter().sum::<f64>() / count as f64;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / count as f64;
        Ok(SampleStats { count, mean, stddev: variance.sqrt() })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use shared::telemetry::WORKER_STREAM;

    use super::*;

    #[tokio::test]
    async fn aggregates_successful_runs_only() {
        let telemetry = LocalTelemetry::new();
        for (secs, success) in [(4.0, true), (6.0, true), (99.0, false)] {
            telemetry
                .append_event(
                    RUN_STREAM,
                    0,
                    json!({ "workers": 3, "difficulty": 5, "success": success, "search_secs": secs }),
                )
                .await
                .unwrap();
        }
        // events on other streams never count as samples
        telemetry.append_event(WORKER_STREAM, 0, json!({ "event": "found" })).await.unwrap();

        let stats = telemetry.query(&StatsQuery::search_secs(5, 3)).await.unwrap();
        assert_eq!(stats.count, 2);
        assert!((stats.mean - 5.0).abs() < 1e-9);
        assert!((stats.stddev - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_configurations_report_zero_samples() {
        let telemetry = LocalTelemetry::new();
        let stats = telemetry.query(&StatsQuery::search_secs(9, 3)).await.unwrap();
        assert_eq!(stats, SampleStats::empty());
    }
}
