use shared::{
    errors::{FleetError, FleetResult},
    telemetry::{SampleStats, StatsQuery, TelemetryStore},
};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, info};

/// Largest candidate fleet the estimator will consider.
pub const MAX_WORKERS: u32 = 14;

/// Pick a worker count whose statistical upper-bound completion time stays
/// below the target runtime.
#[derive(Debug, Clone)]
pub struct SizingRequest {
    pub target_runtime: f64,
    pub difficulty: u32,
    pub confidence: f64,
    pub minimize_instances: bool,
    pub max_workers: u32,
}

/// Completion-time interval for one candidate count. The upper limit is a
/// one-sided bound at the requested confidence; the lower limit is a fixed
/// three-sigma bound. The asymmetry is deliberate and matches the recorded
/// behaviour of the sizing procedure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceRange {
    pub workers: u32,
    pub lower: f64,
    pub mean: f64,
    pub upper: f64,
}

/// `None` when the sample is empty; a zero-sample statistic must never
/// reach the arithmetic below.
pub fn confidence_range(workers: u32, stats: &SampleStats, confidence: f64) -> Option<ConfidenceRange> {
    if stats.count < 1 {
        return None;
    }
    let z = Normal::new(0.0, 1.0).unwrap().inverse_cdf(confidence);
    let err = stats.stddev / (stats.count as f64).sqrt();
    Some(ConfidenceRange {
        workers,
        lower: (stats.mean - 3.0 * err).max(0.0),
        mean: stats.mean,
        upper: stats.mean + z * err,
    })
}

pub async fn size_fleet(telemetry: &dyn TelemetryStore, request: &SizingRequest) -> FleetResult<u32> {
    let no_viable = || FleetError::NoViableConfiguration {
        target: request.target_runtime,
        difficulty: request.difficulty,
        confidence: request.confidence,
    };

    if request.confidence <= 0.0 || request.confidence >= 1.0 {
        debug!("confidence {} lies outside (0, 1)", request.confidence);
        return Err(no_viable());
    }

    let mut viable: Vec<ConfidenceRange> = Vec::new();
    for workers in 1..=request.max_workers {
        let stats =
            telemetry.query(&StatsQuery::search_secs(request.difficulty, workers)).await?;
        let Some(range) = confidence_range(workers, &stats, request.confidence) else {
            debug!("no samples for {workers} workers at difficulty {}", request.difficulty);
            continue;
        };
        debug!(
            "{workers} workers: mean {:.2}s, upper bound {:.2}s over {} samples",
            range.mean, range.upper, stats.count
        );
        if range.upper < request.target_runtime {
            viable.push(range);
        }
    }

    let chosen = if request.minimize_instances {
        // candidates were scanned in ascending order
        viable.first()
    } else {
        // the upper bound closest to the target while still below it
        viable.iter().max_by(|a, b| a.upper.total_cmp(&b.upper))
    };

    match chosen {
        Some(range) => {
            info!(
                "sized fleet at {} workers (upper bound {:.2}s against target {}s)",
                range.workers, range.upper, request.target_runtime
            );
            Ok(range.workers)
        }
        None => Err(no_viable()),
    }
}
