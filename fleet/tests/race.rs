use std::{sync::Arc, time::Duration};

use fleet::{
    config::RunConfig,
    coordinator::{RaceCoordinator, RaceOutcome},
    lifecycle::FleetManager,
    provider::{
        artifact::LocalArtifacts, channel::InMemoryChannels, compute::LocalCluster,
        telemetry::LocalTelemetry,
    },
};
use shared::{
    channel::{cancel_channel, ChannelProvider, RESULT_CHANNEL},
    envelope::{Envelope, MessageKind, ResultMessage},
    errors::FleetError,
    telemetry::{StatsQuery, TelemetryStore, RUN_STREAM, WORKER_STREAM},
    types::{RunId, WorkerId},
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn config(workers: u32, difficulty: u32, space: u64) -> RunConfig {
    let mut config = RunConfig::new(workers, difficulty, "blockdata".to_string(), space);
    config.ready_deadline = Duration::from_secs(5);
    config
}

struct Rig {
    telemetry: Arc<LocalTelemetry>,
    cluster: Arc<LocalCluster>,
    artifacts: Arc<LocalArtifacts>,
    manager: FleetManager,
}

fn rig(config: RunConfig) -> Rig {
    let channels = Arc::new(InMemoryChannels::new());
    let telemetry = Arc::new(LocalTelemetry::new());
    let cluster = Arc::new(LocalCluster::new(channels.clone(), telemetry.clone()));
    let artifacts = Arc::new(LocalArtifacts::new());
    let manager = FleetManager::new(
        config,
        cluster.clone(),
        channels,
        telemetry.clone(),
        artifacts.clone(),
    );
    Rig { telemetry, cluster, artifacts, manager }
}

#[tokio::test(flavor = "multi_thread")]
async fn first_qualifying_worker_wins() {
    let r = rig(config(4, 0, 1 << 20));

    let report = r.manager.run(&CancellationToken::new()).await.unwrap();

    match &report.outcome {
        RaceOutcome::Won(result) => {
            assert!(result.success);
            // at difficulty 0 a worker hits on its very first nonce, so the
            // winning value is one of the four range starts
            assert_eq!(result.nonce % (1u64 << 18), 0);
            assert!(!result.digest_hex.is_empty());
        }
        other => panic!("expected a win, got {other:?}"),
    }
    assert_eq!(r.cluster.terminations(), 1);

    // the run summary feeds the sizing estimator
    let stats = r.telemetry.query(&StatsQuery::search_secs(0, 4)).await.unwrap();
    assert_eq!(stats.count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_reaches_every_loser() {
    let channels: Arc<dyn ChannelProvider> = Arc::new(InMemoryChannels::new());
    let run = RunId("run-race".to_string());
    let workers: Vec<WorkerId> = (0..4).map(WorkerId).collect();

    let results = channels.channel(RESULT_CHANNEL, true).await.unwrap();

    // three losers block on their own cancel channels
    let mut observers = vec![];
    for &worker in &workers[..3] {
        let channel = channels.channel(&cancel_channel(worker), false).await.unwrap();
        observers.push(tokio::spawn(async move {
            loop {
                if let Some(delivery) =
                    channel.receive_one(Duration::from_millis(200)).await.unwrap()
                {
                    channel.acknowledge(&delivery).await.unwrap();
                    let envelope = Envelope::from_bytes(&delivery.payload).unwrap();
                    match envelope.kind {
                        MessageKind::Cancel(signal) => return signal.run,
                        other => panic!("unexpected {} on a cancel channel", other.label()),
                    }
                }
            }
        }));
    }

    // the fourth worker holds the only qualifying nonce
    let winner_results = results.clone();
    let winner_run = run.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let result = ResultMessage {
            worker: WorkerId(3),
            nonce: 77,
            digest_hex: "00ff".to_string(),
            leading_zeros: 8,
            elapsed_secs: 0.1,
            success: true,
        };
        let envelope = Envelope::new(winner_run, MessageKind::Result(result));
        winner_results.send(envelope.to_bytes().unwrap()).await.unwrap();
    });

    let coordinator = RaceCoordinator {
        run: run.clone(),
        workers,
        channels: channels.clone(),
        collect_logs: false,
    };
    let outcome =
        coordinator.race(&results, None, &CancellationToken::new()).await.unwrap();
    match outcome {
        RaceOutcome::Won(result) => assert_eq!(result.worker, WorkerId(3)),
        other => panic!("expected a win, got {other:?}"),
    }

    // every loser observed the cancellation before the run ends
    for observer in observers {
        let observed = timeout(Duration::from_secs(5), observer)
            .await
            .expect("cancel never observed")
            .unwrap();
        assert_eq!(observed, run);
    }

    // the winner's channel stays quiet
    let winner_channel = channels.channel(&cancel_channel(WorkerId(3)), false).await.unwrap();
    assert!(winner_channel.receive_one(Duration::from_millis(100)).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_aborts_and_scram_is_idempotent() {
    let mut cfg = config(2, 256, 1 << 40);
    cfg.timeout = Some(Duration::from_secs(1));
    let r = rig(cfg);

    let err = r.manager.run(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, FleetError::RaceTimeout(1)));
    assert_eq!(r.cluster.terminations(), 1);

    // a second scram is a no-op
    r.manager.scram().await.unwrap();
    assert_eq!(r.cluster.terminations(), 1);

    // the timed-out run is recorded, but never as a usable sample
    let summaries = r.telemetry.snapshot(RUN_STREAM);
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0]["success"], false);
    let stats = r.telemetry.query(&StatsQuery::search_secs(256, 2)).await.unwrap();
    assert_eq!(stats.count, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_ranges_end_the_run_without_a_winner() {
    let artifact = std::env::temp_dir().join("fleet-race-test-artifact");
    std::fs::write(&artifact, b"worker executable stand-in").unwrap();

    let mut cfg = config(2, 250, 64);
    cfg.artifact = Some(artifact);
    let r = rig(cfg);

    let report = r.manager.run(&CancellationToken::new()).await.unwrap();

    assert!(matches!(report.outcome, RaceOutcome::Exhausted));
    // both workers reported the miss explicitly
    let events = r.telemetry.snapshot(WORKER_STREAM);
    assert_eq!(events.iter().filter(|e| e["event"] == "exhausted").count(), 2);
    // the executable was staged before provisioning
    assert_eq!(r.artifacts.staged_size("worker"), Some(26));
}

#[tokio::test(flavor = "multi_thread")]
async fn external_abort_funnels_into_teardown() {
    let mut cfg = config(2, 256, 1 << 40);
    cfg.collect_logs = true;
    let r = rig(cfg);

    let abort = CancellationToken::new();
    let trigger = abort.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let report = r.manager.run(&abort).await.unwrap();

    assert!(matches!(report.outcome, RaceOutcome::Aborted));
    assert_eq!(r.cluster.terminations(), 1);
}
