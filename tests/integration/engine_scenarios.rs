//! End-to-end scheduling and reporting behaviour of the engine
//!
//! All tests run on a paused clock, so intervals and delays are simulated.

use std::sync::Arc;
use std::time::Duration;

use health_monitor::{
    Severity,
    engine::MonitorEngine,
    error::{CollectionError, SchedulerError},
    report::OverallStatus,
    scheduler::SourceState,
};
use pretty_assertions::assert_eq;
use tokio::time::Instant;

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_critical_breach_raises_one_alert() {
    let source = Arc::new(ScriptedSource::new("web-1", 97.0));
    let engine = MonitorEngine::with_specs(vec![spec(source, 1000)]).unwrap();

    let sink = Arc::new(RecordingSink::default());
    engine.subscribe(sink.clone()).await;
    engine.start().await.unwrap();

    let health = wait_for_source(&engine, "web-1", |s| s.cycles == 1).await;
    assert_eq!(health.alerts.len(), 1);
    assert_eq!(engine.current_report().status, OverallStatus::Critical);

    engine.shutdown().await;

    let alerts = sink.alerts();
    assert_eq!(alerts.len(), 1, "one cycle, one breached metric");
    assert_eq!(alerts[0].source_id, "web-1");
    assert_eq!(alerts[0].metric, "cpu");
    assert_eq!(alerts[0].value, 97.0);
    assert_eq!(alerts[0].severity, Severity::Critical);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_timeouts_degrade_only_that_source() {
    let flaky = Arc::new(ScriptedSource::new("flaky", 10.0).with_delay(Duration::from_secs(10)));
    let steady = Arc::new(ScriptedSource::new("steady", 10.0));

    let engine = MonitorEngine::with_specs(vec![
        spec(flaky, 1000).with_timeout(Duration::from_millis(200)),
        spec(steady, 1000),
    ])
    .unwrap();
    engine.start().await.unwrap();

    let flaky = wait_for_source(&engine, "flaky", |s| s.cycles == 2).await;
    assert_eq!(flaky.state, SourceState::Degraded);
    assert_eq!(flaky.staleness, 2);
    assert!(flaky.latest.is_none());
    assert_eq!(
        flaky.last_error,
        Some(CollectionError::Timeout(Duration::from_millis(200)).to_string())
    );

    let report = engine.current_report();
    let steady = report.source("steady").unwrap();
    assert_eq!(steady.state, SourceState::Healthy);
    assert_eq!(steady.staleness, 0);
    assert!(steady.cycles >= 2);
    assert_eq!(report.status, OverallStatus::Degraded);
    assert_eq!(
        report
            .degraded_sources()
            .map(|s| s.source_id.as_str())
            .collect::<Vec<_>>(),
        vec!["flaky"]
    );

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_at_interval_counts_each_cycle_once() {
    let flaky = Arc::new(ScriptedSource::new("flaky", 10.0).with_delay(Duration::from_secs(10)));

    // timeout defaults to the interval
    let engine = MonitorEngine::with_specs(vec![spec(flaky.clone(), 200)]).unwrap();
    engine.start().await.unwrap();

    let health = wait_for_source(&engine, "flaky", |s| s.cycles == 3).await;
    assert_eq!(health.state, SourceState::Degraded);
    assert_eq!(health.staleness, 3);
    assert_eq!(health.overruns, 0);
    assert_eq!(flaky.calls(), 3);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_sample_is_prompt_and_keeps_result() {
    let slow = Arc::new(ScriptedSource::new("slow", 42.0).with_delay(Duration::from_secs(5)));
    let engine = MonitorEngine::with_specs(vec![
        spec(slow.clone(), 1000).with_timeout(Duration::from_secs(10)),
    ])
    .unwrap();
    engine.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.source_state("slow").await, Some(SourceState::Sampling));

    let before = Instant::now();
    engine.stop().await;
    assert_eq!(before.elapsed(), Duration::ZERO, "stop must not wait for the sample");

    let health = wait_for_source(&engine, "slow", |s| s.state == SourceState::Stopped).await;
    assert_eq!(health.cycles, 1);
    assert_eq!(health.latest.as_ref().and_then(|s| s.get("cpu")), Some(42.0));

    // no new cycle is ever started
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(slow.calls(), 1);

    engine.shutdown().await;
    assert_eq!(engine.current_report().source("slow").unwrap().cycles, 1);
}

#[tokio::test(start_paused = true)]
async fn test_sources_keep_independent_cadences() {
    let fast = Arc::new(ScriptedSource::new("fast", 10.0));
    let slow = Arc::new(ScriptedSource::new("slow", 10.0));

    let engine =
        MonitorEngine::with_specs(vec![spec(fast.clone(), 1000), spec(slow.clone(), 3000)])
            .unwrap();
    engine.start().await.unwrap();

    // cycles at t=0, 1000, 2000 for `fast` and t=0 for `slow`
    tokio::time::sleep(Duration::from_millis(2999)).await;
    assert_eq!(fast.calls(), 3);
    assert_eq!(slow.calls(), 1);

    let report = engine.current_report();
    assert_eq!(report.source("fast").unwrap().cycles, 3);
    assert_eq!(report.source("slow").unwrap().cycles, 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_current_report_is_idempotent() {
    let source = Arc::new(ScriptedSource::new("a", 85.0));
    let engine = MonitorEngine::with_specs(vec![spec(source, 1000)]).unwrap();
    engine.start().await.unwrap();

    wait_for_source(&engine, "a", |s| s.cycles == 1).await;

    let first = engine.current_report();
    let second = engine.current_report();
    assert_eq!(first, second);
    assert!(Arc::ptr_eq(&first, &second));

    engine.shutdown().await;
    assert_eq!(engine.current_report(), engine.current_report());
}

#[tokio::test(start_paused = true)]
async fn test_add_and_remove_while_running() {
    let a = Arc::new(ScriptedSource::new("a", 10.0));
    let b = Arc::new(ScriptedSource::new("b", 90.0));

    let engine = MonitorEngine::with_specs(vec![spec(a, 1000)]).unwrap();
    engine.start().await.unwrap();
    wait_for_source(&engine, "a", |s| s.cycles == 1).await;

    engine.add_source(spec(b.clone(), 1000)).await.unwrap();
    assert_eq!(
        engine.add_source(spec(b, 1000)).await,
        Err(SchedulerError::DuplicateSource("b".to_string()))
    );

    wait_for_source(&engine, "b", |s| s.cycles == 1).await;
    assert_eq!(engine.current_report().status, OverallStatus::Warning);
    assert_eq!(engine.source_ids().await, vec!["a", "b"]);

    engine.remove_source("b").await.unwrap();
    let report = engine
        .watch_report()
        .wait_for(|report| report.source("b").is_none())
        .await
        .unwrap()
        .clone();
    assert_eq!(report.status, OverallStatus::Healthy);
    assert_eq!(engine.source_ids().await, vec!["a"]);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(engine.current_report().source("b").is_none());
    assert_eq!(
        engine.remove_source("b").await,
        Err(SchedulerError::UnknownSource("b".to_string()))
    );

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_readd_during_removal_keeps_new_source() {
    let old = Arc::new(ScriptedSource::new("a", 1.0).with_delay(Duration::from_secs(5)));
    let fresh = Arc::new(ScriptedSource::new("a", 2.0));

    let engine = MonitorEngine::with_specs(vec![
        spec(old.clone(), 1000).with_timeout(Duration::from_secs(10)),
    ])
    .unwrap();
    engine.start().await.unwrap();

    // the old actor is mid-sample while it is replaced
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (removed, added) = tokio::join!(
        engine.remove_source("a"),
        engine.add_source(spec(fresh.clone(), 1000))
    );
    removed.unwrap();
    added.unwrap();

    // the old cycle finished and its removal was published, neither touched the new entry
    assert_eq!(old.calls(), 1);
    let health = wait_for_source(&engine, "a", |s| s.cycles >= 2).await;
    assert_eq!(health.latest.as_ref().and_then(|s| s.get("cpu")), Some(2.0));
    assert_eq!(engine.source_ids().await, vec!["a"]);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let report = engine.current_report();
    let health = report.source("a").unwrap();
    assert_eq!(health.state, SourceState::Healthy);
    assert_eq!(health.latest.as_ref().and_then(|s| s.get("cpu")), Some(2.0));
    assert!(fresh.calls() >= 5);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sink_sees_health_changes() {
    let source = Arc::new(
        ScriptedSource::new("a", 10.0).with_script([
            Step::Cpu(10.0),
            Step::Fail(CollectionError::Unreachable("connection refused".to_string())),
            Step::Cpu(10.0),
        ]),
    );
    let engine = MonitorEngine::with_specs(vec![spec(source, 1000)]).unwrap();

    let sink = Arc::new(RecordingSink::default());
    engine.subscribe(sink.clone()).await;
    engine.start().await.unwrap();

    wait_for_source(&engine, "a", |s| s.cycles == 3).await;
    engine.shutdown().await;

    let states: Vec<_> = sink
        .health_changes()
        .iter()
        .map(|report| report.source("a").map(|s| s.state))
        .collect();

    assert_eq!(
        states,
        vec![
            Some(SourceState::Idle),
            Some(SourceState::Healthy),
            Some(SourceState::Degraded),
            Some(SourceState::Healthy),
            Some(SourceState::Stopped),
        ]
    );
    assert!(sink.alerts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_poll_now_runs_an_extra_cycle() {
    let source = Arc::new(ScriptedSource::new("a", 10.0));
    let engine = MonitorEngine::with_specs(vec![spec(source.clone(), 60_000)]).unwrap();
    engine.start().await.unwrap();

    wait_for_source(&engine, "a", |s| s.cycles == 1).await;
    engine.poll_now("a").await.unwrap();
    assert_eq!(source.calls(), 2);

    assert!(engine.poll_now("zzz").await.is_err());
    engine.shutdown().await;
}
