//! Engines built from profiles that talk to agents and cloud status endpoints

use health_monitor::{
    Severity, config::ProfileConfig, engine::MonitorEngine, report::OverallStatus,
    scheduler::SourceState,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_profile_with_agent_and_cloud() {
    let agent = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .and(header("X-MONITORING-SECRET", "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cpu": 55.0,
            "memory": 40.0,
            "disk": 20.0,
            "uptime": 1234.0,
        })))
        .mount(&agent)
        .await;

    let cloud = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/aws"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "instances": 4,
            "load": 97.5,
            "healthy": true,
        })))
        .mount(&cloud)
        .await;

    let profile: ProfileConfig = serde_json::from_value(json!({
        "interval_ms": 60000,
        "thresholds": {
            "cpu": { "warning": 80, "critical": 95 },
            "load": { "warning": 75, "critical": 90 }
        },
        "sources": [
            {
                "type": "RemoteAgent",
                "id": "db-1",
                "endpoint": agent.uri(),
                "token": "s3cret",
                "thresholds": { "cpu": { "warning": 50, "critical": 60 } }
            },
            { "type": "CloudProvider", "provider": "aws", "endpoint": format!("{}/aws", cloud.uri()) }
        ]
    }))
    .unwrap();

    let engine = MonitorEngine::new(&profile).unwrap();
    engine.start().await.unwrap();

    let db = wait_for_source(&engine, "db-1", |s| s.cycles == 1).await;
    assert_eq!(db.state, SourceState::Healthy);
    assert_eq!(db.alerts.len(), 1, "per-source override applies");
    assert_eq!(db.alerts[0].severity, Severity::Warning);
    let sample = db.latest.unwrap();
    assert_eq!(
        sample.metrics.keys().collect::<Vec<_>>(),
        vec!["cpu", "disk", "memory"]
    );
    assert_eq!(db.missing_metrics, vec!["load"]);

    let aws = wait_for_source(&engine, "aws", |s| s.cycles == 1).await;
    assert_eq!(aws.state, SourceState::Healthy);
    assert_eq!(aws.alerts.len(), 1);
    assert_eq!(aws.alerts[0].metric, "load");
    assert_eq!(aws.alerts[0].severity, Severity::Critical);
    let sample = aws.latest.unwrap();
    assert_eq!(sample.get("instances"), Some(4.0));
    assert_eq!(sample.get("health"), Some(1.0));
    assert_eq!(aws.missing_metrics, vec!["cpu"]);

    assert_eq!(engine.current_report().status, OverallStatus::Critical);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_agent_retried_within_one_cycle() {
    let agent = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&agent)
        .await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cpu": 1.0 })))
        .mount(&agent)
        .await;

    let profile: ProfileConfig = serde_json::from_value(json!({
        "interval_ms": 60000,
        "sources": [{
            "type": "RemoteAgent",
            "endpoint": agent.uri(),
            "metrics": ["cpu"],
            "retry": { "max_attempts": 2, "backoff_ms": 10 }
        }]
    }))
    .unwrap();

    let engine = MonitorEngine::new(&profile).unwrap();
    engine.start().await.unwrap();

    let health = wait_for_source(&engine, &agent.uri(), |s| s.cycles == 1).await;
    assert_eq!(health.state, SourceState::Healthy);
    assert_eq!(health.latest.unwrap().get("cpu"), Some(1.0));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_unhealthy_cloud_reports_zero_health() {
    let cloud = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "instances": 0,
            "load": 0.0,
            "healthy": false,
        })))
        .mount(&cloud)
        .await;

    let profile: ProfileConfig = serde_json::from_value(json!({
        "interval_ms": 60000,
        "sources": [{ "type": "CloudProvider", "provider": "gcp", "endpoint": cloud.uri() }]
    }))
    .unwrap();

    let engine = MonitorEngine::new(&profile).unwrap();
    engine.start().await.unwrap();

    let gcp = wait_for_source(&engine, "gcp", |s| s.cycles == 1).await;
    assert_eq!(gcp.kind, health_monitor::sources::SourceKind::CloudProvider);
    assert_eq!(gcp.latest.unwrap().get("health"), Some(0.0));
    assert!(gcp.alerts.is_empty(), "no thresholds configured");

    engine.shutdown().await;
}

#[tokio::test]
async fn test_add_source_from_descriptor() {
    let agent = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cpu": 99.0 })))
        .mount(&agent)
        .await;

    let profile: ProfileConfig = serde_json::from_value(json!({
        "interval_ms": 60000,
        "thresholds": { "cpu": { "warning": 80, "critical": 95 } },
        "sources": [{ "type": "RemoteAgent", "id": "first", "endpoint": agent.uri(), "metrics": ["cpu"] }]
    }))
    .unwrap();

    let engine = MonitorEngine::new(&profile).unwrap();
    engine.start().await.unwrap();

    let mut descriptor = profile.sources[0].clone();
    descriptor.id = Some("second".to_string());
    engine.add_source_config(&descriptor).await.unwrap();

    let second = wait_for_source(&engine, "second", |s| s.cycles == 1).await;
    assert_eq!(second.alerts[0].severity, Severity::Critical);

    let mut broken = descriptor.clone();
    broken.id = Some("third".to_string());
    broken.endpoint = Some("ftp://nowhere".to_string());
    assert!(engine.add_source_config(&broken).await.is_err());

    engine.shutdown().await;
}
