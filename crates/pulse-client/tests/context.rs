//! End-to-end wiring against a mock API.

use std::time::Duration;

use pulse_auth::{Credentials, SessionFile, SessionState};
use pulse_client::PulseContext;
use pulse_core::{ConsumerId, Session, Tier, UserId, now_ms};
use pulse_settings::{ApiSettings, AuthSettings, PulseSettings};
use pulse_stream::{ConnectionState, Delivery};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NAMESPACE: &str = "pulse.test";

fn settings(server: &MockServer, dir: &TempDir) -> PulseSettings {
    PulseSettings {
        api: ApiSettings {
            base_url: server.uri(),
            request_timeout_ms: 2_000,
            ..ApiSettings::default()
        },
        auth: AuthSettings {
            storage_path: Some(dir.path().join("auth.json").to_string_lossy().into_owned()),
            namespace: NAMESPACE.into(),
            ..AuthSettings::default()
        },
        ..PulseSettings::default()
    }
}

fn mirror(dir: &TempDir) -> SessionFile {
    SessionFile::new(dir.path().join("auth.json"), NAMESPACE)
}

fn session(access: &str) -> Session {
    Session {
        access_token: access.into(),
        refresh_token: format!("{access}-r"),
        expires_at: now_ms() + 600_000,
        user_id: UserId::from("u1"),
        tier: Tier::Pro,
    }
}

#[tokio::test]
async fn restores_persisted_session() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mirror(&dir).save(&session("a1")).unwrap();

    let ctx = PulseContext::from_settings(settings(&server, &dir)).unwrap();
    assert_eq!(ctx.sessions().state(), SessionState::Authenticated);
    assert_eq!(ctx.sessions().current().unwrap().access_token, "a1");
    assert_eq!(ctx.multiplexer().snapshot().state, ConnectionState::Idle);
    ctx.shutdown().await;
}

#[tokio::test]
async fn starts_anonymous_without_persisted_session() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let ctx = PulseContext::from_settings(settings(&server, &dir)).unwrap();
    assert_eq!(ctx.sessions().state(), SessionState::Anonymous);
    assert!(ctx.sessions().current().is_none());
    assert_eq!(ctx.multiplexer().consumer_count(), 0);
    ctx.shutdown().await;
}

#[tokio::test]
async fn login_after_expiry_reopens_push_channel() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mirror(&dir).save(&session("a1")).unwrap();

    Mock::given(method("GET"))
        .and(path("/stream/prices"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a2",
            "refresh_token": "a2-r",
            "expires_in": 900,
            "user_id": "u1",
            "tier": "pro"
        })))
        .mount(&server)
        .await;
    let body = "event: price_update\n\
data: {\"ticker\":\"AAPL\",\"price\":190.5,\"changePercent\":0.1,\"timestamp\":\"2026-10-18T14:30:00Z\"}\n\n";
    Mock::given(method("GET"))
        .and(path("/stream/prices"))
        .and(header("authorization", "Bearer a2"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let ctx = PulseContext::from_settings(settings(&server, &dir)).unwrap();
    let mut handle = ctx
        .multiplexer()
        .subscribe(ConsumerId::from("cli"), ["AAPL"])
        .unwrap();

    let mut status = ctx.multiplexer().status();
    let _ = tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| s.state == ConnectionState::Offline),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(ctx.sessions().state(), SessionState::Expired);
    assert!(mirror(&dir).load().is_none());

    let _ = ctx
        .sessions()
        .login(&Credentials::new("me@example.com", "hunter2"))
        .await
        .unwrap();

    let delivery = tokio::time::timeout(Duration::from_secs(10), handle.recv())
        .await
        .unwrap();
    match delivery {
        Some(Delivery::Price(update)) => {
            assert_eq!(update.ticker, "AAPL");
            assert!((update.price - 190.5).abs() < f64::EPSILON);
        }
        other => panic!("expected a price, got {other:?}"),
    }
    assert_eq!(mirror(&dir).load().unwrap().access_token, "a2");

    ctx.shutdown().await;
    assert_eq!(ctx.multiplexer().snapshot().state, ConnectionState::Closed);
}
