//! Opening the push channel over HTTP against a mock server.

use std::collections::BTreeSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use futures::StreamExt;
use pulse_auth::{HttpAuthApi, SessionConfig, SessionManager, TokenStore};
use pulse_core::{Session, Tier, TransportError, UserId, now_ms};
use pulse_http::{PipelineConfig, PipelineError, RequestPipeline};
use pulse_settings::{ApiSettings, StreamSettings};
use pulse_stream::{PipelineConnector, StreamConnector, StreamEvent, decode_event};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn connector(server: &MockServer, session: Option<Session>) -> PipelineConnector {
    let api = ApiSettings {
        base_url: server.uri(),
        request_timeout_ms: 2_000,
        ..ApiSettings::default()
    };
    let store = Arc::new(TokenStore::new());
    if let Some(session) = session {
        store.set(session);
    }
    let sessions = SessionManager::new(
        Arc::new(HttpAuthApi::new(&api).unwrap()),
        store,
        SessionConfig::default(),
    );
    let pipeline = RequestPipeline::from_settings(
        sessions,
        PipelineConfig {
            api,
            proactive_refresh: false,
        },
    )
    .unwrap();
    PipelineConnector::new(pipeline, StreamSettings::default())
}

fn topics(tickers: &[&str]) -> BTreeSet<String> {
    tickers.iter().map(|t| (*t).to_string()).collect()
}

const BODY: &str = "event: price_update\n\
data: {\"ticker\":\"AAPL\",\"price\":190.1,\"changePercent\":0.5,\"timestamp\":\"2026-10-18T14:30:00Z\"}\n\
\n\
event: heartbeat\n\
data: {}\n\
\n\
event: subscription_error\n\
data: {\"ticker\":\"ZZZZ\",\"message\":\"unknown symbol\"}\n\
\n";

#[tokio::test]
async fn opens_authorized_channel_and_parses_events() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream/prices"))
        .and(query_param("tickers", "AAPL,ZZZZ"))
        .and(header("authorization", "Bearer a1"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let session = Session {
        access_token: "a1".into(),
        refresh_token: "r1".into(),
        expires_at: now_ms() + 600_000,
        user_id: UserId::from("u1"),
        tier: Tier::Free,
    };
    let connector = connector(&server, Some(session)).await;
    let stream = connector.connect(&topics(&["AAPL", "ZZZZ"])).await.unwrap();

    let events: Vec<StreamEvent> = stream
        .filter_map(|item| async move { decode_event(&item.unwrap()) })
        .collect()
        .await;

    assert_eq!(events.len(), 2);
    assert_matches!(&events[0], StreamEvent::Price(p) if p.ticker == "AAPL");
    assert_matches!(&events[1], StreamEvent::TickerError(e) if e.ticker() == "ZZZZ");
}

#[tokio::test]
async fn rejects_non_event_stream_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream/prices"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .mount(&server)
        .await;

    let connector = connector(&server, None).await;
    let Err(err) = connector.connect(&topics(&["AAPL"])).await else {
        panic!("expected a protocol error");
    };
    assert_matches!(err, PipelineError::Transport(TransportError::Protocol(_)));
}

#[tokio::test]
async fn client_error_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream/prices"))
        .respond_with(ResponseTemplate::new(400).set_body_string("too many tickers"))
        .mount(&server)
        .await;

    let connector = connector(&server, None).await;
    let Err(err) = connector.connect(&topics(&["AAPL"])).await else {
        panic!("expected a status error");
    };
    assert_matches!(err, PipelineError::Status { status: 400, ref body } if body == "too many tickers");
}

#[tokio::test]
async fn server_error_is_a_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream/prices"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let connector = connector(&server, None).await;
    let Err(err) = connector.connect(&topics(&["AAPL"])).await else {
        panic!("expected a server error");
    };
    assert_matches!(
        err,
        PipelineError::Transport(TransportError::Server { status: 503, .. })
    );
    assert!(!err.is_session_expired());
}
