mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use audit_sentinel::alert::LogAlertSink;
use audit_sentinel::audit::{AuditRecord, AuditStore};
use audit_sentinel::config::ThreatConfig;
use audit_sentinel::threat::{
    threat_middleware, ActorContext, MemoryRiskStore, RiskStore, RiskStoreError, ThreatGuard,
    ThreatScorer,
};

use common::{setup_store, unsigned_writer};

const GOOD_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/140.0";
const CLIENT_IP: &str = "203.0.113.9";

struct Harness {
    app: Router,
    store: AuditStore,
    risk: Arc<MemoryRiskStore>,
}

async fn forbidden() -> StatusCode {
    StatusCode::FORBIDDEN
}

async fn ok() -> StatusCode {
    StatusCode::OK
}

async fn harness(config: ThreatConfig) -> Harness {
    let store = setup_store().await;
    let writer = Arc::new(unsigned_writer(store.clone()));
    let risk = Arc::new(MemoryRiskStore::new());
    let scorer = ThreatScorer::new(config).expect("Failed to build scorer");
    let guard = Arc::new(ThreatGuard::new(
        scorer,
        risk.clone(),
        writer,
        Arc::new(LogAlertSink),
    ));

    let app = Router::new()
        .route("/admin/settings", get(forbidden))
        .route("/ok", get(ok).post(ok))
        .layer(from_fn_with_state(guard, threat_middleware));

    Harness { app, store, risk }
}

fn get_request(uri: &str, user_agent: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .header("x-forwarded-for", CLIENT_IP);
    if let Some(ua) = user_agent {
        builder = builder.header("user-agent", ua);
    }
    builder.body(Body::empty()).unwrap()
}

async fn records(store: &AuditStore) -> Vec<AuditRecord> {
    store.fetch_chunk(0, None, 100).await.unwrap()
}

fn with_action<'a>(records: &'a [AuditRecord], action: &str) -> Vec<&'a AuditRecord> {
    records.iter().filter(|r| r.action == action).collect()
}

fn context_of(record: &AuditRecord) -> Value {
    serde_json::from_str(record.context.as_deref().unwrap()).unwrap()
}

#[tokio::test]
async fn test_high_scoring_request_blocks_immediately() {
    // 403 (5) + admin path (5) + missing user agent (2) = 12 >= threshold 10.
    let h = harness(ThreatConfig::default()).await;

    let response = h
        .app
        .clone()
        .oneshot(get_request("/admin/settings", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let all = records(&h.store).await;

    let request_rows = with_action(&all, "http_request");
    assert_eq!(request_rows.len(), 1);
    let threat = &context_of(request_rows[0])["threat"];
    assert_eq!(threat["points"], Value::from(12));

    let blocked_rows = with_action(&all, "security_blocked");
    assert_eq!(blocked_rows.len(), 1);
    let context = context_of(blocked_rows[0]);
    assert_eq!(context["blocked"], Value::Bool(true));
    assert_eq!(context["score"], Value::from(12));
    assert_eq!(context["threshold"], Value::from(10));
    assert_eq!(context["developer_exempt"], Value::Bool(false));

    assert!(h.risk.is_blocked(&format!("ip:{}", CLIENT_IP)).unwrap());
}

#[tokio::test]
async fn test_existing_block_enforced_before_scoring() {
    let h = harness(ThreatConfig::default()).await;

    h.risk
        .block(&format!("ip:{}", CLIENT_IP), Duration::from_secs(600))
        .unwrap();

    let response = h
        .app
        .clone()
        .oneshot(get_request("/ok", Some(GOOD_UA)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let all = records(&h.store).await;
    let enforced = with_action(&all, "security_block_enforced");
    assert_eq!(enforced.len(), 1);
    assert_eq!(
        context_of(enforced[0])["blocked_enforced"],
        Value::Bool(true)
    );
    // The handler never ran, so no regular request record exists.
    assert!(with_action(&all, "http_request").is_empty());
}

#[tokio::test]
async fn test_clean_request_scores_nothing() {
    let h = harness(ThreatConfig::default()).await;

    let response = h
        .app
        .clone()
        .oneshot(get_request("/ok", Some(GOOD_UA)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let all = records(&h.store).await;
    let request_rows = with_action(&all, "http_request");
    assert_eq!(request_rows.len(), 1);
    assert!(request_rows[0].context.is_none());
    assert_eq!(request_rows[0].status_code, Some(200));
    assert!(with_action(&all, "security_blocked").is_empty());
    assert!(!h.risk.is_blocked(&format!("ip:{}", CLIENT_IP)).unwrap());
}

#[tokio::test]
async fn test_burst_crossing_triggers_block() {
    let config = ThreatConfig {
        burst_requests: 2,
        burst_points: 10,
        risk_threshold: 10,
        ..ThreatConfig::default()
    };
    let h = harness(config).await;

    for _ in 0..2 {
        let response = h
            .app
            .clone()
            .oneshot(get_request("/ok", Some(GOOD_UA)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Third request within the window crosses the burst limit.
    let response = h
        .app
        .clone()
        .oneshot(get_request("/ok", Some(GOOD_UA)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let all = records(&h.store).await;
    let blocked_rows = with_action(&all, "security_blocked");
    assert_eq!(blocked_rows.len(), 1);
    let context = context_of(blocked_rows[0]);
    assert_eq!(context["burst_triggered"], Value::Bool(true));
    assert_eq!(context["blocked"], Value::Bool(true));

    // The block is enforced on the next request.
    let response = h
        .app
        .clone()
        .oneshot(get_request("/ok", Some(GOOD_UA)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_developer_exempt_is_alerted_but_never_blocked() {
    let h = harness(ThreatConfig::default()).await;

    let actor = ActorContext {
        user_id: 9,
        name: Some("Dana Developer".to_string()),
        email: None,
        username: Some("dana".to_string()),
        role: Some("developer".to_string()),
        session_id: Some("sess-9".to_string()),
    };

    let request = Request::builder()
        .uri("/admin/settings")
        .header("x-forwarded-for", CLIENT_IP)
        .extension(actor)
        .body(Body::empty())
        .unwrap();

    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let all = records(&h.store).await;
    let blocked_rows = with_action(&all, "security_blocked");
    assert_eq!(blocked_rows.len(), 1);
    let context = context_of(blocked_rows[0]);
    assert_eq!(context["developer_exempt"], Value::Bool(true));
    assert_eq!(context["blocked"], Value::Bool(false));

    assert!(!h.risk.is_blocked("user:9").unwrap());

    // Subsequent traffic is not short-circuited.
    let response = h
        .app
        .clone()
        .oneshot(get_request("/ok", Some(GOOD_UA)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_authenticated_actor_gets_user_level_block() {
    let h = harness(ThreatConfig::default()).await;

    let actor = ActorContext {
        user_id: 31,
        name: None,
        email: None,
        username: Some("mallory".to_string()),
        role: Some("editor".to_string()),
        session_id: None,
    };

    let request = Request::builder()
        .uri("/admin/settings")
        .header("x-forwarded-for", CLIENT_IP)
        .extension(actor)
        .body(Body::empty())
        .unwrap();

    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The lock lands on the user identity, not the shared IP.
    assert!(h.risk.is_blocked("user:31").unwrap());
    assert!(!h.risk.is_blocked(&format!("ip:{}", CLIENT_IP)).unwrap());
}

struct FailingRiskStore;

impl RiskStore for FailingRiskStore {
    fn add_score(&self, _: &str, _: u32, _: Duration) -> Result<u32, RiskStoreError> {
        Err(RiskStoreError::Unavailable("cache offline".to_string()))
    }

    fn bump_burst(&self, _: &str, _: Duration) -> Result<u32, RiskStoreError> {
        Err(RiskStoreError::Unavailable("cache offline".to_string()))
    }

    fn is_blocked(&self, _: &str) -> Result<bool, RiskStoreError> {
        Err(RiskStoreError::Unavailable("cache offline".to_string()))
    }

    fn block(&self, _: &str, _: Duration) -> Result<(), RiskStoreError> {
        Err(RiskStoreError::Unavailable("cache offline".to_string()))
    }
}

#[tokio::test]
async fn test_risk_store_failure_never_breaks_the_request() {
    let store = setup_store().await;
    let writer = Arc::new(unsigned_writer(store.clone()));
    let scorer = ThreatScorer::new(ThreatConfig::default()).unwrap();
    let guard = Arc::new(ThreatGuard::new(
        scorer,
        Arc::new(FailingRiskStore),
        writer,
        Arc::new(LogAlertSink),
    ));

    let app = Router::new()
        .route("/admin/settings", get(forbidden))
        .layer(from_fn_with_state(guard, threat_middleware));

    // High-scoring request, but the store is down: the request completes and
    // no block decision is made.
    let response = app
        .oneshot(get_request("/admin/settings", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let all = records(&store).await;
    assert_eq!(with_action(&all, "http_request").len(), 1);
    assert!(with_action(&all, "security_blocked").is_empty());
}

#[tokio::test]
async fn test_request_payload_is_hashed_and_inspected() {
    let h = harness(ThreatConfig::default()).await;

    let body = "comment=hello";
    let request = Request::builder()
        .method("POST")
        .uri("/ok")
        .header("x-forwarded-for", CLIENT_IP)
        .header("user-agent", GOOD_UA)
        .header("content-length", body.len().to_string())
        .body(Body::from(body))
        .unwrap();

    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let all = records(&h.store).await;
    let request_rows = with_action(&all, "http_request");
    assert_eq!(request_rows.len(), 1);

    let expected = hex::encode(Sha256::digest(body.as_bytes()));
    assert_eq!(
        request_rows[0].request_payload_hash.as_deref(),
        Some(expected.as_str())
    );
}

#[tokio::test]
async fn test_sql_injection_payload_scores_pattern_points() {
    let config = ThreatConfig {
        auto_block: false,
        ..ThreatConfig::default()
    };
    let h = harness(config).await;

    let body = "q=1 UNION SELECT password FROM users";
    let request = Request::builder()
        .method("POST")
        .uri("/ok")
        .header("x-forwarded-for", CLIENT_IP)
        .header("user-agent", GOOD_UA)
        .header("content-length", body.len().to_string())
        .body(Body::from(body))
        .unwrap();

    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let all = records(&h.store).await;
    let request_rows = with_action(&all, "http_request");
    let threat = &context_of(request_rows[0])["threat"];
    let signals = threat["signals"].as_array().unwrap();
    assert!(signals
        .iter()
        .any(|s| s["signal"].as_str().unwrap().starts_with("request_pattern:")));
}
