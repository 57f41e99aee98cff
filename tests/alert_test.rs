mod common;

use chrono::Utc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use audit_sentinel::alert::{SecurityAlert, WebhookAlertSink};
use audit_sentinel::threat::SignalHit;

use common::{sample_record, setup_store, unsigned_writer};

fn sample_alert() -> SecurityAlert {
    SecurityAlert {
        identity: "ip:203.0.113.9".to_string(),
        ip: "203.0.113.9".to_string(),
        user_id: None,
        score: 12,
        threshold: 10,
        signals: vec![
            SignalHit {
                signal: "status_403".to_string(),
                points: 5,
            },
            SignalHit {
                signal: "admin_path".to_string(),
                points: 5,
            },
            SignalHit {
                signal: "missing_user_agent".to_string(),
                points: 2,
            },
        ],
        burst_triggered: false,
        blocked: true,
        developer_exempt: false,
        url: "/admin/settings".to_string(),
        occurred_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_webhook_sink_posts_alert_payload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/security"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sink = WebhookAlertSink::new(format!("{}/hooks/security", server.uri()));
    sink.send(&sample_alert()).await.unwrap();

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = received[0].body_json().unwrap();
    assert_eq!(body["score"], serde_json::json!(12));
    assert_eq!(body["blocked"], serde_json::json!(true));
    assert_eq!(body["signals"][0]["signal"], serde_json::json!("status_403"));
}

#[tokio::test]
async fn test_webhook_sink_surfaces_delivery_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let sink = WebhookAlertSink::new(server.uri());
    assert!(sink.send(&sample_alert()).await.is_err());
}

#[tokio::test]
async fn test_writer_publishes_chain_events_for_dashboards() {
    let store = setup_store().await;
    let writer = unsigned_writer(store);

    let mut events = writer.subscribe();
    let id = writer
        .append(sample_record("maintenance_enabled", 1))
        .await
        .unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.id, id);
    assert_eq!(event.action, "maintenance_enabled");
    assert!(event.hash.is_some());
}
