use serde_json::json;

use audit_sentinel::audit::{AuditStore, AuditWriter, ChainHasher, NewAuditRecord};
use audit_sentinel::config::SignatureConfig;

/// Setup an in-memory SQLite database for testing
pub async fn setup_store() -> AuditStore {
    let store = AuditStore::connect_in_memory()
        .await
        .expect("Failed to create test database");
    store.run_migrations().await.expect("Failed to run migrations");
    store
}

pub fn unsigned_writer(store: AuditStore) -> AuditWriter {
    AuditWriter::new(store, ChainHasher::unsigned())
}

pub fn signed_config() -> SignatureConfig {
    SignatureConfig {
        enabled: true,
        secret: "integration-test-secret".to_string(),
        algo: "sha256".to_string(),
    }
}

pub fn signed_writer(store: AuditStore) -> AuditWriter {
    let hasher = ChainHasher::new(&signed_config()).expect("Failed to build signed hasher");
    AuditWriter::new(store, hasher)
}

/// A representative admin-panel event with actor, network metadata and a
/// nested context payload.
pub fn sample_record(action: &str, seq: i64) -> NewAuditRecord {
    NewAuditRecord {
        action: action.to_string(),
        user_id: Some(7),
        user_name: Some("Alice Admin".to_string()),
        user_email: Some("alice@example.com".to_string()),
        user_username: Some("alice".to_string()),
        role_name: Some("admin".to_string()),
        auditable_type: Some("setting".to_string()),
        auditable_id: Some(seq.to_string()),
        old_values: Some(json!({ "enabled": false })),
        new_values: Some(json!({ "enabled": true })),
        ip_address: Some("203.0.113.9".to_string()),
        user_agent: Some("Mozilla/5.0 (X11; Linux x86_64)".to_string()),
        url: Some(format!("/admin/settings/{}", seq)),
        route: Some("admin.settings.update".to_string()),
        method: Some("POST".to_string()),
        status_code: Some(200),
        session_id: Some("sess-1".to_string()),
        duration_ms: Some(12),
        context: Some(json!({ "query": { "page": seq }, "source": "panel" })),
        ..NewAuditRecord::default()
    }
}

/// Write a short chain of records and return their ids.
pub async fn seed_chain(writer: &AuditWriter, count: i64) -> Vec<i64> {
    let mut ids = Vec::new();
    for seq in 1..=count {
        let id = writer
            .append(sample_record("settings_updated", seq))
            .await
            .expect("Failed to append record");
        ids.push(id);
    }
    ids
}
