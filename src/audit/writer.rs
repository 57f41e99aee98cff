//! Audit writer
//!
//! Appends records to the chain. The read-last-hash-then-insert sequence is a
//! race under concurrent writers, so it runs inside a single serialized
//! critical section owned by this type; there must be exactly one writer per
//! audit stream.

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::audit::canonical::canonical_payload;
use crate::audit::hasher::ChainHasher;
use crate::audit::record::{AuditRecord, NewAuditRecord};
use crate::audit::store::AuditStore;
use crate::error::AuditError;

/// Best-effort notification published after a record is committed, for live
/// dashboards. Not part of the integrity contract.
#[derive(Debug, Clone)]
pub struct ChainEvent {
    pub id: i64,
    pub action: String,
    pub hash: Option<String>,
}

pub struct AuditWriter {
    store: AuditStore,
    hasher: ChainHasher,
    write_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ChainEvent>,
}

impl AuditWriter {
    pub fn new(store: AuditStore, hasher: ChainHasher) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            hasher,
            write_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn store(&self) -> &AuditStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    /// Number of live dashboard subscribers.
    pub fn listeners(&self) -> usize {
        self.events.receiver_count()
    }

    /// Chain and persist one record; returns the assigned id.
    pub async fn append(&self, new: NewAuditRecord) -> Result<i64, AuditError> {
        let _guard = self.write_lock.lock().await;

        let previous_hash = self.store.last_chain_hash().await?;
        let mut record = materialize(new)?;
        record.previous_hash = previous_hash;

        let canonical = canonical_payload(&record);
        let hash = self
            .hasher
            .chain_hash(&canonical, record.previous_hash.as_deref());
        record.signature = self.hasher.sign(&hash);
        record.hash = Some(hash);

        let id = self.store.insert(&record).await?;
        drop(_guard);

        debug!(id, action = %record.action, "Appended audit record");

        // Fire-and-forget; no subscribers is not an error.
        let _ = self.events.send(ChainEvent {
            id,
            action: record.action,
            hash: record.hash,
        });

        Ok(id)
    }
}

/// Canonical JSON text for a value column; `serde_json` maps are
/// BTreeMap-backed so keys serialize sorted.
fn value_column(value: Option<Value>) -> Result<Option<String>, AuditError> {
    value.map(|v| serde_json::to_string(&v)).transpose().map_err(Into::into)
}

fn materialize(new: NewAuditRecord) -> Result<AuditRecord, AuditError> {
    Ok(AuditRecord {
        id: 0,
        created_at: Utc::now(),
        user_id: new.user_id,
        user_name: new.user_name,
        user_email: new.user_email,
        user_username: new.user_username,
        role_name: new.role_name,
        action: new.action,
        auditable_type: new.auditable_type,
        auditable_id: new.auditable_id,
        old_values: value_column(new.old_values)?,
        new_values: value_column(new.new_values)?,
        ip_address: new.ip_address,
        user_agent: new.user_agent,
        url: new.url,
        route: new.route,
        method: new.method,
        status_code: new.status_code,
        request_id: new
            .request_id
            .or_else(|| Some(Uuid::new_v4().to_string())),
        session_id: new.session_id,
        duration_ms: new.duration_ms,
        request_payload_hash: new.request_payload_hash,
        context: value_column(new.context)?,
        previous_hash: None,
        hash: None,
        signature: None,
    })
}
