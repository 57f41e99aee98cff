//! Audit log export
//!
//! Streams a range of records as JSON Lines for SIEM shipping, in the flat
//! default shape or an Elastic Common Schema-like shape. Redaction mutates
//! only the exported copy, never stored records; malformed stored payloads
//! pass through as opaque strings rather than failing the export.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::str::FromStr;
use tracing::debug;

use crate::audit::canonical::decode_json;
use crate::audit::record::{format_timestamp, AuditRecord};
use crate::audit::store::AuditStore;
use crate::error::AuditError;

pub const REDACTION_MARKER: &str = "[redacted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Default,
    Ecs,
}

impl FromStr for ExportFormat {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "ecs" => Ok(Self::Ecs),
            other => Err(AuditError::unknown_format(other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub from_id: Option<i64>,
    pub to_id: Option<i64>,
    pub chunk_size: i64,
    pub format: ExportFormat,
    pub include_context: bool,
    pub include_changes: bool,
}

pub struct Exporter<'a> {
    store: &'a AuditStore,
    sensitive_keys: Vec<String>,
}

impl<'a> Exporter<'a> {
    /// `sensitive_keys` are matched case-insensitively as substrings of
    /// nested map keys.
    pub fn new(store: &'a AuditStore, sensitive_keys: &[String]) -> Self {
        Self {
            store,
            sensitive_keys: sensitive_keys.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Stream matching records to `sink`, one JSON object per line. Returns
    /// the number of records written.
    pub async fn export<W: Write>(
        &self,
        options: &ExportOptions,
        sink: &mut W,
    ) -> Result<u64, AuditError> {
        let mut exported = 0u64;
        let mut after = options.from_id.map(|f| f - 1).unwrap_or(0);

        loop {
            let chunk = self
                .store
                .fetch_chunk(after, options.to_id, options.chunk_size)
                .await?;
            if chunk.is_empty() {
                break;
            }

            for record in &chunk {
                after = record.id;

                let line = match options.format {
                    ExportFormat::Default => self.default_line(record, options),
                    ExportFormat::Ecs => self.ecs_line(record, options),
                };

                serde_json::to_writer(&mut *sink, &line)?;
                sink.write_all(b"\n")?;
                exported += 1;
            }

            debug!(exported, "Exported chunk");
        }

        sink.flush()?;
        Ok(exported)
    }

    /// Decode a stored JSON column for export, redacting nested values. A
    /// column that is not valid JSON is passed through as its raw text.
    fn payload_column(&self, raw: &Option<String>) -> Value {
        match raw {
            None => Value::Null,
            Some(text) => match decode_json(text) {
                Some(mut value) => {
                    redact_value(&mut value, &self.sensitive_keys);
                    value
                }
                None => Value::String(text.clone()),
            },
        }
    }

    fn default_line(&self, record: &AuditRecord, options: &ExportOptions) -> Value {
        let mut line = Map::new();
        line.insert("id".to_string(), json!(record.id));
        line.insert(
            "created_at".to_string(),
            json!(format_timestamp(&record.created_at)),
        );
        line.insert("user_id".to_string(), json!(record.user_id));
        line.insert("user_name".to_string(), json!(record.user_name));
        line.insert("user_email".to_string(), json!(record.user_email));
        line.insert("user_username".to_string(), json!(record.user_username));
        line.insert("role_name".to_string(), json!(record.role_name));
        line.insert("action".to_string(), json!(record.action));
        line.insert("auditable_type".to_string(), json!(record.auditable_type));
        line.insert("auditable_id".to_string(), json!(record.auditable_id));
        line.insert("ip_address".to_string(), json!(record.ip_address));
        line.insert(
            "user_agent_hash".to_string(),
            json!(record.user_agent.as_deref().map(sha256_hex)),
        );
        line.insert("url".to_string(), json!(record.url));
        line.insert("route".to_string(), json!(record.route));
        line.insert("method".to_string(), json!(record.method));
        line.insert("status_code".to_string(), json!(record.status_code));
        line.insert("request_id".to_string(), json!(record.request_id));
        line.insert("session_id".to_string(), json!(record.session_id));
        line.insert("duration_ms".to_string(), json!(record.duration_ms));
        line.insert(
            "request_payload_hash".to_string(),
            json!(record.request_payload_hash),
        );
        line.insert("previous_hash".to_string(), json!(record.previous_hash));
        line.insert("hash".to_string(), json!(record.hash));
        line.insert("signature".to_string(), json!(record.signature));

        if options.include_context {
            line.insert("context".to_string(), self.payload_column(&record.context));
        }
        if options.include_changes {
            line.insert(
                "old_values".to_string(),
                self.payload_column(&record.old_values),
            );
            line.insert(
                "new_values".to_string(),
                self.payload_column(&record.new_values),
            );
        }

        Value::Object(line)
    }

    fn ecs_line(&self, record: &AuditRecord, options: &ExportOptions) -> Value {
        let outcome = match record.status_code {
            Some(code) if code >= 400 => "failure",
            _ => "success",
        };

        let mut labels = Map::new();
        labels.insert("auditable_type".to_string(), json!(record.auditable_type));
        labels.insert("auditable_id".to_string(), json!(record.auditable_id));
        labels.insert("session_id".to_string(), json!(record.session_id));
        labels.insert("previous_hash".to_string(), json!(record.previous_hash));
        labels.insert("hash".to_string(), json!(record.hash));
        labels.insert("signature".to_string(), json!(record.signature));
        if options.include_context {
            labels.insert("context".to_string(), self.payload_column(&record.context));
        }
        if options.include_changes {
            labels.insert(
                "old_values".to_string(),
                self.payload_column(&record.old_values),
            );
            labels.insert(
                "new_values".to_string(),
                self.payload_column(&record.new_values),
            );
        }

        json!({
            "@timestamp": format_timestamp(&record.created_at),
            "event": {
                "action": record.action,
                "category": [ecs_category(&record.action)],
                "outcome": outcome,
                "id": record.request_id,
                "duration": record.duration_ms,
            },
            "user": {
                "id": record.user_id,
                "name": record.user_username,
                "full_name": record.user_name,
                "email": record.user_email,
                "roles": record.role_name.as_ref().map(|r| vec![r.clone()]),
            },
            "source": {
                "ip": record.ip_address,
            },
            "http": {
                "request": { "method": record.method },
                "response": { "status_code": record.status_code },
            },
            "url": {
                "original": record.url,
                "path": record.route,
            },
            "user_agent": {
                "hash": record.user_agent.as_deref().map(sha256_hex),
            },
            "labels": Value::Object(labels),
        })
    }
}

/// Keyword heuristic mapping an action name to an ECS event category.
pub fn ecs_category(action: &str) -> &'static str {
    let action = action.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| action.contains(k));

    if contains_any(&["auth", "login", "logout", "otp"]) {
        "authentication"
    } else if contains_any(&["role", "permission", "user"]) {
        "iam"
    } else if contains_any(&["security", "threat"]) {
        "security"
    } else if contains_any(&["maintenance", "setting"]) {
        "configuration"
    } else {
        "configuration"
    }
}

/// Recursively replace values whose key contains a sensitive substring
/// (case-insensitive) with the redaction marker. `keys` must already be
/// lowercased.
pub fn redact_value(value: &mut Value, keys: &[String]) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map.iter_mut() {
                let key = key.to_lowercase();
                if keys.iter().any(|s| key.contains(s)) {
                    *nested = Value::String(REDACTION_MARKER.to_string());
                } else {
                    redact_value(nested, keys);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_value(item, keys);
            }
        }
        _ => {}
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
