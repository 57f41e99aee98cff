//! Record canonicalization
//!
//! Deterministically serializes a record into the byte string the chain hash
//! commits to. The field set is enumerated explicitly; `hash` and `signature`
//! are excluded, `previous_hash` is included so the hash commits to the
//! linkage and not just the record body. Absent columns are serialized as
//! explicit nulls so a later-added column cannot retroactively change old
//! hashes.
//!
//! Determinism relies on `serde_json`'s default BTreeMap-backed object map:
//! object keys serialize in lexicographic order at every nesting depth,
//! regardless of insertion order.

use serde_json::{Map, Value};

use crate::audit::record::{format_timestamp, AuditRecord};

/// Decode a stored JSON column. Returns `None` for malformed text; the
/// caller chooses pass-through behavior instead of failing.
pub fn decode_json(raw: &str) -> Option<Value> {
    serde_json::from_str(raw).ok()
}

/// A stored JSON column as a canonical value: the parsed structure when the
/// text is valid JSON, otherwise the raw text embedded as an opaque string.
fn json_column(raw: &Option<String>) -> Value {
    match raw {
        None => Value::Null,
        Some(text) => decode_json(text).unwrap_or_else(|| Value::String(text.clone())),
    }
}

fn opt_str(v: &Option<String>) -> Value {
    v.as_ref()
        .map(|s| Value::String(s.clone()))
        .unwrap_or(Value::Null)
}

fn opt_int(v: &Option<i64>) -> Value {
    v.map(Value::from).unwrap_or(Value::Null)
}

/// Canonical byte string for `record` with its own stored `previous_hash`.
pub fn canonical_payload(record: &AuditRecord) -> String {
    canonical_payload_with_previous(record, record.previous_hash.as_deref())
}

/// Canonical byte string for `record` with an explicit `previous_hash`,
/// used by the chain repairer which re-links each record to its corrected
/// predecessor.
pub fn canonical_payload_with_previous(record: &AuditRecord, previous: Option<&str>) -> String {
    let mut fields = Map::new();
    fields.insert("action".to_string(), Value::String(record.action.clone()));
    fields.insert("auditable_id".to_string(), opt_str(&record.auditable_id));
    fields.insert("auditable_type".to_string(), opt_str(&record.auditable_type));
    fields.insert("context".to_string(), json_column(&record.context));
    fields.insert(
        "created_at".to_string(),
        Value::String(format_timestamp(&record.created_at)),
    );
    fields.insert("duration_ms".to_string(), opt_int(&record.duration_ms));
    fields.insert("ip_address".to_string(), opt_str(&record.ip_address));
    fields.insert("method".to_string(), opt_str(&record.method));
    fields.insert("new_values".to_string(), json_column(&record.new_values));
    fields.insert("old_values".to_string(), json_column(&record.old_values));
    fields.insert(
        "previous_hash".to_string(),
        previous
            .map(|p| Value::String(p.to_string()))
            .unwrap_or(Value::Null),
    );
    fields.insert(
        "request_id".to_string(),
        opt_str(&record.request_id),
    );
    fields.insert(
        "request_payload_hash".to_string(),
        opt_str(&record.request_payload_hash),
    );
    fields.insert("role_name".to_string(), opt_str(&record.role_name));
    fields.insert("route".to_string(), opt_str(&record.route));
    fields.insert("session_id".to_string(), opt_str(&record.session_id));
    fields.insert("status_code".to_string(), opt_int(&record.status_code));
    fields.insert("url".to_string(), opt_str(&record.url));
    fields.insert("user_agent".to_string(), opt_str(&record.user_agent));
    fields.insert("user_email".to_string(), opt_str(&record.user_email));
    fields.insert("user_id".to_string(), opt_int(&record.user_id));
    fields.insert("user_name".to_string(), opt_str(&record.user_name));
    fields.insert("user_username".to_string(), opt_str(&record.user_username));

    // Map serialization cannot fail for the value types constructed above.
    serde_json::to_string(&Value::Object(fields)).unwrap_or_default()
}
