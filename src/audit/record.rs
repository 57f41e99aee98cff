//! Audit record types
//!
//! A strongly-typed row of the `audit_log` table. Records are immutable once
//! hashed; only the chain repairer may rewrite `hash`, `previous_hash` and
//! `signature` when they have drifted from the recomputed canonical value.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuditError;

/// One stored audit record. JSON-bearing columns (`old_values`, `new_values`,
/// `context`) are kept as raw text because stored payloads may predate the
/// current schema or be malformed; decoding is always tolerant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub user_username: Option<String>,
    pub role_name: Option<String>,
    pub action: String,
    pub auditable_type: Option<String>,
    pub auditable_id: Option<String>,
    pub old_values: Option<String>,
    pub new_values: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub url: Option<String>,
    pub route: Option<String>,
    pub method: Option<String>,
    pub status_code: Option<i64>,
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub duration_ms: Option<i64>,
    pub request_payload_hash: Option<String>,
    pub context: Option<String>,
    pub previous_hash: Option<String>,
    pub hash: Option<String>,
    pub signature: Option<String>,
}

/// Partial record handed to the writer. The writer assigns `created_at`,
/// chains it to the last stored hash and persists the result.
#[derive(Debug, Clone, Default)]
pub struct NewAuditRecord {
    pub action: String,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub user_username: Option<String>,
    pub role_name: Option<String>,
    pub auditable_type: Option<String>,
    pub auditable_id: Option<String>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub url: Option<String>,
    pub route: Option<String>,
    pub method: Option<String>,
    pub status_code: Option<i64>,
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub duration_ms: Option<i64>,
    pub request_payload_hash: Option<String>,
    pub context: Option<Value>,
}

impl NewAuditRecord {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Self::default()
        }
    }
}

/// Serialize a timestamp to the single fixed format shared by the storage
/// codec and the canonicalizer: RFC-3339, UTC, microsecond precision.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, AuditError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AuditError::Storage(format!("Invalid stored timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_round_trip() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let formatted = format_timestamp(&ts);
        assert!(formatted.ends_with('Z'));

        let parsed = parse_timestamp(&formatted).unwrap();
        assert_eq!(parsed, ts);
        assert_eq!(format_timestamp(&parsed), formatted);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
    }
}
