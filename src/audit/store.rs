//! Audit log storage
//!
//! All database access for the chain tooling goes through this wrapper. The
//! chain only requires ordered, chunked read access keyed by the
//! auto-increment id, one insert path, and one narrow update path used by the
//! repairer.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

use crate::audit::record::{format_timestamp, parse_timestamp, AuditRecord};
use crate::error::AuditError;

const COLUMNS: &str = "id, created_at, user_id, user_name, user_email, user_username, role_name, \
     action, auditable_type, auditable_id, old_values, new_values, ip_address, user_agent, url, \
     route, method, status_code, request_id, session_id, duration_ms, request_payload_hash, \
     context, previous_hash, hash, signature";

#[derive(Clone)]
pub struct AuditStore {
    pool: SqlitePool,
}

impl AuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, AuditError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AuditError::Config(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self { pool })
    }

    /// In-memory database on a single-connection pool. Every SQLite
    /// `:memory:` connection is its own database, so the pool must never
    /// open a second one.
    pub async fn connect_in_memory() -> Result<Self, AuditError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| AuditError::Config(format!("Invalid database URL: {}", e)))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), AuditError> {
        sqlx::query(include_str!("../../migrations/001_audit_log.sql"))
            .execute(&self.pool)
            .await?;

        sqlx::query(include_str!("../../migrations/002_audit_log_indexes.sql"))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Whether the audit table exists. The CLI tools treat a missing schema
    /// as a precondition failure rather than creating it implicitly.
    pub async fn schema_ready(&self) -> Result<bool, AuditError> {
        let row = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'audit_log'")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Hash of the most recently written record, by maximum id.
    pub async fn last_chain_hash(&self) -> Result<Option<String>, AuditError> {
        let row = sqlx::query("SELECT hash FROM audit_log ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>("hash")))
    }

    /// Hash of the record immediately before `id`, used to seed a ranged
    /// verification or rehash run.
    pub async fn hash_before(&self, id: i64) -> Result<Option<String>, AuditError> {
        let row = sqlx::query("SELECT hash FROM audit_log WHERE id < ?1 ORDER BY id DESC LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>("hash")))
    }

    pub async fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let result = sqlx::query(
            "INSERT INTO audit_log (created_at, user_id, user_name, user_email, user_username, \
             role_name, action, auditable_type, auditable_id, old_values, new_values, ip_address, \
             user_agent, url, route, method, status_code, request_id, session_id, duration_ms, \
             request_payload_hash, context, previous_hash, hash, signature) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
             ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
        )
        .bind(format_timestamp(&record.created_at))
        .bind(record.user_id)
        .bind(&record.user_name)
        .bind(&record.user_email)
        .bind(&record.user_username)
        .bind(&record.role_name)
        .bind(&record.action)
        .bind(&record.auditable_type)
        .bind(&record.auditable_id)
        .bind(&record.old_values)
        .bind(&record.new_values)
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .bind(&record.url)
        .bind(&record.route)
        .bind(&record.method)
        .bind(record.status_code)
        .bind(&record.request_id)
        .bind(&record.session_id)
        .bind(record.duration_ms)
        .bind(&record.request_payload_hash)
        .bind(&record.context)
        .bind(&record.previous_hash)
        .bind(&record.hash)
        .bind(&record.signature)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Fetch the next chunk of records with `id > after` (and `id <= to` when
    /// bounded), in ascending id order.
    pub async fn fetch_chunk(
        &self,
        after: i64,
        to: Option<i64>,
        limit: i64,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let rows = match to {
            Some(to_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM audit_log WHERE id > ?1 AND id <= ?2 ORDER BY id ASC LIMIT ?3",
                    COLUMNS
                ))
                .bind(after)
                .bind(to_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM audit_log WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
                    COLUMNS
                ))
                .bind(after)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(record_from_row).collect()
    }

    pub async fn get(&self, id: i64) -> Result<Option<AuditRecord>, AuditError> {
        let row = sqlx::query(&format!("SELECT {} FROM audit_log WHERE id = ?1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    pub async fn count(&self) -> Result<i64, AuditError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM audit_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Rewrite only the chain columns of one record. Everything else is
    /// immutable once hashed.
    pub async fn update_chain_fields(
        &self,
        id: i64,
        previous_hash: Option<&str>,
        hash: &str,
        signature: Option<&str>,
    ) -> Result<(), AuditError> {
        sqlx::query("UPDATE audit_log SET previous_hash = ?1, hash = ?2, signature = ?3 WHERE id = ?4")
            .bind(previous_hash)
            .bind(hash)
            .bind(signature)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<AuditRecord, AuditError> {
    let created_at: String = row.get("created_at");
    Ok(AuditRecord {
        id: row.get("id"),
        created_at: parse_timestamp(&created_at)?,
        user_id: row.get("user_id"),
        user_name: row.get("user_name"),
        user_email: row.get("user_email"),
        user_username: row.get("user_username"),
        role_name: row.get("role_name"),
        action: row.get("action"),
        auditable_type: row.get("auditable_type"),
        auditable_id: row.get("auditable_id"),
        old_values: row.get("old_values"),
        new_values: row.get("new_values"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        url: row.get("url"),
        route: row.get("route"),
        method: row.get("method"),
        status_code: row.get("status_code"),
        request_id: row.get("request_id"),
        session_id: row.get("session_id"),
        duration_ms: row.get("duration_ms"),
        request_payload_hash: row.get("request_payload_hash"),
        context: row.get("context"),
        previous_hash: row.get("previous_hash"),
        hash: row.get("hash"),
        signature: row.get("signature"),
    })
}
