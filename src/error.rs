use thiserror::Error;

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(format!("Database error: {}", err))
    }
}

impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        Self::Export(format!("I/O error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Export error: {0}")]
    Export(String),
}

impl AuditError {
    pub fn missing_schema(table: &str) -> Self {
        Self::Precondition(format!(
            "Table '{}' does not exist; run migrations before using the audit tooling",
            table
        ))
    }

    pub fn unknown_format(format: &str) -> Self {
        Self::Precondition(format!(
            "Unknown export format: '{}'. Expected 'default' or 'ecs'",
            format
        ))
    }

    pub fn unknown_signature_algo(algo: &str) -> Self {
        Self::Config(format!(
            "Unknown signature algorithm: '{}'. Expected 'sha256' or 'sha512'",
            algo
        ))
    }
}
