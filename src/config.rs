//! Runtime configuration
//!
//! A single strongly-typed configuration struct, populated once at startup
//! from environment variables with an optional TOML overlay file, and passed
//! by reference into the chain tooling and the threat scorer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;

use crate::error::AuditError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub alert_webhook_url: Option<String>,
    #[serde(default)]
    pub signature: SignatureConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub threat: ThreatConfig,
}

/// HMAC signature layer over the chain hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    pub enabled: bool,
    pub secret: String,
    /// Digest algorithm for the HMAC: "sha256" (default) or "sha512".
    pub algo: String,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: String::new(),
            algo: "sha256".to_string(),
        }
    }
}

/// Default chunk sizes for the chunked chain operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub verify_chunk: i64,
    pub rehash_chunk: i64,
    pub export_chunk: i64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            verify_chunk: 500,
            rehash_chunk: 500,
            export_chunk: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Case-insensitive substrings; any nested key containing one of these
    /// has its value replaced with the redaction marker on export.
    pub sensitive_keys: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sensitive_keys: vec![
                "password".to_string(),
                "token".to_string(),
                "secret".to_string(),
                "api_key".to_string(),
                "authorization".to_string(),
            ],
        }
    }
}

/// Threat detection tuning. All point weights and pattern lists are
/// configurable; regexes are kept as strings here and compiled once when the
/// scorer is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatConfig {
    pub enabled: bool,
    pub risk_threshold: u32,
    pub risk_decay_minutes: u64,
    pub burst_requests: u32,
    pub burst_window_seconds: u64,
    pub auto_block: bool,
    pub user_block_minutes: u64,
    pub ip_block_minutes: u64,

    /// Points per response status code, keyed by the code as a string.
    pub status_points: HashMap<String, u32>,
    pub suspicious_methods: Vec<String>,
    pub suspicious_method_points: u32,
    pub min_user_agent_len: usize,
    pub missing_user_agent_points: u32,
    pub user_agent_patterns: Vec<String>,
    pub user_agent_pattern_points: u32,
    pub max_query_len: usize,
    pub long_query_points: u32,
    pub max_payload_kb: usize,
    pub large_payload_points: u32,
    pub max_forwarded_hops: usize,
    pub forwarded_chain_points: u32,
    pub request_patterns: Vec<String>,
    pub request_pattern_points: u32,
    pub admin_path_prefix: String,
    pub admin_path_points: u32,
    pub auth_path_points: u32,
    pub burst_points: u32,

    /// Roles that are scored and alerted on but never blocked.
    pub exempt_roles: Vec<String>,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        let mut status_points = HashMap::new();
        status_points.insert("400".to_string(), 2);
        status_points.insert("401".to_string(), 3);
        status_points.insert("403".to_string(), 5);
        status_points.insert("404".to_string(), 1);
        status_points.insert("422".to_string(), 1);
        status_points.insert("429".to_string(), 3);
        status_points.insert("500".to_string(), 2);

        Self {
            enabled: true,
            risk_threshold: 10,
            risk_decay_minutes: 30,
            burst_requests: 60,
            burst_window_seconds: 60,
            auto_block: true,
            user_block_minutes: 15,
            ip_block_minutes: 60,
            status_points,
            suspicious_methods: vec!["TRACE".to_string(), "CONNECT".to_string()],
            suspicious_method_points: 3,
            min_user_agent_len: 8,
            missing_user_agent_points: 2,
            user_agent_patterns: vec![
                r"(?i)sqlmap".to_string(),
                r"(?i)nikto".to_string(),
                r"(?i)nmap".to_string(),
                r"(?i)curl/".to_string(),
                r"(?i)python-requests".to_string(),
            ],
            user_agent_pattern_points: 3,
            max_query_len: 2048,
            long_query_points: 2,
            max_payload_kb: 512,
            large_payload_points: 2,
            max_forwarded_hops: 3,
            forwarded_chain_points: 2,
            request_patterns: vec![
                r"(?i)union\s+select".to_string(),
                r"(?i)<script".to_string(),
                r"(?i)\.\./\.\./".to_string(),
                r"(?i)/etc/passwd".to_string(),
                r"(?i)(sleep|benchmark)\s*\(".to_string(),
            ],
            request_pattern_points: 4,
            admin_path_prefix: "/admin".to_string(),
            admin_path_points: 5,
            auth_path_points: 2,
            burst_points: 5,
            exempt_roles: vec!["developer".to_string()],
        }
    }
}

impl ThreatConfig {
    pub fn status_points_for(&self, status: u16) -> Option<u32> {
        self.status_points.get(&status.to_string()).copied()
    }
}

/// Partial overlay parsed from the optional TOML configuration file. Every
/// section is optional; present sections replace the env-derived defaults.
#[derive(Debug, Default, Deserialize)]
struct ConfigOverlay {
    database_url: Option<String>,
    server_host: Option<String>,
    server_port: Option<u16>,
    alert_webhook_url: Option<String>,
    signature: Option<SignatureConfig>,
    chain: Option<ChainConfig>,
    export: Option<ExportConfig>,
    threat: Option<ThreatConfig>,
}

impl AppConfig {
    /// Load configuration from the environment, then apply the TOML overlay
    /// file named by `AUDIT_CONFIG_PATH` when present.
    pub fn load() -> Result<Self, AuditError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://audit.db".to_string());

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|e| AuditError::Config(format!("Invalid SERVER_PORT: {}", e)))?;

        let alert_webhook_url = env::var("ALERT_WEBHOOK_URL").ok();

        let mut signature = SignatureConfig::default();
        if let Ok(secret) = env::var("AUDIT_SIGNATURE_SECRET") {
            if !secret.is_empty() {
                signature.enabled = true;
                signature.secret = secret;
            }
        }
        if let Ok(algo) = env::var("AUDIT_SIGNATURE_ALGO") {
            signature.algo = algo;
        }

        let mut config = AppConfig {
            database_url,
            server_host,
            server_port,
            alert_webhook_url,
            signature,
            chain: ChainConfig::default(),
            export: ExportConfig::default(),
            threat: ThreatConfig::default(),
        };

        if let Ok(path) = env::var("AUDIT_CONFIG_PATH") {
            config.apply_file(Path::new(&path))?;
        }

        Ok(config)
    }

    /// Apply a TOML overlay file on top of the current configuration.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), AuditError> {
        if !path.exists() {
            return Err(AuditError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuditError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let overlay: ConfigOverlay = toml::from_str(&contents)
            .map_err(|e| AuditError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        if let Some(url) = overlay.database_url {
            self.database_url = url;
        }
        if let Some(host) = overlay.server_host {
            self.server_host = host;
        }
        if let Some(port) = overlay.server_port {
            self.server_port = port;
        }
        if let Some(url) = overlay.alert_webhook_url {
            self.alert_webhook_url = Some(url);
        }
        if let Some(signature) = overlay.signature {
            self.signature = signature;
        }
        if let Some(chain) = overlay.chain {
            self.chain = chain;
        }
        if let Some(export) = overlay.export {
            self.export = export;
        }
        if let Some(threat) = overlay.threat {
            self.threat = threat;
        }

        Ok(())
    }

    /// Validate option combinations that cannot be expressed in the types.
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.signature.enabled && self.signature.secret.is_empty() {
            return Err(AuditError::Config(
                "signature.enabled is set but signature.secret is empty".to_string(),
            ));
        }

        match self.signature.algo.as_str() {
            "sha256" | "sha512" => {}
            other => return Err(AuditError::unknown_signature_algo(other)),
        }

        if self.chain.verify_chunk <= 0 || self.chain.rehash_chunk <= 0 || self.chain.export_chunk <= 0 {
            return Err(AuditError::Config(
                "Chunk sizes must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
