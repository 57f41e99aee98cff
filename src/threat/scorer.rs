//! Risk scoring
//!
//! Pure signal arithmetic: each configured signal contributes weighted
//! points, with a named breakdown so security events and alerts can show
//! exactly why a request scored what it did. Stateful accumulation (decay,
//! bursts, blocks) lives in the risk store, driven by the middleware.

use regex::Regex;
use serde::Serialize;

use crate::config::ThreatConfig;
use crate::error::AuditError;
use crate::threat::signals::RequestSignals;

/// One contributing signal and its weight.
#[derive(Debug, Clone, Serialize)]
pub struct SignalHit {
    pub signal: String,
    pub points: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ThreatEvaluation {
    pub points: u32,
    pub hits: Vec<SignalHit>,
}

impl ThreatEvaluation {
    pub fn add(&mut self, signal: impl Into<String>, points: u32) {
        if points == 0 {
            return;
        }
        self.points += points;
        self.hits.push(SignalHit {
            signal: signal.into(),
            points,
        });
    }
}

pub struct ThreatScorer {
    config: ThreatConfig,
    user_agent_patterns: Vec<Regex>,
    request_patterns: Vec<Regex>,
}

fn compile_patterns(patterns: &[String], which: &str) -> Result<Vec<Regex>, AuditError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| AuditError::Config(format!("Invalid {} pattern '{}': {}", which, p, e)))
        })
        .collect()
}

impl ThreatScorer {
    /// Compiles the configured pattern lists; an invalid regex is a
    /// configuration precondition error.
    pub fn new(config: ThreatConfig) -> Result<Self, AuditError> {
        let user_agent_patterns = compile_patterns(&config.user_agent_patterns, "user agent")?;
        let request_patterns = compile_patterns(&config.request_patterns, "request")?;
        Ok(Self {
            config,
            user_agent_patterns,
            request_patterns,
        })
    }

    pub fn config(&self) -> &ThreatConfig {
        &self.config
    }

    pub fn is_exempt(&self, role: Option<&str>) -> bool {
        role.map(|r| self.config.exempt_roles.iter().any(|e| e == r))
            .unwrap_or(false)
    }

    /// Weighted points for one request/response pair. Pure: no state is read
    /// or written here.
    pub fn evaluate(&self, signals: &RequestSignals) -> ThreatEvaluation {
        let mut eval = ThreatEvaluation::default();

        if let Some(points) = self.config.status_points_for(signals.status_code) {
            eval.add(format!("status_{}", signals.status_code), points);
        }

        if self
            .config
            .suspicious_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&signals.method))
        {
            eval.add("suspicious_method", self.config.suspicious_method_points);
        }

        match signals.user_agent.as_deref() {
            None | Some("") => eval.add("missing_user_agent", self.config.missing_user_agent_points),
            Some(ua) if ua.len() < self.config.min_user_agent_len => {
                eval.add("short_user_agent", self.config.missing_user_agent_points)
            }
            Some(ua) => {
                for pattern in &self.user_agent_patterns {
                    if pattern.is_match(ua) {
                        eval.add(
                            format!("user_agent_pattern:{}", pattern.as_str()),
                            self.config.user_agent_pattern_points,
                        );
                    }
                }
            }
        }

        if signals.query.len() > self.config.max_query_len {
            eval.add("long_query_string", self.config.long_query_points);
        }

        if signals.payload_bytes > self.config.max_payload_kb * 1024 {
            eval.add("large_payload", self.config.large_payload_points);
        }

        if signals.forwarded_hops() > self.config.max_forwarded_hops {
            eval.add("forwarded_chain", self.config.forwarded_chain_points);
        }

        for pattern in &self.request_patterns {
            let in_path = pattern.is_match(&signals.path) || pattern.is_match(&signals.query);
            let in_payload = signals
                .payload_text
                .as_deref()
                .map(|body| pattern.is_match(body))
                .unwrap_or(false);
            if in_path || in_payload {
                eval.add(
                    format!("request_pattern:{}", pattern.as_str()),
                    self.config.request_pattern_points,
                );
            }
        }

        if signals.path.starts_with(&self.config.admin_path_prefix) {
            eval.add("admin_path", self.config.admin_path_points);
        }

        if is_auth_path(&signals.path) {
            eval.add("auth_path", self.config.auth_path_points);
        }

        eval
    }
}

fn is_auth_path(path: &str) -> bool {
    let path = path.to_lowercase();
    ["login", "logout", "password"].iter().any(|k| path.contains(k))
}
