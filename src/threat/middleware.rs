//! Threat detection middleware
//!
//! Runs inline in the request path: enforces existing blocks before the
//! handler, scores the request after it, and writes the audit trail. Risk
//! store and audit writer failures are logged and degrade to a no-op; the
//! underlying request always completes.

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};
use uuid::Uuid;

use crate::alert::{AlertSink, SecurityAlert};
use crate::audit::record::NewAuditRecord;
use crate::audit::writer::AuditWriter;
use crate::threat::scorer::ThreatScorer;
use crate::threat::signals::{ActorContext, RequestSignals};
use crate::threat::state::RiskStore;

/// Largest request body the middleware will buffer for payload inspection.
const BODY_SNIFF_LIMIT: usize = 64 * 1024;

/// Everything the middleware needs, shared across requests.
pub struct ThreatGuard {
    pub scorer: ThreatScorer,
    pub risk: Arc<dyn RiskStore>,
    pub writer: Arc<AuditWriter>,
    pub alerts: Arc<dyn AlertSink>,
}

impl ThreatGuard {
    pub fn new(
        scorer: ThreatScorer,
        risk: Arc<dyn RiskStore>,
        writer: Arc<AuditWriter>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            scorer,
            risk,
            writer,
            alerts,
        }
    }

    /// Best-effort blocked lookup: a store failure never blocks a request.
    fn blocked(&self, key: &str) -> bool {
        match self.risk.is_blocked(key) {
            Ok(blocked) => blocked,
            Err(e) => {
                warn!("Risk store lookup failed, treating '{}' as unblocked: {}", key, e);
                false
            }
        }
    }
}

pub async fn threat_middleware(
    State(guard): State<Arc<ThreatGuard>>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();

    let actor = parts.extensions.get::<ActorContext>().cloned();
    let route = parts
        .extensions
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string());
    let peer_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };
    let user_agent = header("user-agent");
    let forwarded_for = header("x-forwarded-for");
    let content_length: Option<usize> = header("content-length").and_then(|v| v.parse().ok());

    let ip = forwarded_for
        .as_deref()
        .and_then(|chain| chain.split(',').next())
        .map(|hop| hop.trim().to_string())
        .filter(|hop| !hop.is_empty())
        .or(peer_ip)
        .unwrap_or_else(|| "unknown".to_string());

    let request_id = header("x-request-id").unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut signals = RequestSignals {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().unwrap_or("").to_string(),
        url: parts.uri.to_string(),
        route,
        user_agent,
        forwarded_for,
        payload_bytes: content_length.unwrap_or(0),
        ip,
        request_id: Some(request_id),
        ..RequestSignals::default()
    };
    if let Some(actor) = &actor {
        signals.user_id = Some(actor.user_id);
        signals.user_name = actor.name.clone();
        signals.user_email = actor.email.clone();
        signals.user_username = actor.username.clone();
        signals.role = actor.role.clone();
        signals.session_id = actor.session_id.clone();
    }

    let enabled = guard.scorer.config().enabled;

    // Enforcement of existing blocks, before any scoring.
    if enabled && (guard.blocked(&signals.identity_key()) || guard.blocked(&signals.ip_key())) {
        signals.status_code = StatusCode::FORBIDDEN.as_u16();
        append_audit(
            &guard,
            &signals,
            "security_block_enforced",
            Some(json!({ "blocked_enforced": true, "identity": signals.identity_key() })),
        )
        .await;

        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "temporarily_blocked" })),
        )
            .into_response();
    }

    // Buffer small bodies so payload patterns can be matched; anything larger
    // is scored on size alone.
    let request = if content_length.map(|len| len <= BODY_SNIFF_LIMIT).unwrap_or(false) {
        match axum::body::to_bytes(body, BODY_SNIFF_LIMIT).await {
            Ok(bytes) => {
                if !bytes.is_empty() {
                    signals.payload_bytes = bytes.len();
                    signals.payload_text = Some(String::from_utf8_lossy(&bytes).into_owned());
                    signals.request_payload_hash = Some(hex::encode(Sha256::digest(&bytes)));
                }
                Request::from_parts(parts, Body::from(bytes))
            }
            Err(e) => {
                warn!("Failed to buffer request body for inspection: {}", e);
                Request::from_parts(parts, Body::empty())
            }
        }
    } else {
        Request::from_parts(parts, body)
    };

    let started = Instant::now();
    let response = next.run(request).await;

    signals.status_code = response.status().as_u16();
    signals.duration_ms = Some(started.elapsed().as_millis() as i64);

    if enabled {
        score_request(&guard, &signals).await;
    } else {
        append_audit(&guard, &signals, "http_request", None).await;
    }

    response
}

/// Post-response scoring: burst detection, score accumulation, threshold
/// handling, and the per-request audit record.
async fn score_request(guard: &Arc<ThreatGuard>, signals: &RequestSignals) {
    let config = guard.scorer.config().clone();
    let mut eval = guard.scorer.evaluate(signals);

    let identity = signals.identity_key();

    let burst_triggered = match guard
        .risk
        .bump_burst(&identity, Duration::from_secs(config.burst_window_seconds))
    {
        Ok(count) => count > config.burst_requests,
        Err(e) => {
            warn!("Risk store burst update failed, skipping: {}", e);
            false
        }
    };
    if burst_triggered {
        eval.add("burst", config.burst_points);
    }

    // Accumulate into the decaying counter. A store failure degrades to "no
    // scoring this request".
    let total_score = if eval.points > 0 {
        match guard.risk.add_score(
            &identity,
            eval.points,
            Duration::from_secs(config.risk_decay_minutes * 60),
        ) {
            Ok(total) => Some(total),
            Err(e) => {
                warn!("Risk store score update failed, skipping: {}", e);
                None
            }
        }
    } else {
        None
    };

    let threat_context = if eval.points > 0 {
        Some(json!({
            "threat": {
                "points": eval.points,
                "score": total_score,
                "signals": eval.hits.clone(),
                "burst_triggered": burst_triggered,
            }
        }))
    } else {
        None
    };
    append_audit(guard, signals, "http_request", threat_context).await;

    let total = match total_score {
        Some(total) if total >= config.risk_threshold => total,
        _ => return,
    };

    let exempt = guard.scorer.is_exempt(signals.role.as_deref());
    let should_block = config.auto_block && !exempt;

    if should_block {
        // User-level lock when the actor is known, IP-level otherwise.
        let (key, minutes) = match signals.user_id {
            Some(_) => (identity.clone(), config.user_block_minutes),
            None => (signals.ip_key(), config.ip_block_minutes),
        };
        if let Err(e) = guard.risk.block(&key, Duration::from_secs(minutes * 60)) {
            warn!("Failed to record block for '{}': {}", key, e);
        }
    }

    append_audit(
        guard,
        signals,
        "security_blocked",
        Some(json!({
            "blocked": should_block,
            "developer_exempt": exempt,
            "burst_triggered": burst_triggered,
            "score": total,
            "threshold": config.risk_threshold,
            "signals": eval.hits.clone(),
        })),
    )
    .await;

    guard.alerts.dispatch(SecurityAlert {
        identity,
        ip: signals.ip.clone(),
        user_id: signals.user_id,
        score: total,
        threshold: config.risk_threshold,
        signals: eval.hits,
        burst_triggered,
        blocked: should_block,
        developer_exempt: exempt,
        url: signals.url.clone(),
        occurred_at: chrono::Utc::now(),
    });
}

/// Append one audit record for this request. Failures are logged; the
/// request outcome is never affected by the audit trail.
async fn append_audit(
    guard: &Arc<ThreatGuard>,
    signals: &RequestSignals,
    action: &str,
    context: Option<serde_json::Value>,
) {
    let record = NewAuditRecord {
        action: action.to_string(),
        user_id: signals.user_id,
        user_name: signals.user_name.clone(),
        user_email: signals.user_email.clone(),
        user_username: signals.user_username.clone(),
        role_name: signals.role.clone(),
        ip_address: Some(signals.ip.clone()),
        user_agent: signals.user_agent.clone(),
        url: Some(signals.url.clone()),
        route: signals.route.clone(),
        method: Some(signals.method.clone()),
        status_code: Some(signals.status_code as i64),
        request_id: signals.request_id.clone(),
        session_id: signals.session_id.clone(),
        duration_ms: signals.duration_ms,
        request_payload_hash: signals.request_payload_hash.clone(),
        context,
        ..NewAuditRecord::default()
    };

    if let Err(e) = guard.writer.append(record).await {
        error!("Failed to append audit record for '{}': {}", action, e);
    }
}
