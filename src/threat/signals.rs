//! Request signals
//!
//! Everything the scorer looks at, extracted from one request/response pair.
//! Collection happens in the middleware; evaluation is pure arithmetic over
//! this struct.

/// Identity and role of the authenticated actor, inserted into request
/// extensions by the upstream authentication layer.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub user_id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub role: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestSignals {
    pub method: String,
    pub path: String,
    pub query: String,
    pub url: String,
    pub route: Option<String>,
    pub status_code: u16,
    pub user_agent: Option<String>,
    pub forwarded_for: Option<String>,
    pub payload_bytes: usize,
    /// Request body as text, when it was small enough to buffer.
    pub payload_text: Option<String>,
    pub ip: String,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub user_username: Option<String>,
    pub role: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    pub duration_ms: Option<i64>,
    pub request_payload_hash: Option<String>,
}

impl RequestSignals {
    /// Risk counters are keyed by the authenticated actor, falling back to
    /// the client IP for anonymous traffic.
    pub fn identity_key(&self) -> String {
        match self.user_id {
            Some(id) => format!("user:{}", id),
            None => format!("ip:{}", self.ip),
        }
    }

    pub fn ip_key(&self) -> String {
        format!("ip:{}", self.ip)
    }

    /// Number of hops claimed by the X-Forwarded-For chain.
    pub fn forwarded_hops(&self) -> usize {
        self.forwarded_for
            .as_deref()
            .map(|chain| chain.split(',').filter(|h| !h.trim().is_empty()).count())
            .unwrap_or(0)
    }
}
