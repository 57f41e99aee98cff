//! Risk-scoring threat detection
//!
//! Per-request signal collection, decaying per-identity risk counters with
//! burst detection, block enforcement, and security-event emission. The
//! state machine per identity is Normal, then Elevated while the score is
//! under the threshold, then Blocked at or above it, decaying back toward
//! Normal as the score expires.

pub mod middleware;
pub mod scorer;
pub mod signals;
pub mod state;

pub use middleware::{threat_middleware, ThreatGuard};
pub use scorer::{SignalHit, ThreatEvaluation, ThreatScorer};
pub use signals::{ActorContext, RequestSignals};
pub use state::{MemoryRiskStore, RiskStore, RiskStoreError};
