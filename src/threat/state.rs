//! Shared risk state
//!
//! Decaying per-identity risk scores, fixed-window burst counters, and
//! temporary block entries. The trait models a shared cache: every operation
//! is fallible, and callers in the request path must degrade to a no-op on
//! failure rather than blocking or crashing the request pipeline.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskStoreError {
    #[error("Risk store unavailable: {0}")]
    Unavailable(String),
}

pub trait RiskStore: Send + Sync {
    /// Add points to the identity's decaying score and return the new total.
    /// Each contributing event refreshes the TTL: the score resets to zero
    /// only after `decay` has elapsed since the last event.
    fn add_score(&self, key: &str, points: u32, decay: Duration) -> Result<u32, RiskStoreError>;

    /// Increment the identity's request counter within the current fixed
    /// window and return the count. The counter resets when the window rolls
    /// over.
    fn bump_burst(&self, key: &str, window: Duration) -> Result<u32, RiskStoreError>;

    fn is_blocked(&self, key: &str) -> Result<bool, RiskStoreError>;

    fn block(&self, key: &str, duration: Duration) -> Result<(), RiskStoreError>;
}

#[derive(Debug)]
struct DecayingScore {
    value: u32,
    expires_at: Instant,
}

#[derive(Debug)]
struct BurstWindow {
    count: u32,
    started_at: Instant,
}

/// In-process implementation. The mutex makes read-modify-write increments
/// atomic under concurrent requests from the same identity.
#[derive(Default)]
pub struct MemoryRiskStore {
    scores: Mutex<HashMap<String, DecayingScore>>,
    bursts: Mutex<HashMap<String, BurstWindow>>,
    blocks: Mutex<HashMap<String, Instant>>,
}

impl MemoryRiskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err(what: &str) -> RiskStoreError {
        RiskStoreError::Unavailable(format!("{} lock poisoned", what))
    }
}

impl RiskStore for MemoryRiskStore {
    fn add_score(&self, key: &str, points: u32, decay: Duration) -> Result<u32, RiskStoreError> {
        let mut scores = self.scores.lock().map_err(|_| Self::lock_err("score"))?;
        let now = Instant::now();

        let entry = scores.entry(key.to_string()).or_insert(DecayingScore {
            value: 0,
            expires_at: now + decay,
        });
        if entry.expires_at <= now {
            entry.value = 0;
        }
        entry.value = entry.value.saturating_add(points);
        entry.expires_at = now + decay;

        Ok(entry.value)
    }

    fn bump_burst(&self, key: &str, window: Duration) -> Result<u32, RiskStoreError> {
        let mut bursts = self.bursts.lock().map_err(|_| Self::lock_err("burst"))?;
        let now = Instant::now();

        let entry = bursts.entry(key.to_string()).or_insert(BurstWindow {
            count: 0,
            started_at: now,
        });
        if now.duration_since(entry.started_at) >= window {
            entry.count = 0;
            entry.started_at = now;
        }
        entry.count = entry.count.saturating_add(1);

        Ok(entry.count)
    }

    fn is_blocked(&self, key: &str) -> Result<bool, RiskStoreError> {
        let mut blocks = self.blocks.lock().map_err(|_| Self::lock_err("block"))?;
        match blocks.get(key) {
            Some(until) if *until > Instant::now() => Ok(true),
            Some(_) => {
                blocks.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn block(&self, key: &str, duration: Duration) -> Result<(), RiskStoreError> {
        let mut blocks = self.blocks.lock().map_err(|_| Self::lock_err("block"))?;
        blocks.insert(key.to_string(), Instant::now() + duration);
        Ok(())
    }
}
