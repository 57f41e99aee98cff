//! Tamper-evident audit ledger
//!
//! Records are linked into a hash chain: each record's hash commits to its
//! canonical serialization and to the previous record's hash. An optional
//! HMAC signature layer covers the chain hash. Offline tooling verifies,
//! repairs and exports the chain in chunked, resumable passes.

pub mod canonical;
pub mod export;
pub mod hasher;
pub mod record;
pub mod rehash;
pub mod store;
pub mod verify;
pub mod writer;

pub use canonical::{canonical_payload, canonical_payload_with_previous};
pub use export::{ExportFormat, ExportOptions, Exporter};
pub use hasher::ChainHasher;
pub use record::{AuditRecord, NewAuditRecord};
pub use rehash::{ChainRepairer, RehashReport};
pub use store::AuditStore;
pub use verify::{ChainVerifier, VerifyReport};
pub use writer::{AuditWriter, ChainEvent};
