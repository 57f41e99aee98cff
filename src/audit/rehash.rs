//! Chain repair
//!
//! Walks the same ordered range as the verifier but self-heals: each record
//! is re-canonicalized against its *corrected* predecessor (the recomputed
//! hash, not the stored one), and only rows whose hash, previous_hash or
//! signature drifted are rewritten. Running it twice in a row with no new
//! records reports zero updates on the second pass.
//!
//! Writes are per-record and independent; a crash mid-run leaves corrected
//! records corrected, and a later run resumes from `--from-id`.

use tracing::{debug, info, warn};

use crate::audit::canonical::canonical_payload_with_previous;
use crate::audit::hasher::ChainHasher;
use crate::audit::store::AuditStore;
use crate::error::AuditError;

#[derive(Debug, Clone, Default)]
pub struct RehashReport {
    pub total: u64,
    pub updated: u64,
}

pub struct ChainRepairer<'a> {
    store: &'a AuditStore,
    hasher: &'a ChainHasher,
    chunk_size: i64,
    dry_run: bool,
}

impl<'a> ChainRepairer<'a> {
    pub fn new(store: &'a AuditStore, hasher: &'a ChainHasher, chunk_size: i64, dry_run: bool) -> Self {
        Self {
            store,
            hasher,
            chunk_size,
            dry_run,
        }
    }

    /// Recompute the chain for records with `id >= from_id`, rewriting
    /// drifted rows unless this is a dry run.
    pub async fn rehash(&self, from_id: Option<i64>) -> Result<RehashReport, AuditError> {
        if self.dry_run {
            info!("Rehash running in dry-run mode; no rows will be written");
        }

        let mut report = RehashReport::default();

        let mut previous = match from_id {
            Some(from) => self.store.hash_before(from).await?,
            None => None,
        };
        let mut after = from_id.map(|f| f - 1).unwrap_or(0);

        loop {
            let chunk = self.store.fetch_chunk(after, None, self.chunk_size).await?;
            if chunk.is_empty() {
                break;
            }

            for record in &chunk {
                report.total += 1;
                after = record.id;

                let canonical = canonical_payload_with_previous(record, previous.as_deref());
                let expected_hash = self.hasher.chain_hash(&canonical, previous.as_deref());
                let expected_signature = self.hasher.sign(&expected_hash);

                let drifted = record.previous_hash.as_deref() != previous.as_deref()
                    || record.hash.as_deref() != Some(expected_hash.as_str())
                    || record.signature != expected_signature;

                if drifted {
                    warn!(
                        id = record.id,
                        dry_run = self.dry_run,
                        "Chain fields drifted from recomputed values"
                    );
                    report.updated += 1;

                    if !self.dry_run {
                        self.store
                            .update_chain_fields(
                                record.id,
                                previous.as_deref(),
                                &expected_hash,
                                expected_signature.as_deref(),
                            )
                            .await?;
                    }
                }

                // Self-healing linkage: the next record chains to the
                // corrected hash.
                previous = Some(expected_hash);
            }

            debug!(processed = report.total, updated = report.updated, "Rehashed chunk");
        }

        Ok(report)
    }
}
