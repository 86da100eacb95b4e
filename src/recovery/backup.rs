use crate::error::MarginResult;
use crate::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_CAPACITY: usize = 5;

/// A checksummed snapshot of one persisted domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub timestamp: DateTime<Utc>,
    pub checksum: String,
    pub domain: String,
    pub payload: String,
}

impl BackupRecord {
    pub fn new(domain: &str, payload: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            checksum: checksum(payload),
            domain: domain.to_string(),
            payload: payload.to_string(),
        }
    }

    /// True when the payload still hashes to the recorded checksum.
    pub fn verify(&self) -> bool {
        checksum(&self.payload) == self.checksum
    }
}

/// SHA-256 of the payload text, hex encoded.
pub fn checksum(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// Fixed-capacity FIFO of backups per domain.
///
/// Backups live under `backup:{domain}:{seq}` with a zero-padded, strictly
/// increasing sequence number, so key order is age order.
#[derive(Debug, Clone, Copy)]
pub struct BackupRing {
    capacity: usize,
}

impl BackupRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn prefix(domain: &str) -> String {
        format!("backup:{domain}:")
    }

    fn sequence(key: &str) -> Option<u64> {
        key.rsplit(':').next()?.parse().ok()
    }

    /// Stores a new backup, then evicts the oldest entries beyond capacity.
    pub async fn push(
        &self,
        store: &dyn KeyValueStore,
        domain: &str,
        payload: &str,
    ) -> MarginResult<BackupRecord> {
        let prefix = Self::prefix(domain);
        let mut keys = store.keys_with_prefix(&prefix).await?;
        let next = keys.iter().filter_map(|k| Self::sequence(k)).max().map_or(1, |seq| seq + 1);

        let record = BackupRecord::new(domain, payload);
        let key = format!("{prefix}{next:020}");
        store.set(&key, &serde_json::to_string(&record)?).await?;
        keys.push(key);

        let excess = keys.len().saturating_sub(self.capacity);
        for stale in keys.iter().take(excess) {
            store.remove(stale).await?;
            tracing::debug!(domain, key = %stale, "evicted backup");
        }

        Ok(record)
    }

    /// Every readable backup of `domain`, oldest first.
    ///
    /// Entries that no longer parse are skipped; entries with a bad checksum
    /// are returned and can be told apart with [`BackupRecord::verify`].
    pub async fn list(
        &self,
        store: &dyn KeyValueStore,
        domain: &str,
    ) -> MarginResult<Vec<BackupRecord>> {
        let keys = store.keys_with_prefix(&Self::prefix(domain)).await?;
        let mut records = Vec::with_capacity(keys.len());

        for key in keys {
            let Some(raw) = store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<BackupRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(domain, %key, error = %e, "skipping unreadable backup"),
            }
        }

        Ok(records)
    }
}

impl Default for BackupRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
