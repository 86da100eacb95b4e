//! Corruption detection and recovery for persisted domains.
//!
//! A *domain* is one named JSON array of records (for example `"notes"`)
//! kept in a [`KeyValueStore`]. [`DomainGuard`] is the only component that
//! reads or writes domains and their backups. Each domain moves through a
//! small state machine:
//!
//! ```text
//! Healthy --(invalid read)--> Corrupted --> Recovering --+--> Healthy
//!                                                        +--> Failed
//! ```
//!
//! Recovery first restores the newest backup whose checksum and contents are
//! valid, then falls back to salvaging complete records from the damaged
//! payload. If neither yields anything the domain is `Failed` and the caller
//! decides between [`DomainGuard::reinitialize`] and aborting.

pub mod backup;
pub mod repair;

use crate::error::{MarginError, MarginResult};
use crate::storage::KeyValueStore;
pub use backup::{BackupRecord, BackupRing};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Prefix of the per-probe keys written by [`DomainGuard::probe`].
const PROBE_PREFIX: &str = "__health_probe__:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainHealth {
    Healthy,
    Corrupted,
    Recovering,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Restored {
        backup_timestamp: DateTime<Utc>,
        records: usize,
    },
    Repaired {
        salvaged: usize,
        discarded: usize,
    },
    Failed,
}

/// Why a persisted payload was rejected.
enum Invalid {
    Unparseable(String),
    Shape(String),
}

impl Invalid {
    fn reason(&self) -> &str {
        match self {
            Invalid::Unparseable(reason) | Invalid::Shape(reason) => reason,
        }
    }
}

pub struct DomainGuard {
    store: Arc<dyn KeyValueStore>,
    backups: BackupRing,
    health: Mutex<HashMap<String, DomainHealth>>,
    // serializes writes so backup rotation never interleaves
    write_lock: tokio::sync::Mutex<()>,
    domain_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DomainGuard {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_capacity(store, backup::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            store,
            backups: BackupRing::new(capacity),
            health: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
            domain_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn health(&self, domain: &str) -> DomainHealth {
        self.health
            .lock()
            .map(|states| states.get(domain).copied().unwrap_or(DomainHealth::Healthy))
            .unwrap_or(DomainHealth::Healthy)
    }

    fn set_health(&self, domain: &str, state: DomainHealth) {
        if let Ok(mut states) = self.health.lock() {
            states.insert(domain.to_string(), state);
        }
    }

    /// Lock guarding read-modify-write cycles on one domain.
    ///
    /// Held by repositories across load, merge and store so concurrent
    /// partial updates are applied one after the other.
    pub async fn lock_domain(&self, domain: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = match self.domain_locks.lock() {
            Ok(mut locks) => locks.entry(domain.to_string()).or_default().clone(),
            Err(poisoned) => poisoned.into_inner().entry(domain.to_string()).or_default().clone(),
        };
        lock.lock_owned().await
    }

    /// Whether the domain has ever been persisted.
    pub async fn exists(&self, domain: &str) -> MarginResult<bool> {
        Ok(self.store.get(domain).await?.is_some())
    }

    /// The payload exactly as stored, for manual export.
    pub async fn raw_payload(&self, domain: &str) -> MarginResult<Option<String>> {
        self.store.get(domain).await
    }

    /// Reads and validates a domain, recovering it first if it is damaged.
    ///
    /// A missing domain reads as empty. If recovery fails the error carries
    /// guidance for the user; the damaged payload is left in place.
    pub async fn read<T: DeserializeOwned>(&self, domain: &str) -> MarginResult<Vec<T>> {
        let Some(raw) = self.store.get(domain).await? else {
            return Ok(Vec::new());
        };

        match parse::<T>(&raw) {
            Ok(records) => {
                self.set_health(domain, DomainHealth::Healthy);
                Ok(records)
            }
            Err(invalid) => {
                tracing::warn!(domain, reason = invalid.reason(), "persisted domain failed validation");
                self.set_health(domain, DomainHealth::Corrupted);

                match self.recover::<T>(domain).await? {
                    RecoveryOutcome::Failed => Err(MarginError::Corruption {
                        domain: domain.to_string(),
                        reason: format!(
                            "{}; no valid backup and nothing could be salvaged. Export the raw \
                             payload before reinitializing the domain",
                            invalid.reason()
                        ),
                    }),
                    _ => match self.store.get(domain).await? {
                        Some(restored) => parse::<T>(&restored).map_err(|again| {
                            MarginError::Corruption {
                                domain: domain.to_string(),
                                reason: again.reason().to_string(),
                            }
                        }),
                        None => Ok(Vec::new()),
                    },
                }
            }
        }
    }

    /// Persists `records` as the new content of `domain` and backs it up.
    pub async fn write<T: Serialize>(&self, domain: &str, records: &[T]) -> MarginResult<()> {
        let payload = serde_json::to_string(records)?;
        let _write = self.write_lock.lock().await;
        self.persist(domain, &payload).await
    }

    async fn persist(&self, domain: &str, payload: &str) -> MarginResult<()> {
        self.store.set(domain, payload).await?;
        self.backups.push(self.store.as_ref(), domain, payload).await?;
        self.set_health(domain, DomainHealth::Healthy);
        Ok(())
    }

    /// Returns true when the stored payload does not parse or is wrongly shaped.
    ///
    /// A domain that has never been written is not corrupted.
    pub async fn detect_corruption<T: DeserializeOwned>(&self, domain: &str) -> MarginResult<bool> {
        let Some(raw) = self.store.get(domain).await? else {
            return Ok(false);
        };

        let corrupted = parse::<T>(&raw).is_err();
        if corrupted {
            self.set_health(domain, DomainHealth::Corrupted);
        }
        Ok(corrupted)
    }

    /// Every stored backup of `domain`, oldest first.
    pub async fn backups(&self, domain: &str) -> MarginResult<Vec<BackupRecord>> {
        self.backups.list(self.store.as_ref(), domain).await
    }

    /// Restores the newest backup that passes its checksum and parses.
    ///
    /// Returns the restored backup's timestamp, or `None` if no backup qualified.
    pub async fn recover_from_backup<T: DeserializeOwned>(
        &self,
        domain: &str,
    ) -> MarginResult<Option<DateTime<Utc>>> {
        let _write = self.write_lock.lock().await;
        Ok(self.restore_latest::<T>(domain).await?.map(|(timestamp, _)| timestamp))
    }

    async fn restore_latest<T: DeserializeOwned>(
        &self,
        domain: &str,
    ) -> MarginResult<Option<(DateTime<Utc>, usize)>> {
        let backups = self.backups.list(self.store.as_ref(), domain).await?;

        for candidate in backups.iter().rev() {
            if !candidate.verify() {
                tracing::warn!(domain, timestamp = %candidate.timestamp, "backup checksum mismatch");
                continue;
            }
            let Ok(records) = parse::<T>(&candidate.payload) else {
                tracing::warn!(domain, timestamp = %candidate.timestamp, "backup payload is invalid");
                continue;
            };

            self.store.set(domain, &candidate.payload).await?;
            self.set_health(domain, DomainHealth::Healthy);
            tracing::info!(domain, timestamp = %candidate.timestamp, "domain restored from backup");
            return Ok(Some((candidate.timestamp, records.len())));
        }

        Ok(None)
    }

    /// Salvages complete records from the damaged payload and persists them.
    ///
    /// Returns the number of salvaged records; zero leaves the payload untouched.
    pub async fn repair<T: DeserializeOwned>(&self, domain: &str) -> MarginResult<usize> {
        let _write = self.write_lock.lock().await;
        Ok(self.salvage_values::<T>(domain).await?.0)
    }

    /// Runs the full recovery sequence for a damaged domain.
    pub async fn recover<T>(&self, domain: &str) -> MarginResult<RecoveryOutcome>
    where
        T: DeserializeOwned,
    {
        let _write = self.write_lock.lock().await;
        self.set_health(domain, DomainHealth::Recovering);

        if let Some((backup_timestamp, records)) = self.restore_latest::<T>(domain).await? {
            // fresh backup of the restored state
            if let Some(restored) = self.store.get(domain).await? {
                self.backups.push(self.store.as_ref(), domain, &restored).await?;
            }
            return Ok(RecoveryOutcome::Restored {
                backup_timestamp,
                records,
            });
        }

        let (salvaged, discarded) = self.salvage_values::<T>(domain).await?;
        if salvaged > 0 {
            return Ok(RecoveryOutcome::Repaired { salvaged, discarded });
        }

        self.set_health(domain, DomainHealth::Failed);
        tracing::error!(domain, "domain could not be recovered");
        Ok(RecoveryOutcome::Failed)
    }

    /// Salvages complete records from the damaged payload and persists them.
    /// Returns `(salvaged, discarded)`.
    async fn salvage_values<T: DeserializeOwned>(&self, domain: &str) -> MarginResult<(usize, usize)> {
        let Some(raw) = self.store.get(domain).await? else {
            return Ok((0, 0));
        };

        let (kept, discarded) = repair::salvage::<T>(&raw);
        if kept.is_empty() {
            return Ok((0, discarded));
        }

        let payload = serde_json::to_string(&kept)?;
        self.persist(domain, &payload).await?;
        tracing::info!(domain, salvaged = kept.len(), discarded, "domain repaired");
        Ok((kept.len(), discarded))
    }

    /// Resets a domain to an empty array. Meant for callers that accept data
    /// loss after a `Failed` recovery.
    pub async fn reinitialize(&self, domain: &str) -> MarginResult<()> {
        let _write = self.write_lock.lock().await;
        self.persist(domain, "[]").await?;
        tracing::warn!(domain, "domain reinitialized empty");
        Ok(())
    }

    /// Write/read/delete round trip on a key unique to this call, so
    /// concurrent probes never see each other. Never touches domains.
    pub async fn probe(&self) -> MarginResult<bool> {
        let token = Uuid::new_v4().to_string();
        let key = format!("{PROBE_PREFIX}{token}");
        self.store.set(&key, &token).await?;
        let read_back = self.store.get(&key).await?;
        let removed = self.store.remove(&key).await?;
        Ok(removed && read_back.as_deref() == Some(token.as_str()))
    }
}

/// Parses a domain payload: a JSON array whose every element is an object
/// that deserializes into `T`.
fn parse<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>, Invalid> {
    let value: Value = serde_json::from_str(raw).map_err(|e| Invalid::Unparseable(e.to_string()))?;

    let Value::Array(items) = value else {
        return Err(Invalid::Shape("payload is not an array".into()));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(position, item)| {
            if !item.is_object() {
                return Err(Invalid::Shape(format!("element {position} is not an object")));
            }
            serde_json::from_value(item)
                .map_err(|e| Invalid::Shape(format!("element {position}: {e}")))
        })
        .collect()
}
