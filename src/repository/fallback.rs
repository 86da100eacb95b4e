use crate::error::{Failure, MarginError, MarginResult};
use crate::repository::{Entity, FindOptions, RecordFilter, Repository};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveStore {
    Remote,
    Local,
}

/// Routes calls to the remote store when it is configured and reachable,
/// otherwise to the local store.
///
/// On the first connection to an empty remote store, local records are
/// copied over and verified before the remote becomes authoritative. A
/// failed migration is rolled back, recorded in [`warnings`](Self::warnings)
/// and leaves the local store active. Network failures while the remote
/// store is active switch to the local store for the rest of the session,
/// until [`reconnect`](Self::reconnect) is called.
pub struct FallbackRepository<T: Entity> {
    remote: Option<Arc<dyn Repository<T>>>,
    local: Arc<dyn Repository<T>>,
    remote_active: AtomicBool,
    warnings: Mutex<Vec<Failure>>,
}

/// Runs `$call` against the active store; a network error from the remote
/// store degrades to local and retries there.
macro_rules! routed {
    ($self:ident, $op:literal, |$repo:ident| $call:expr) => {{
        match $self.active_remote() {
            Some($repo) => match $call {
                Err(err) if err.is_network() => {
                    $self.degrade($op, &err);
                    let $repo = $self.local.as_ref();
                    $call
                }
                other => other,
            },
            None => {
                let $repo = $self.local.as_ref();
                $call
            }
        }
    }};
}

impl<T: Entity> FallbackRepository<T> {
    /// Builds the repository and runs store selection once.
    pub async fn connect(
        local: Arc<dyn Repository<T>>,
        remote: Option<Arc<dyn Repository<T>>>,
    ) -> Self {
        let repository = FallbackRepository {
            remote,
            local,
            remote_active: AtomicBool::new(false),
            warnings: Mutex::new(Vec::new()),
        };
        repository.reconnect().await;
        repository
    }

    /// Re-runs store selection (and first-run migration) and returns the
    /// store that is now active.
    pub async fn reconnect(&self) -> ActiveStore {
        let selected = self.select().await;
        self.remote_active
            .store(selected == ActiveStore::Remote, Ordering::SeqCst);
        tracing::info!(domain = T::DOMAIN, store = ?selected, "repository store selected");
        selected
    }

    pub fn active(&self) -> ActiveStore {
        if self.active_remote().is_some() {
            ActiveStore::Remote
        } else {
            ActiveStore::Local
        }
    }

    /// Recoverable problems met during selection, oldest first.
    pub fn warnings(&self) -> Vec<Failure> {
        self.warnings
            .lock()
            .map(|warnings| warnings.clone())
            .unwrap_or_default()
    }

    fn warn(&self, err: &MarginError) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(Failure::from(err));
        }
    }

    fn active_remote(&self) -> Option<&dyn Repository<T>> {
        if self.remote_active.load(Ordering::SeqCst) {
            self.remote.as_deref()
        } else {
            None
        }
    }

    fn degrade(&self, op: &str, err: &MarginError) {
        self.remote_active.store(false, Ordering::SeqCst);
        tracing::warn!(domain = T::DOMAIN, op, error = %err, "remote store failed, using local store");
    }

    async fn select(&self) -> ActiveStore {
        let Some(remote) = self.remote.as_deref() else {
            return ActiveStore::Local;
        };

        if !remote.health_check().await {
            tracing::warn!(domain = T::DOMAIN, "remote store unreachable, using local store");
            return ActiveStore::Local;
        }

        match self.migrate_if_empty(remote).await {
            Ok(0) => ActiveStore::Remote,
            Ok(migrated) => {
                tracing::info!(domain = T::DOMAIN, migrated, "local records migrated to remote store");
                ActiveStore::Remote
            }
            Err(e) => {
                tracing::warn!(domain = T::DOMAIN, error = %e, "migration to remote store failed");
                self.warn(&e);
                ActiveStore::Local
            }
        }
    }

    /// Copies local records to an empty remote store and verifies them.
    /// Returns how many records were migrated.
    async fn migrate_if_empty(&self, remote: &dyn Repository<T>) -> MarginResult<usize> {
        if remote.count().await? > 0 {
            return Ok(0);
        }
        let records = self.local.find_all(None, &FindOptions::default()).await?;
        if records.is_empty() {
            return Ok(0);
        }

        let mut created: Vec<String> = Vec::with_capacity(records.len());
        let outcome = async {
            for record in &records {
                let stored = remote.create(record.clone()).await?;
                created.push(stored.id().to_string());
            }
            verify_migration(remote, &records).await
        }
        .await;

        if let Err(e) = outcome {
            for id in &created {
                if let Err(cleanup) = remote.delete(id).await {
                    tracing::warn!(domain = T::DOMAIN, id = %id, error = %cleanup, "could not roll back migrated record");
                }
            }
            return Err(MarginError::Storage(format!(
                "migrating {} {} records to the remote store failed: {e}",
                records.len(),
                T::DOMAIN
            )));
        }

        Ok(records.len())
    }
}

async fn verify_migration<T: Entity>(
    remote: &dyn Repository<T>,
    records: &[T],
) -> MarginResult<()> {
    let stored = remote.count().await?;
    if stored != records.len() {
        return Err(MarginError::Storage(format!(
            "remote store holds {stored} records, expected {}",
            records.len()
        )));
    }

    for record in records {
        if !remote.contains(record.id()).await? {
            return Err(MarginError::Storage(format!(
                "record '{}' is missing from the remote store",
                record.id()
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl<T: Entity> Repository<T> for FallbackRepository<T> {
    fn backend_name(&self) -> &'static str {
        match self.active_remote() {
            Some(remote) => remote.backend_name(),
            None => self.local.backend_name(),
        }
    }

    async fn find_all(
        &self,
        filter: Option<&RecordFilter<T>>,
        options: &FindOptions,
    ) -> MarginResult<Vec<T>> {
        routed!(self, "find_all", |repo| repo.find_all(filter, options).await)
    }

    async fn find_by_id(&self, id: &str) -> MarginResult<Option<T>> {
        routed!(self, "find_by_id", |repo| repo.find_by_id(id).await)
    }

    async fn create(&self, record: T) -> MarginResult<T> {
        routed!(self, "create", |repo| repo.create(record.clone()).await)
    }

    async fn update(&self, id: &str, patch: &T::Patch) -> MarginResult<T> {
        routed!(self, "update", |repo| repo.update(id, patch).await)
    }

    async fn delete(&self, id: &str) -> MarginResult<()> {
        routed!(self, "delete", |repo| repo.delete(id).await)
    }

    async fn count(&self) -> MarginResult<usize> {
        routed!(self, "count", |repo| repo.count().await)
    }

    async fn exists(&self) -> MarginResult<bool> {
        routed!(self, "exists", |repo| repo.exists().await)
    }

    async fn health_check(&self) -> bool {
        match self.active_remote() {
            Some(remote) => remote.health_check().await,
            None => self.local.health_check().await,
        }
    }
}
