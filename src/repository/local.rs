use crate::error::{MarginError, MarginResult};
use crate::recovery::DomainGuard;
use crate::repository::{Entity, FindOptions, RecordFilter, Repository, apply_find, merge_patch};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;

/// Repository over one guarded domain of the local key-value store.
///
/// Every mutation is a read-modify-write of the whole domain under the
/// domain lock, so concurrent partial updates apply one after the other.
pub struct LocalRepository<T> {
    guard: Arc<DomainGuard>,
    _records: PhantomData<fn() -> T>,
}

impl<T: Entity> LocalRepository<T> {
    pub fn new(guard: Arc<DomainGuard>) -> Self {
        LocalRepository {
            guard,
            _records: PhantomData,
        }
    }

    pub fn guard(&self) -> &Arc<DomainGuard> {
        &self.guard
    }

    async fn load(&self) -> MarginResult<Vec<T>> {
        self.guard.read::<T>(T::DOMAIN).await
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for LocalRepository<T> {
    fn backend_name(&self) -> &'static str {
        self.guard.store_name()
    }

    async fn find_all(
        &self,
        filter: Option<&RecordFilter<T>>,
        options: &FindOptions,
    ) -> MarginResult<Vec<T>> {
        Ok(apply_find(self.load().await?, filter, options))
    }

    async fn find_by_id(&self, id: &str) -> MarginResult<Option<T>> {
        Ok(self.load().await?.into_iter().find(|record| record.id() == id))
    }

    async fn create(&self, mut record: T) -> MarginResult<T> {
        record.assign_id();
        record.validate()?;

        let _domain = self.guard.lock_domain(T::DOMAIN).await;
        let mut records = self.load().await?;
        if records.iter().any(|existing| existing.id() == record.id()) {
            return Err(MarginError::Validation(format!(
                "{} record '{}' already exists",
                T::DOMAIN,
                record.id()
            )));
        }

        records.push(record.clone());
        self.guard.write(T::DOMAIN, &records).await?;
        tracing::debug!(domain = T::DOMAIN, id = record.id(), "record created");
        Ok(record)
    }

    async fn update(&self, id: &str, patch: &T::Patch) -> MarginResult<T> {
        let _domain = self.guard.lock_domain(T::DOMAIN).await;
        let mut records = self.load().await?;
        let slot = records
            .iter_mut()
            .find(|record| record.id() == id)
            .ok_or_else(|| MarginError::NotFound(format!("{} record '{id}'", T::DOMAIN)))?;

        let merged = merge_patch(slot, patch)?;
        *slot = merged.clone();
        self.guard.write(T::DOMAIN, &records).await?;
        tracing::debug!(domain = T::DOMAIN, id, "record updated");
        Ok(merged)
    }

    async fn delete(&self, id: &str) -> MarginResult<()> {
        let _domain = self.guard.lock_domain(T::DOMAIN).await;
        let mut records = self.load().await?;
        let before = records.len();
        records.retain(|record| record.id() != id);

        if records.len() == before {
            return Err(MarginError::NotFound(format!("{} record '{id}'", T::DOMAIN)));
        }

        self.guard.write(T::DOMAIN, &records).await?;
        tracing::debug!(domain = T::DOMAIN, id, "record deleted");
        Ok(())
    }

    async fn count(&self) -> MarginResult<usize> {
        Ok(self.load().await?.len())
    }

    async fn exists(&self) -> MarginResult<bool> {
        self.guard.exists(T::DOMAIN).await
    }

    async fn health_check(&self) -> bool {
        match self.guard.probe().await {
            Ok(healthy) => healthy,
            Err(e) => {
                tracing::warn!(backend = self.backend_name(), error = %e, "local health check failed");
                false
            }
        }
    }
}
