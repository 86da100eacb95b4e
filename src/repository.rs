//! One CRUD contract over every backing store.
//!
//! [`Repository`] is implemented by:
//!
//! - [`local::LocalRepository`]: records kept in a guarded domain of a
//!   [`crate::storage::KeyValueStore`]
//! - [`remote::RemoteRepository`]: records served by an HTTP API
//! - [`fallback::FallbackRepository`]: prefers the remote store and falls
//!   back to the local one when the remote is unconfigured or unreachable
//!
//! Updates are always partial: [`Repository::update`] takes the entity's
//! patch type and merges it onto the stored record (see [`merge_patch`]),
//! so callers never have to resupply fields they are not changing.

pub mod fallback;
pub mod local;
pub mod remote;

use crate::domain::{Note, NotePatch, Notebook, NotebookPatch};
use crate::error::{MarginError, MarginResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

pub use fallback::{ActiveStore, FallbackRepository};
pub use local::LocalRepository;
pub use remote::RemoteRepository;

/// A record type that can live in a repository.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name of the persisted domain (and remote collection).
    const DOMAIN: &'static str;

    type Patch: Serialize + Send + Sync;

    fn id(&self) -> &str;

    /// Gives the record a fresh id when it has none.
    fn assign_id(&mut self);

    /// Bumps the modification timestamp, never below the creation time.
    fn touch(&mut self);

    fn created_at(&self) -> DateTime<Utc>;

    fn updated_at(&self) -> DateTime<Utc>;

    fn validate(&self) -> MarginResult<()>;
}

impl Entity for Note {
    const DOMAIN: &'static str = "notes";

    type Patch = NotePatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn assign_id(&mut self) {
        if self.id.trim().is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.created_at);
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn validate(&self) -> MarginResult<()> {
        Ok(Note::validate(self)?)
    }
}

impl Entity for Notebook {
    const DOMAIN: &'static str = "notebooks";

    type Patch = NotebookPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn assign_id(&mut self) {
        if self.id.trim().is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.created_at);
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn validate(&self) -> MarginResult<()> {
        Ok(Notebook::validate(self)?)
    }
}

/// Predicate applied by [`Repository::find_all`].
pub type RecordFilter<T> = dyn Fn(&T) -> bool + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    CreatedAsc,
    CreatedDesc,
    UpdatedAsc,
    UpdatedDesc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Option<SortOrder>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn sorted(sort: SortOrder) -> Self {
        FindOptions {
            sort: Some(sort),
            ..Default::default()
        }
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Short backend name for logs and diagnostics.
    fn backend_name(&self) -> &'static str;

    async fn find_all(
        &self,
        filter: Option<&RecordFilter<T>>,
        options: &FindOptions,
    ) -> MarginResult<Vec<T>>;

    async fn find_by_id(&self, id: &str) -> MarginResult<Option<T>>;

    /// Stores a new record, assigning an id if it has none.
    async fn create(&self, record: T) -> MarginResult<T>;

    /// Merges `patch` onto the stored record and returns the result.
    async fn update(&self, id: &str, patch: &T::Patch) -> MarginResult<T>;

    async fn delete(&self, id: &str) -> MarginResult<()>;

    async fn count(&self) -> MarginResult<usize>;

    /// Whether the backing domain has been created (locally persisted or
    /// remotely reachable).
    async fn exists(&self) -> MarginResult<bool>;

    async fn contains(&self, id: &str) -> MarginResult<bool> {
        Ok(self.find_by_id(id).await?.is_some())
    }

    /// Confirms the store is operable without touching real records.
    async fn health_check(&self) -> bool;
}

/// Overlays the fields present in `patch` onto `existing`.
///
/// Equivalent to `{ ...existing, ...patch }` on the JSON forms. The id may
/// not change; the result is touched and validated before it is returned.
pub fn merge_patch<T: Entity>(existing: &T, patch: &T::Patch) -> MarginResult<T> {
    let Value::Object(mut merged) = serde_json::to_value(existing)? else {
        return Err(MarginError::Validation(format!(
            "{} record does not serialize to an object",
            T::DOMAIN
        )));
    };
    let Value::Object(fields) = serde_json::to_value(patch)? else {
        return Err(MarginError::Validation("patch must be an object".into()));
    };

    for (field, value) in fields {
        merged.insert(field, value);
    }

    let mut record: T = serde_json::from_value(Value::Object(merged))?;
    if record.id() != existing.id() {
        return Err(MarginError::Validation(format!(
            "patch may not change the id of '{}'",
            existing.id()
        )));
    }

    record.touch();
    record.validate()?;
    Ok(record)
}

/// Applies filter, ordering and paging to an in-memory record set.
pub(crate) fn apply_find<T: Entity>(
    records: Vec<T>,
    filter: Option<&RecordFilter<T>>,
    options: &FindOptions,
) -> Vec<T> {
    let mut records: Vec<T> = match filter {
        Some(keep) => records.into_iter().filter(|record| keep(record)).collect(),
        None => records,
    };

    match options.sort {
        Some(SortOrder::CreatedAsc) => records.sort_by_key(|r| r.created_at()),
        Some(SortOrder::CreatedDesc) => records.sort_by_key(|r| std::cmp::Reverse(r.created_at())),
        Some(SortOrder::UpdatedAsc) => records.sort_by_key(|r| r.updated_at()),
        Some(SortOrder::UpdatedDesc) => records.sort_by_key(|r| std::cmp::Reverse(r.updated_at())),
        None => {}
    }

    records
        .into_iter()
        .skip(options.offset)
        .take(options.limit.unwrap_or(usize::MAX))
        .collect()
}
