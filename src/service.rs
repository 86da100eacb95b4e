//! The application-level entry point.
//!
//! [`NoteService`] is constructed explicitly by the application and owns
//! every long-lived component: the backing store, the recovery guard, the
//! note and notebook repositories, the search worker and the plugin
//! registry. [`NoteService::init`] wires them in dependency order and
//! [`NoteService::dispose`] tears them down in reverse.

use crate::config::{AppConfig, StorageBackend};
use crate::domain::{
    Note, NoteError, NotePatch, Notebook, NotebookMigration, NotebookPatch, migrate_notebook_refs,
    normalize_tags, validate_tree,
};
use crate::error::{ErrorKind, Failure, MarginError, MarginResult};
use crate::plugin::PluginRegistry;
use crate::recovery::{DomainGuard, DomainHealth};
use crate::repository::{
    ActiveStore, Entity, FallbackRepository, FindOptions, LocalRepository, RecordFilter,
    RemoteRepository, Repository, merge_patch,
};
use crate::search::{FilterCriteria, SearchResults, intersect_hits};
use crate::storage::{FileStore, KeyValueStore, SqliteStore};
use crate::worker::SearchWorker;
use std::sync::Arc;

const NOTEBOOK_MIGRATION_KEY: &str = "meta:notebook-migration";

pub struct NoteService {
    config: AppConfig,
    store: Arc<dyn KeyValueStore>,
    guard: Arc<DomainGuard>,
    notes: Arc<FallbackRepository<Note>>,
    notebooks: Arc<FallbackRepository<Notebook>>,
    worker: Option<SearchWorker>,
    plugins: PluginRegistry,
    migration: NotebookMigration,
}

impl NoteService {
    /// Opens the configured backing store and boots the service on it.
    pub async fn init(config: AppConfig) -> MarginResult<Self> {
        let store: Arc<dyn KeyValueStore> = match config.storage.backend {
            StorageBackend::File => Arc::new(FileStore::open(&config.storage.data_dir).await?),
            StorageBackend::Sqlite => Arc::new(SqliteStore::open(&config.storage.db_path()).await?),
        };
        Self::init_with_store(config, store).await
    }

    /// Boots the service on an already opened store.
    pub async fn init_with_store(
        config: AppConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> MarginResult<Self> {
        let guard = Arc::new(DomainGuard::with_capacity(
            store.clone(),
            config.storage.backup_capacity,
        ));

        let notes = Arc::new(Self::repository::<Note>(&config, &guard).await?);
        let notebooks = Arc::new(Self::repository::<Notebook>(&config, &guard).await?);

        let worker = SearchWorker::spawn_with_limit(
            config.search.matching(),
            config.search.default_limit,
        )?;

        let mut service = NoteService {
            config,
            store,
            guard,
            notes,
            notebooks,
            worker: Some(worker),
            plugins: PluginRegistry::new(),
            migration: NotebookMigration::default(),
        };

        service.migration = degraded(
            service.migrate_notebook_references_once().await,
            "notebook migration",
        )?;
        let snapshot = degraded(service.indexable_notes().await, "search index seeding")?;
        let indexed = service.worker()?.initialize(snapshot).await?;
        tracing::info!(
            store = service.store.name(),
            notes = service.notes.backend_name(),
            indexed,
            "note service ready"
        );

        Ok(service)
    }

    async fn repository<T: Entity>(
        config: &AppConfig,
        guard: &Arc<DomainGuard>,
    ) -> MarginResult<FallbackRepository<T>> {
        let local: Arc<dyn Repository<T>> = Arc::new(LocalRepository::<T>::new(guard.clone()));
        let remote: Option<Arc<dyn Repository<T>>> = match config.remote.active_url() {
            Some(url) => Some(Arc::new(RemoteRepository::<T>::new(
                url,
                config.remote.timeout(),
            )?)),
            None => None,
        };
        Ok(FallbackRepository::connect(local, remote).await)
    }

    /// Activates `registry`'s plugins against this service's capabilities.
    /// Returns the plugins that failed, which stay inactive.
    pub async fn activate_plugins(&mut self, registry: PluginRegistry) -> Vec<(String, Failure)> {
        self.plugins = registry;
        let notes: Arc<dyn Repository<Note>> = self.notes.clone();
        self.plugins.activate_all(notes, self.store.clone()).await
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Deactivates plugins and stops the search worker.
    pub async fn dispose(mut self) {
        self.plugins.deactivate_all().await;
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        tracing::info!("note service disposed");
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn notes(&self) -> Arc<FallbackRepository<Note>> {
        self.notes.clone()
    }

    pub fn notebooks(&self) -> Arc<FallbackRepository<Notebook>> {
        self.notebooks.clone()
    }

    pub fn guard(&self) -> &Arc<DomainGuard> {
        &self.guard
    }

    pub fn active_store(&self) -> ActiveStore {
        self.notes.active()
    }

    /// Recoverable problems from store selection, across both domains.
    pub fn warnings(&self) -> Vec<Failure> {
        let mut warnings = self.notes.warnings();
        warnings.extend(self.notebooks.warnings());
        warnings
    }

    pub fn domain_health(&self, domain: &str) -> DomainHealth {
        self.guard.health(domain)
    }

    /// The result of the bootstrap notebook reference migration.
    pub fn notebook_migration(&self) -> &NotebookMigration {
        &self.migration
    }

    /// The payload of `domain` exactly as stored, for export before
    /// [`reinitialize_domain`](Self::reinitialize_domain).
    pub async fn raw_payload(&self, domain: &str) -> MarginResult<Option<String>> {
        self.guard.raw_payload(known_domain(domain)?).await
    }

    /// Resets a domain that could not be recovered to empty and reruns the
    /// bootstrap steps it blocked.
    pub async fn reinitialize_domain(&mut self, domain: &str) -> MarginResult<()> {
        self.guard.reinitialize(known_domain(domain)?).await?;

        if self.store.get(NOTEBOOK_MIGRATION_KEY).await?.is_none() {
            self.migration = degraded(
                self.migrate_notebook_references_once().await,
                "notebook migration",
            )?;
        }
        let snapshot = degraded(self.indexable_notes().await, "search index seeding")?;
        self.worker()?.update_notes(snapshot).await?;
        Ok(())
    }

    fn worker(&self) -> MarginResult<&SearchWorker> {
        self.worker
            .as_ref()
            .ok_or_else(|| MarginError::Worker("search worker is not running".into()))
    }

    async fn indexable_notes(&self) -> MarginResult<Vec<Note>> {
        let live: &RecordFilter<Note> = &|note: &Note| !note.is_trashed;
        self.notes.find_all(Some(live), &FindOptions::default()).await
    }

    /// Rebuilds the search index from the current (non-trashed) notes.
    pub async fn refresh_index(&self) -> MarginResult<usize> {
        let notes = self.indexable_notes().await?;
        self.worker()?.update_notes(notes).await
    }

    async fn ensure_notebook(&self, notebook_id: Option<&str>) -> MarginResult<()> {
        match notebook_id {
            Some(id) if !self.notebooks.contains(id).await? => {
                Err(NoteError::UnknownNotebook(id.to_string()).into())
            }
            _ => Ok(()),
        }
    }

    pub async fn create_note(&self, mut note: Note) -> MarginResult<Note> {
        note.tags = normalize_tags(std::mem::take(&mut note.tags));
        self.ensure_notebook(note.notebook_id.as_deref()).await?;

        let created = self.notes.create(note).await?;
        self.refresh_index().await?;
        Ok(created)
    }

    pub async fn update_note(&self, id: &str, patch: NotePatch) -> MarginResult<Note> {
        if let Some(Some(notebook_id)) = &patch.notebook_id {
            self.ensure_notebook(Some(notebook_id)).await?;
        }

        let updated = self.notes.update(id, &patch).await?;
        self.refresh_index().await?;
        Ok(updated)
    }

    /// Moves a note to the trash. Trashed notes are kept but not searchable.
    pub async fn trash_note(&self, id: &str) -> MarginResult<Note> {
        self.update_note(id, NotePatch::trashed(true)).await
    }

    pub async fn restore_note(&self, id: &str) -> MarginResult<Note> {
        self.update_note(id, NotePatch::trashed(false)).await
    }

    /// Removes a note permanently.
    pub async fn delete_note(&self, id: &str) -> MarginResult<()> {
        self.notes.delete(id).await?;
        self.refresh_index().await?;
        Ok(())
    }

    pub async fn trashed_notes(&self) -> MarginResult<Vec<Note>> {
        let trashed: &RecordFilter<Note> = &|note: &Note| note.is_trashed;
        self.notes.find_all(Some(trashed), &FindOptions::default()).await
    }

    pub async fn create_notebook(&self, notebook: Notebook) -> MarginResult<Notebook> {
        let mut tree = self.notebooks.find_all(None, &FindOptions::default()).await?;
        tree.push(notebook.clone());
        validate_tree(&tree)?;

        self.notebooks.create(notebook).await
    }

    /// Applies `patch`, rejecting renames that collide with a sibling and
    /// reparenting that would create a cycle.
    pub async fn update_notebook(&self, id: &str, patch: NotebookPatch) -> MarginResult<Notebook> {
        let mut tree = self.notebooks.find_all(None, &FindOptions::default()).await?;
        let Some(slot) = tree.iter_mut().find(|nb| nb.id == id) else {
            return Err(MarginError::NotFound(format!("notebooks record '{id}'")));
        };
        *slot = merge_patch(slot, &patch)?;
        validate_tree(&tree)?;

        self.notebooks.update(id, &patch).await
    }

    /// Deletes an empty-of-children notebook and detaches its notes.
    pub async fn delete_notebook(&self, id: &str) -> MarginResult<()> {
        let tree = self.notebooks.find_all(None, &FindOptions::default()).await?;
        if tree.iter().any(|nb| nb.parent_id.as_deref() == Some(id)) {
            return Err(MarginError::Validation(format!(
                "notebook '{id}' still has child notebooks"
            )));
        }

        let owner = id.to_string();
        let in_notebook: &RecordFilter<Note> =
            &move |note: &Note| note.notebook_id.as_deref() == Some(owner.as_str());
        let members = self
            .notes
            .find_all(Some(in_notebook), &FindOptions::default())
            .await?;
        for note in &members {
            self.notes.update(&note.id, &NotePatch::notebook(None)).await?;
        }

        self.notebooks.delete(id).await?;
        if !members.is_empty() {
            self.refresh_index().await?;
        }
        Ok(())
    }

    pub async fn search(&self, query: &str, limit: Option<usize>) -> MarginResult<SearchResults> {
        self.worker()?.search(query, limit).await
    }

    pub async fn filter(&self, criteria: FilterCriteria) -> MarginResult<Vec<Note>> {
        self.worker()?.filter(criteria).await
    }

    /// Fuzzy search restricted to notes that also satisfy `criteria`.
    ///
    /// `total_results` counts the hits left after filtering, before `limit`.
    pub async fn search_filtered(
        &self,
        query: &str,
        criteria: &FilterCriteria,
        limit: Option<usize>,
    ) -> MarginResult<SearchResults> {
        let mut results = self.worker()?.search(query, Some(usize::MAX)).await?;
        let hits = intersect_hits(std::mem::take(&mut results.results), criteria);

        results.total_results = hits.len();
        results.results = hits
            .into_iter()
            .take(limit.unwrap_or(self.config.search.default_limit))
            .collect();
        Ok(results)
    }

    /// Rewrites name-based notebook references on notes into notebook ids.
    ///
    /// Safe to call again; references already holding an id are skipped.
    pub async fn migrate_notebook_references(&self) -> MarginResult<NotebookMigration> {
        let mut notes = self.notes.find_all(None, &FindOptions::default()).await?;
        let notebooks = self.notebooks.find_all(None, &FindOptions::default()).await?;

        let report = migrate_notebook_refs(&mut notes, &notebooks);
        for id in &report.migrated {
            let Some(note) = notes.iter().find(|note| &note.id == id) else {
                continue;
            };
            self.notes
                .update(id, &NotePatch::notebook(note.notebook_id.clone()))
                .await?;
        }

        if !report.migrated.is_empty() || !report.unresolved.is_empty() {
            tracing::info!(
                migrated = report.migrated.len(),
                unresolved = report.unresolved.len(),
                "notebook references migrated"
            );
        }
        Ok(report)
    }

    async fn migrate_notebook_references_once(&self) -> MarginResult<NotebookMigration> {
        if let Some(previous) = self.store.get(NOTEBOOK_MIGRATION_KEY).await? {
            tracing::debug!(report = %previous, "notebook migration already done");
            return Ok(NotebookMigration::default());
        }

        let report = self.migrate_notebook_references().await?;
        self.store
            .set(NOTEBOOK_MIGRATION_KEY, &serde_json::to_string(&report)?)
            .await?;
        Ok(report)
    }
}

fn known_domain(domain: &str) -> MarginResult<&str> {
    if domain == Note::DOMAIN || domain == Notebook::DOMAIN {
        Ok(domain)
    } else {
        Err(MarginError::Validation(format!("unknown domain '{domain}'")))
    }
}

/// Lets bootstrap continue past a domain that could not be recovered. The
/// domain stays `Failed` until the caller reinitializes it.
fn degraded<T: Default>(result: MarginResult<T>, step: &str) -> MarginResult<T> {
    match result {
        Err(e) if e.kind() == ErrorKind::Corruption => {
            tracing::warn!(step, error = %e, "skipped while a domain is unrecoverable");
            Ok(T::default())
        }
        other => other,
    }
}
