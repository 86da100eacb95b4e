use async_trait::async_trait;
use margin_core::MarginError;
use margin_core::config::AppConfig;
use margin_core::domain::{Note, NoteError, NotePatch, Notebook, NotebookPatch};
use margin_core::error::ErrorKind;
use margin_core::plugin::{Plugin, PluginContext, PluginRegistry};
use margin_core::recovery::DomainHealth;
use margin_core::repository::{ActiveStore, Repository};
use margin_core::search::FilterCriteria;
use margin_core::service::NoteService;
use margin_core::storage::{KeyValueStore, SqliteStore};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

async fn in_memory() -> Result<(Arc<dyn KeyValueStore>, NoteService), MarginError> {
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::in_memory().await?);
    let service = NoteService::init_with_store(AppConfig::default(), store.clone()).await?;
    Ok((store, service))
}

#[tokio::test]
async fn boots_on_the_file_store() -> Result<(), MarginError> {
    let tmpdir = TempDir::new().unwrap();
    let service = NoteService::init(AppConfig::in_dir(tmpdir.path())).await?;

    assert_eq!(service.active_store(), ActiveStore::Local);
    assert_eq!(service.notes().backend_name(), "file");
    assert!(service.warnings().is_empty());

    let note = service.create_note(Note::new("On disk", "")).await?;
    service.dispose().await;

    let service = NoteService::init(AppConfig::in_dir(tmpdir.path())).await?;
    assert_eq!(service.notes().find_by_id(&note.id).await?, Some(note));
    let results = service.search("disk", None).await?;
    assert_eq!(results.total_results, 1);

    Ok(())
}

#[tokio::test]
async fn edits_are_searchable_immediately() -> Result<(), MarginError> {
    let (_store, service) = in_memory().await?;

    let note = service
        .create_note(Note::new("Quarterly report", "numbers"))
        .await?;
    assert_eq!(service.search("quarterly", None).await?.total_results, 1);

    service
        .update_note(&note.id, NotePatch::title("Budget"))
        .await?;
    assert_eq!(service.search("quarterly", None).await?.total_results, 0);
    let results = service.search("budget", None).await?;
    assert_eq!(results.results[0].note.content, "numbers");

    Ok(())
}

#[tokio::test]
async fn trashed_notes_leave_the_index() -> Result<(), MarginError> {
    let (_store, service) = in_memory().await?;
    let note = service.create_note(Note::new("Old idea", "")).await?;

    service.trash_note(&note.id).await?;
    assert_eq!(service.search("idea", None).await?.total_results, 0);
    assert_eq!(service.trashed_notes().await?.len(), 1);

    service.restore_note(&note.id).await?;
    assert_eq!(service.search("idea", None).await?.total_results, 1);
    assert!(service.trashed_notes().await?.is_empty());

    service.delete_note(&note.id).await?;
    assert_eq!(service.search("idea", None).await?.total_results, 0);
    assert_eq!(service.notes().count().await?, 0);

    Ok(())
}

#[tokio::test]
async fn notes_must_reference_existing_notebooks() -> Result<(), MarginError> {
    let (_store, service) = in_memory().await?;

    let err = service
        .create_note(Note::new("Lost", "").in_notebook("nowhere"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MarginError::Note(NoteError::UnknownNotebook(_))
    ));

    let work = service.create_notebook(Notebook::new("Work")).await?;
    let note = service
        .create_note(Note::new("Found", "").in_notebook(&work.id))
        .await?;

    let err = service
        .update_note(&note.id, NotePatch::notebook(Some("nowhere".into())))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    Ok(())
}

#[tokio::test]
async fn notebook_tree_rules_are_enforced() -> Result<(), MarginError> {
    let (_store, service) = in_memory().await?;

    let root = service.create_notebook(Notebook::new("Projects")).await?;
    let child = service
        .create_notebook(Notebook::new("Garden").with_parent(&root.id))
        .await?;

    let err = service
        .create_notebook(Notebook::new(" Garden ").with_parent(&root.id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MarginError::Note(NoteError::DuplicateNotebookName(_))
    ));

    let reparent = NotebookPatch {
        parent_id: Some(Some(child.id.clone())),
        ..Default::default()
    };
    let err = service.update_notebook(&root.id, reparent).await.unwrap_err();
    assert!(matches!(err, MarginError::Note(NoteError::NotebookCycle(_))));

    let rename = NotebookPatch {
        name: Some("Backyard".into()),
        ..Default::default()
    };
    assert_eq!(service.update_notebook(&child.id, rename).await?.name, "Backyard");

    // parent with children cannot go first
    let err = service.delete_notebook(&root.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    Ok(())
}

#[tokio::test]
async fn deleting_a_notebook_detaches_its_notes() -> Result<(), MarginError> {
    let (_store, service) = in_memory().await?;
    let inbox = service.create_notebook(Notebook::new("Inbox")).await?;
    let note = service
        .create_note(Note::new("Filed", "").in_notebook(&inbox.id))
        .await?;

    service.delete_notebook(&inbox.id).await?;

    let stored = service.notes().find_by_id(&note.id).await?.unwrap();
    assert_eq!(stored.notebook_id, None);
    assert_eq!(service.notebooks().count().await?, 0);

    Ok(())
}

#[tokio::test]
async fn filtered_search_counts_after_filtering() -> Result<(), MarginError> {
    let (_store, service) = in_memory().await?;
    for (title, tag) in [
        ("Meeting with design", "work"),
        ("Meeting with bank", "home"),
        ("Meeting retro", "work"),
        ("Meeting prep", "work"),
    ] {
        service
            .create_note(Note::new(title, "").with_tags([tag]))
            .await?;
    }

    let work = FilterCriteria::default().with_tags(["work"]);
    let results = service.search_filtered("meeting", &work, Some(2)).await?;
    assert_eq!(results.total_results, 3);
    assert_eq!(results.results.len(), 2);
    assert!(
        results
            .results
            .iter()
            .all(|hit| hit.note.tags == vec!["work"])
    );

    let home = service.filter(FilterCriteria::default().with_tags(["home"])).await?;
    assert_eq!(home.len(), 1);

    Ok(())
}

#[tokio::test]
async fn legacy_notebook_names_migrate_once_at_startup() -> Result<(), MarginError> {
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::in_memory().await?);

    let work = Notebook::new("Work");
    let mut legacy = serde_json::to_value(Note::new("Old note", ""))?;
    legacy["notebook"] = json!("Work");
    let mut stray = serde_json::to_value(Note::new("Stray note", ""))?;
    stray["notebook"] = json!("Nowhere");

    store
        .set("notebooks", &serde_json::to_string(&[&work])?)
        .await?;
    store
        .set("notes", &Value::Array(vec![legacy.clone(), stray.clone()]).to_string())
        .await?;

    let service = NoteService::init_with_store(AppConfig::default(), store.clone()).await?;
    let report = service.notebook_migration().clone();
    assert_eq!(report.migrated, vec![legacy["id"].as_str().unwrap()]);
    assert_eq!(report.unresolved, vec![stray["id"].as_str().unwrap()]);

    let migrated = service
        .notes()
        .find_by_id(legacy["id"].as_str().unwrap())
        .await?
        .unwrap();
    assert_eq!(migrated.notebook_id.as_deref(), Some(work.id.as_str()));
    assert_eq!(migrated.legacy_notebook(), None);
    assert!(store.get("meta:notebook-migration").await?.is_some());
    service.dispose().await;

    let service = NoteService::init_with_store(AppConfig::default(), store).await?;
    assert!(service.notebook_migration().migrated.is_empty());
    assert!(service.notebook_migration().unresolved.is_empty());

    Ok(())
}

#[tokio::test]
async fn corrupted_notes_recover_during_startup() -> Result<(), MarginError> {
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::in_memory().await?);
    let service = NoteService::init_with_store(AppConfig::default(), store.clone()).await?;
    let note = service.create_note(Note::new("Precious", "")).await?;
    service.dispose().await;

    store.set("notes", "corrupted json data{[").await?;

    let service = NoteService::init_with_store(AppConfig::default(), store).await?;
    assert_eq!(service.domain_health("notes"), DomainHealth::Healthy);
    assert_eq!(service.notes().find_by_id(&note.id).await?, Some(note));
    assert_eq!(service.search("precious", None).await?.total_results, 1);

    Ok(())
}

#[tokio::test]
async fn unrecoverable_domain_boots_degraded() -> Result<(), MarginError> {
    let corrupt = "corrupted json data{[";
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::in_memory().await?);
    store.set("notes", corrupt).await?;

    let mut service = NoteService::init_with_store(AppConfig::default(), store.clone()).await?;
    assert_eq!(service.domain_health("notes"), DomainHealth::Failed);
    assert_eq!(service.domain_health("notebooks"), DomainHealth::Healthy);
    assert_eq!(service.search("anything", None).await?.total_results, 0);
    assert_eq!(service.raw_payload("notes").await?.as_deref(), Some(corrupt));
    assert!(store.get("meta:notebook-migration").await?.is_none());

    // the healthy domain keeps working, the failed one keeps reporting it
    service.create_notebook(Notebook::new("Still usable")).await?;
    let err = service.notes().count().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corruption);

    service.reinitialize_domain("notes").await?;
    assert_eq!(service.domain_health("notes"), DomainHealth::Healthy);
    assert!(store.get("meta:notebook-migration").await?.is_some());

    service.create_note(Note::new("Fresh start", "")).await?;
    assert_eq!(service.search("fresh", None).await?.total_results, 1);

    let err = service.reinitialize_domain("settings").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    Ok(())
}

struct Journal {
    deactivated: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Plugin for Journal {
    fn id(&self) -> &str {
        "journal"
    }

    async fn activate(&self, context: &PluginContext) -> Result<(), MarginError> {
        context.storage.set("last-run", "today").await?;
        context
            .notes
            .create(Note::new("Journal entry", "written by a plugin"))
            .await?;
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), MarginError> {
        self.deactivated.lock().unwrap().push(self.id().to_string());
        Ok(())
    }
}

struct Broken;

#[async_trait]
impl Plugin for Broken {
    fn id(&self) -> &str {
        "broken"
    }

    async fn activate(&self, _context: &PluginContext) -> Result<(), MarginError> {
        Err(MarginError::Validation("missing settings".into()))
    }
}

#[tokio::test]
async fn plugins_activate_in_isolation() -> Result<(), MarginError> {
    let (store, mut service) = in_memory().await?;
    let deactivated = Arc::new(Mutex::new(Vec::new()));

    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(Broken))?;
    registry.register(Arc::new(Journal {
        deactivated: deactivated.clone(),
    }))?;
    let err = registry.register(Arc::new(Broken)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(registry.len(), 2);

    let failures = service.activate_plugins(registry).await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "broken");
    assert_eq!(failures[0].1.kind, ErrorKind::Validation);
    assert_eq!(service.plugins().active(), ["journal".to_string()]);

    assert_eq!(
        store.get("plugin:journal:last-run").await?.as_deref(),
        Some("today")
    );
    service.refresh_index().await?;
    assert_eq!(service.search("journal", None).await?.total_results, 1);

    service.dispose().await;
    assert_eq!(*deactivated.lock().unwrap(), vec!["journal".to_string()]);

    Ok(())
}
