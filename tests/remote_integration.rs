use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use margin_core::MarginError;
use margin_core::domain::{Note, NotePatch};
use margin_core::error::ErrorKind;
use margin_core::recovery::DomainGuard;
use margin_core::repository::{
    ActiveStore, FallbackRepository, FindOptions, LocalRepository, RemoteRepository, Repository,
};
use margin_core::storage::{KeyValueStore, SqliteStore};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// In-process stand-in for the remote note API.
#[derive(Clone, Default)]
struct FakeApi {
    collections: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    down: Arc<AtomicBool>,
    creates: Arc<AtomicUsize>,
    fail_after_creates: Option<usize>,
}

impl FakeApi {
    fn available(&self) -> Result<(), StatusCode> {
        if self.down.load(Ordering::SeqCst) {
            Err(StatusCode::SERVICE_UNAVAILABLE)
        } else {
            Ok(())
        }
    }

    fn records(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

fn id_of(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

async fn health(State(api): State<FakeApi>) -> StatusCode {
    match api.available() {
        Ok(()) => StatusCode::OK,
        Err(status) => status,
    }
}

async fn list(
    State(api): State<FakeApi>,
    Path(collection): Path<String>,
) -> Result<Json<Vec<Value>>, StatusCode> {
    api.available()?;
    Ok(Json(api.records(&collection)))
}

async fn create(
    State(api): State<FakeApi>,
    Path(collection): Path<String>,
    Json(record): Json<Value>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    api.available()?;
    let created = api.creates.fetch_add(1, Ordering::SeqCst);
    if api.fail_after_creates.is_some_and(|limit| created >= limit) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    api.collections
        .lock()
        .unwrap()
        .entry(collection)
        .or_default()
        .push(record.clone());
    Ok((StatusCode::CREATED, Json(record)))
}

async fn fetch(
    State(api): State<FakeApi>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    api.available()?;
    api.records(&collection)
        .into_iter()
        .find(|record| id_of(record) == Some(id.as_str()))
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn patch(
    State(api): State<FakeApi>,
    Path((collection, id)): Path<(String, String)>,
    Json(fields): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    api.available()?;
    let mut collections = api.collections.lock().unwrap();
    let record = collections
        .get_mut(&collection)
        .and_then(|records| {
            records
                .iter_mut()
                .find(|record| id_of(record) == Some(id.as_str()))
        })
        .ok_or(StatusCode::NOT_FOUND)?;

    let (Some(target), Some(fields)) = (record.as_object_mut(), fields.as_object()) else {
        return Err(StatusCode::BAD_REQUEST);
    };
    for (key, value) in fields {
        target.insert(key.clone(), value.clone());
    }
    Ok(Json(record.clone()))
}

async fn remove(
    State(api): State<FakeApi>,
    Path((collection, id)): Path<(String, String)>,
) -> StatusCode {
    if let Err(status) = api.available() {
        return status;
    }
    let mut collections = api.collections.lock().unwrap();
    let Some(records) = collections.get_mut(&collection) else {
        return StatusCode::NOT_FOUND;
    };
    let before = records.len();
    records.retain(|record| id_of(record) != Some(id.as_str()));
    if records.len() == before {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn serve(api: FakeApi) -> SocketAddr {
    let app = Router::new()
        .route("/health", get(health))
        .route("/:collection", get(list).post(create))
        .route("/:collection/:id", get(fetch).patch(patch).delete(remove))
        .with_state(api);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Accepts connections and never answers.
async fn black_hole() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

fn remote(addr: SocketAddr) -> RemoteRepository<Note> {
    RemoteRepository::new(format!("http://{addr}/"), Duration::from_millis(500)).unwrap()
}

async fn local() -> Result<Arc<LocalRepository<Note>>, MarginError> {
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::in_memory().await?);
    Ok(Arc::new(LocalRepository::new(Arc::new(DomainGuard::new(store)))))
}

#[tokio::test]
async fn remote_repository_speaks_rest() -> Result<(), MarginError> {
    let api = FakeApi::default();
    let repo = remote(serve(api.clone()).await);

    assert!(repo.health_check().await);
    assert!(repo.exists().await?);
    assert_eq!(repo.count().await?, 0);

    let note = repo.create(Note::new("Remote", "body")).await?;
    assert_eq!(repo.find_by_id(&note.id).await?, Some(note.clone()));

    repo.update(&note.id, &NotePatch::content("edited")).await?;
    let updated = repo
        .update(&note.id, &NotePatch::notebook(Some("nb".into())))
        .await?;
    assert_eq!(updated.content, "edited");
    assert_eq!(updated.notebook_id.as_deref(), Some("nb"));
    assert_eq!(updated.title, "Remote");

    repo.delete(&note.id).await?;
    assert_eq!(repo.find_by_id(&note.id).await?, None);
    assert_eq!(repo.delete(&note.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert!(api.records("notes").is_empty());

    Ok(())
}

#[tokio::test]
async fn unresponsive_remote_times_out_as_network_error() -> Result<(), MarginError> {
    let repo = remote(black_hole().await);

    let err = repo
        .find_all(None, &FindOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(!repo.health_check().await);

    Ok(())
}

#[tokio::test]
async fn unreachable_remote_falls_back_to_local() -> Result<(), MarginError> {
    let refused = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let local = local().await?;
    let remote: Arc<dyn Repository<Note>> = Arc::new(remote(refused));

    let repo = FallbackRepository::connect(local.clone(), Some(remote)).await;
    assert_eq!(repo.active(), ActiveStore::Local);

    let note = repo.create(Note::new("Offline", "")).await?;
    assert_eq!(local.find_by_id(&note.id).await?, Some(note));
    assert!(repo.warnings().is_empty());

    Ok(())
}

#[tokio::test]
async fn timed_out_remote_falls_back_to_local() -> Result<(), MarginError> {
    let local = local().await?;
    let remote: Arc<dyn Repository<Note>> = Arc::new(remote(black_hole().await));

    let repo = FallbackRepository::connect(local.clone(), Some(remote)).await;
    assert_eq!(repo.active(), ActiveStore::Local);
    assert_eq!(repo.count().await?, 0);

    Ok(())
}

#[tokio::test]
async fn no_remote_configured_uses_local() -> Result<(), MarginError> {
    let local = local().await?;
    let repo = FallbackRepository::connect(local, None).await;

    assert_eq!(repo.active(), ActiveStore::Local);
    assert_eq!(repo.backend_name(), "sqlite");
    assert!(repo.health_check().await);

    Ok(())
}

#[tokio::test]
async fn first_run_migrates_local_records() -> Result<(), MarginError> {
    let api = FakeApi::default();
    let addr = serve(api.clone()).await;
    let local = local().await?;
    let first = local.create(Note::new("first", "")).await?;
    let second = local.create(Note::new("second", "")).await?;

    let remote: Arc<dyn Repository<Note>> = Arc::new(remote(addr));
    let repo = FallbackRepository::connect(local.clone(), Some(remote)).await;

    assert_eq!(repo.active(), ActiveStore::Remote);
    assert_eq!(repo.backend_name(), "remote");
    let migrated: Vec<_> = api
        .records("notes")
        .iter()
        .filter_map(|record| id_of(record).map(str::to_owned))
        .collect();
    assert_eq!(migrated, vec![first.id.clone(), second.id.clone()]);

    // the remote store is now authoritative
    repo.create(Note::new("third", "")).await?;
    assert_eq!(api.records("notes").len(), 3);
    assert_eq!(local.count().await?, 2);

    // reconnecting does not migrate twice
    assert_eq!(repo.reconnect().await, ActiveStore::Remote);
    assert_eq!(api.records("notes").len(), 3);

    Ok(())
}

#[tokio::test]
async fn failed_migration_rolls_back_and_stays_local() -> Result<(), MarginError> {
    let api = FakeApi {
        fail_after_creates: Some(1),
        ..Default::default()
    };
    let addr = serve(api.clone()).await;
    let local = local().await?;
    local.create(Note::new("first", "")).await?;
    local.create(Note::new("second", "")).await?;

    let remote: Arc<dyn Repository<Note>> = Arc::new(remote(addr));
    let repo = FallbackRepository::connect(local.clone(), Some(remote)).await;

    assert_eq!(repo.active(), ActiveStore::Local);
    assert!(api.records("notes").is_empty());

    let warnings = repo.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind, ErrorKind::Storage);

    // local keeps working
    assert_eq!(repo.count().await?, 2);

    Ok(())
}

#[tokio::test]
async fn remote_outage_degrades_to_local_mid_session() -> Result<(), MarginError> {
    let api = FakeApi::default();
    let addr = serve(api.clone()).await;
    let local = local().await?;

    let remote: Arc<dyn Repository<Note>> = Arc::new(remote(addr));
    let repo = FallbackRepository::connect(local.clone(), Some(remote)).await;
    assert_eq!(repo.active(), ActiveStore::Remote);
    repo.create(Note::new("online", "")).await?;

    api.down.store(true, Ordering::SeqCst);
    let note = repo.create(Note::new("during outage", "")).await?;
    assert_eq!(repo.active(), ActiveStore::Local);
    assert_eq!(local.find_by_id(&note.id).await?, Some(note));
    assert!(repo.warnings().is_empty());

    // still down: selection keeps the local store
    assert_eq!(repo.reconnect().await, ActiveStore::Local);

    api.down.store(false, Ordering::SeqCst);
    assert_eq!(repo.reconnect().await, ActiveStore::Remote);
    assert_eq!(repo.count().await?, 1);

    Ok(())
}

#[tokio::test]
async fn ids_with_reserved_characters_stay_in_one_path_segment() -> Result<(), MarginError> {
    let api = FakeApi::default();
    let repo = remote(serve(api.clone()).await);
    let odd = "a/b?c#d";

    let mut note = Note::new("Odd id", "");
    note.id = odd.into();
    let created = repo.create(note).await?;

    assert_eq!(repo.find_by_id(odd).await?, Some(created));
    assert_eq!(repo.find_by_id("a").await?, None);
    let updated = repo.update(odd, &NotePatch::content("edited")).await?;
    assert_eq!(updated.content, "edited");

    repo.delete(odd).await?;
    assert!(api.records("notes").is_empty());

    Ok(())
}

#[test]
fn unusable_base_urls_are_rejected() {
    for base in ["not a url", "mailto:someone@example.com"] {
        let err = RemoteRepository::<Note>::new(base, Duration::from_secs(1))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation, "{base} accepted");
    }
}
