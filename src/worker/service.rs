use std::{
    panic::{self, AssertUnwindSafe},
    sync::mpsc::{Sender, channel},
    thread::{self, JoinHandle},
};

use tokio::sync::oneshot;

use crate::{
    domain::Note,
    error::{MarginError, MarginResult},
    search::{FilterCriteria, MatchOptions, SearchResults, query::DEFAULT_LIMIT},
    worker::{
        handler::SearchHandler,
        message::{Request, Response},
    },
};

enum Job {
    Typed(Request, oneshot::Sender<Response>),
    Raw(String, oneshot::Sender<Response>),
}

/// The dedicated background search thread.
///
/// Jobs are handled strictly in send order, so a query sent after an index
/// update is answered against the updated index.
pub struct SearchWorker {
    job_tx: Option<Sender<Job>>,
    worker_thread: Option<JoinHandle<()>>,
}

impl SearchWorker {
    pub fn spawn(matching: MatchOptions) -> MarginResult<Self> {
        Self::spawn_with_limit(matching, DEFAULT_LIMIT)
    }

    pub fn spawn_with_limit(matching: MatchOptions, default_limit: usize) -> MarginResult<Self> {
        let (job_tx, job_rx) = channel::<Job>();
        let mut handler = SearchHandler::new(matching, default_limit);

        let worker_thread = thread::Builder::new()
            .name("margin-search".into())
            .spawn(move || {
                tracing::info!("search worker started");
                while let Ok(job) = job_rx.recv() {
                    let (response, reply) = match job {
                        Job::Typed(request, reply) => {
                            let kind = request.kind();
                            (guarded(kind, || handler.handle(request)), reply)
                        }
                        Job::Raw(raw, reply) => (guarded("raw", || handler.handle_json(&raw)), reply),
                    };
                    // NOTE: the caller may have stopped waiting; nothing to do then
                    let _ = reply.send(response);
                }
                tracing::info!("search worker stopped");
            })?;

        Ok(SearchWorker {
            job_tx: Some(job_tx),
            worker_thread: Some(worker_thread),
        })
    }

    /// Sends a request and waits for its response.
    pub async fn send(&self, request: Request) -> MarginResult<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Job::Typed(request, reply_tx))?;
        reply_rx.await.map_err(|_| stopped())
    }

    /// Sends an undecoded JSON message, the way an embedding UI would.
    pub async fn post_json(&self, raw: impl Into<String>) -> MarginResult<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Job::Raw(raw.into(), reply_tx))?;
        reply_rx.await.map_err(|_| stopped())
    }

    /// Builds the first index. Returns the number of indexed notes.
    pub async fn initialize(&self, notes: Vec<Note>) -> MarginResult<usize> {
        match self.send(Request::Initialize { notes }).await? {
            Response::Initialized {
                success: true,
                notes_count,
                ..
            } => Ok(notes_count),
            other => Err(unexpected(other)),
        }
    }

    /// Replaces the index with one built from `notes`.
    pub async fn update_notes(&self, notes: Vec<Note>) -> MarginResult<usize> {
        match self.send(Request::UpdateNotes { notes }).await? {
            Response::NotesUpdated {
                success: true,
                notes_count,
                ..
            } => Ok(notes_count),
            other => Err(unexpected(other)),
        }
    }

    pub async fn search(&self, query: &str, limit: Option<usize>) -> MarginResult<SearchResults> {
        let request = Request::Search {
            query: query.to_string(),
            limit,
        };
        match self.send(request).await? {
            Response::SearchResults {
                results,
                query,
                total_results,
                search_time,
            } => Ok(SearchResults {
                results,
                query,
                total_results,
                search_time_ms: search_time,
            }),
            other => Err(unexpected(other)),
        }
    }

    pub async fn filter(&self, filters: FilterCriteria) -> MarginResult<Vec<Note>> {
        match self.send(Request::Filter { filters }).await? {
            Response::FilterResults { results, .. } => Ok(results),
            other => Err(unexpected(other)),
        }
    }

    pub fn shutdown(&mut self) {
        // NOTE: dropping the sender ends the receive loop
        self.job_tx.take();

        if let Some(handle) = self.worker_thread.take() {
            let _ = handle.join();
        }
    }

    fn submit(&self, job: Job) -> MarginResult<()> {
        self.job_tx
            .as_ref()
            .ok_or_else(stopped)?
            .send(job)
            .map_err(|_| stopped())
    }
}

impl Drop for SearchWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs a handler step, turning a panic into an `ERROR` response.
fn guarded(kind: &str, step: impl FnOnce() -> Response) -> Response {
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(response) => response,
        Err(_) => {
            tracing::error!(request = kind, "search worker recovered from a panic");
            Response::error(format!("internal failure while handling {kind}"))
        }
    }
}

fn stopped() -> MarginError {
    MarginError::Worker("search worker is not running".into())
}

fn unexpected(response: Response) -> MarginError {
    match response {
        Response::Error { error } => MarginError::Worker(error),
        Response::Initialized { error: Some(error), .. }
        | Response::NotesUpdated { error: Some(error), .. } => MarginError::Validation(error),
        other => MarginError::Worker(format!("unexpected response: {other:?}")),
    }
}
