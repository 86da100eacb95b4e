//! The background search worker.
//!
//! Index rebuilds and fuzzy queries over thousands of notes run on one
//! dedicated thread so callers are never blocked. Callers talk to it through
//! a tagged request/response protocol ([`message`]); every request gets
//! exactly one response and requests are handled in send order.
//!
//! Failures never escape the worker: invalid payloads, queries against an
//! uninitialized index and even panics come back as `ERROR` (or failed
//! `INITIALIZED` / `NOTES_UPDATED`) responses.

pub mod handler;
pub mod message;
pub mod service;

pub use handler::SearchHandler;
pub use message::{Request, Response};
pub use service::SearchWorker;
