//! Collaborators the dashboard consumes: where tasks, earnings and presence
//! come from, how a task gets completed, and what says "look again".

pub mod feed;
pub mod remote;

use std::future::Future;

use thiserror::Error;

use crate::models::{Task, WorkerPresence};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

pub trait TaskSource: Send + Sync + 'static {
    /// The worker's tasks, ordered by deadline ascending.
    fn fetch_tasks(&self, worker_id: &str) -> impl Future<Output = BackendResult<Vec<Task>>> + Send;
}

pub trait EarningsSource: Send + Sync + 'static {
    fn fetch_total_earned(&self, worker_id: &str) -> impl Future<Output = BackendResult<f64>> + Send;
}

pub trait PresenceSource: Send + Sync + 'static {
    fn fetch_presence(&self, worker_id: &str) -> impl Future<Output = BackendResult<WorkerPresence>> + Send;
}

pub trait CompletionWorkflow: Send + Sync + 'static {
    fn complete_task(&self, task: &Task) -> impl Future<Output = BackendResult<()>> + Send;
}

/// Everything the dashboard needs from one store.
pub trait Backend: TaskSource + EarningsSource + PresenceSource + CompletionWorkflow {}

impl<T> Backend for T where T: TaskSource + EarningsSource + PresenceSource + CompletionWorkflow {}

/// Source of "the task set may have changed" signals. `None` ends the feed.
pub trait ChangeFeed: Send + 'static {
    fn next_change(&mut self) -> impl Future<Output = Option<()>> + Send;
}
