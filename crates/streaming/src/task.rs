use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use runtime::cancel::{CancelHandle, Cancelled};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Lifecycle of one fetch slot.
///
/// `Created → InProgress → {Finished | Cancelled | Error}`; `Cancelled` and `Error`
/// may go back to `InProgress` on a later pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Created,
    InProgress,
    Finished,
    Cancelled,
    Error,
}

impl TaskStatus {
    pub fn is_retryable(self) -> bool {
        matches!(self, TaskStatus::Cancelled | TaskStatus::Error)
    }
}

/// Why a fetch did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The fetcher observed its cancel handle. Not a failure.
    Cancelled,
    TimedOut(Duration),
    Failed(String),
}

impl FetchError {
    pub fn failed(msg: impl Into<String>) -> Self {
        FetchError::Failed(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Cancelled => write!(f, "fetch cancelled"),
            FetchError::TimedOut(after) => write!(f, "fetch timed out after {after:?}"),
            FetchError::Failed(msg) => write!(f, "fetch failed: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<Cancelled> for FetchError {
    fn from(_: Cancelled) -> Self {
        FetchError::Cancelled
    }
}

/// Injected fetch function.
///
/// `fetch` is called synchronously when a task is issued; the returned future is
/// driven on a spawned task. Implementations check `cancel` at their own safe points
/// and must fail with [`FetchError::Cancelled`] when they stop because of it.
pub trait Fetcher<K>: Send + Sync + 'static {
    type Output: Send + 'static;

    fn fetch(
        &self,
        key: K,
        cancel: CancelHandle,
    ) -> BoxFuture<'static, Result<Self::Output, FetchError>>;
}

/// Result of one fetch attempt, posted back to the task owner.
#[derive(Debug)]
pub struct Completion<K, T> {
    pub key: K,
    pub attempt: u64,
    pub result: Result<T, FetchError>,
}

/// How a completion was applied to its task.
#[derive(Debug, PartialEq)]
pub enum Resolution<T> {
    Finished(T),
    Cancelled,
    Failed(FetchError),
    /// The task was cancelled or re-issued after this attempt started.
    Stale,
}

/// One cancellable fetch slot, keyed by tile coordinate or frame index.
///
/// The task never touches the collection that owns it: completions travel over the
/// owner's channel and are applied with [`FetchTask::resolve`].
#[derive(Debug)]
pub struct FetchTask<K> {
    key: K,
    status: TaskStatus,
    cancel: CancelHandle,
    attempt: u64,
}

impl<K> FetchTask<K>
where
    K: Copy + Send + std::fmt::Display + 'static,
{
    pub fn new(key: K) -> Self {
        Self {
            key,
            status: TaskStatus::Created,
            cancel: CancelHandle::new(),
            attempt: 0,
        }
    }

    pub fn key(&self) -> K {
        self.key
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn is_in_flight(&self) -> bool {
        self.status == TaskStatus::InProgress
    }

    /// Start a new attempt.
    ///
    /// An attempt still in flight is cancelled first, so a key never has two live
    /// attempts. Must be called from within a tokio runtime.
    pub fn fetch<F>(
        &mut self,
        fetcher: &Arc<F>,
        completions: &UnboundedSender<Completion<K, F::Output>>,
        timeout: Option<Duration>,
    ) where
        F: Fetcher<K>,
    {
        if self.is_in_flight() {
            self.cancel.request_cancel();
        }

        self.attempt += 1;
        self.status = TaskStatus::InProgress;
        self.cancel = CancelHandle::new();

        let key = self.key;
        let attempt = self.attempt;
        debug!(key = %key, attempt, "fetch issued");

        let fut = fetcher.fetch(key, self.cancel.clone());
        let tx = completions.clone();
        tokio::spawn(async move {
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::TimedOut(limit)),
                },
                None => fut.await,
            };
            // The owner may have shut down; nobody is left to care.
            let _ = tx.send(Completion {
                key,
                attempt,
                result,
            });
        });
    }

    /// Flip to `Cancelled` and raise the abort signal. Does not wait for the fetch.
    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.cancel.request_cancel();
    }

    /// Apply the outcome of `attempt`.
    pub fn resolve<T>(&mut self, attempt: u64, result: Result<T, FetchError>) -> Resolution<T> {
        if attempt != self.attempt || self.status != TaskStatus::InProgress {
            return Resolution::Stale;
        }
        match result {
            Ok(value) => {
                self.status = TaskStatus::Finished;
                Resolution::Finished(value)
            }
            Err(FetchError::Cancelled) => {
                self.status = TaskStatus::Cancelled;
                Resolution::Cancelled
            }
            Err(err) => {
                self.status = TaskStatus::Error;
                Resolution::Failed(err)
            }
        }
    }
}
