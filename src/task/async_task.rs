//! Single-assignment task with completion callbacks.
//!
//! An [`AsyncTask`] holds exactly one outcome: a value, a failure, or a
//! cancellation. It is run at most once, either by a [`Worker`](super::Worker)
//! draining its queue or by code holding a deferred task and calling
//! [`complete`](AsyncTask::complete) / [`fail`](AsyncTask::fail).
//!
//! Callbacks registered with [`on_complete`](AsyncTask::on_complete) fire once,
//! in registration order, on whichever task performs the completion step. A
//! callback registered after completion fires immediately on the caller.
//!
//! # Example
//!
//! ```
//! use clipwire::task::AsyncTask;
//!
//! let task = AsyncTask::deferred();
//! task.on_complete(|t| assert_eq!(t.try_get().unwrap().unwrap(), 7));
//! assert!(task.complete(7));
//! assert!(!task.complete(8)); // already completed
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::BoxFuture;
use crate::error::{Error, Result};

type Work<V> = Box<dyn FnOnce() -> BoxFuture<'static, Result<V>> + Send>;
type Callback<V> = Box<dyn FnOnce(&AsyncTask<V>) + Send>;

/// Observable lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not started (or deferred, waiting for an external completion).
    Pending,
    /// Work is executing.
    Running,
    /// Finished with a value.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before it ran.
    Cancelled,
}

impl TaskState {
    /// Whether this state is final.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

enum Slot<V> {
    Pending { work: Option<Work<V>> },
    Running,
    Completed(V),
    Failed(Arc<Error>),
    Cancelled,
}

impl<V> Slot<V> {
    fn state(&self) -> TaskState {
        match self {
            Slot::Pending { .. } => TaskState::Pending,
            Slot::Running => TaskState::Running,
            Slot::Completed(_) => TaskState::Completed,
            Slot::Failed(_) => TaskState::Failed,
            Slot::Cancelled => TaskState::Cancelled,
        }
    }
}

struct Guarded<V> {
    slot: Slot<V>,
    callbacks: Vec<Callback<V>>,
}

struct Inner<V> {
    guarded: Mutex<Guarded<V>>,
    done: watch::Sender<bool>,
}

/// Handle to a single-assignment asynchronous result.
///
/// Cloning the handle is cheap; all clones observe the same outcome.
pub struct AsyncTask<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for AsyncTask<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> fmt::Debug for AsyncTask<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTask")
            .field("state", &self.inner.guarded.lock().slot.state())
            .finish()
    }
}

impl<V: Clone + Send + 'static> AsyncTask<V> {
    fn with_slot(slot: Slot<V>) -> Self {
        let (done, _) = watch::channel(slot.state().is_terminal());
        Self {
            inner: Arc::new(Inner {
                guarded: Mutex::new(Guarded {
                    slot,
                    callbacks: Vec::new(),
                }),
                done,
            }),
        }
    }

    /// Create a pending task that will execute `work` when run.
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let work: Work<V> = Box::new(move || Box::pin(work()) as BoxFuture<'static, Result<V>>);
        Self::with_slot(Slot::Pending { work: Some(work) })
    }

    /// Create a pending task with no work; it finishes only through
    /// [`complete`](Self::complete), [`fail`](Self::fail) or [`cancel`](Self::cancel).
    pub fn deferred() -> Self {
        Self::with_slot(Slot::Pending { work: None })
    }

    /// Create a task that is already completed with `value`.
    pub fn completed(value: V) -> Self {
        Self::with_slot(Slot::Completed(value))
    }

    /// Create a task that has already failed with `error`.
    pub fn failed(error: Error) -> Self {
        Self::with_slot(Slot::Failed(Arc::new(error)))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.inner.guarded.lock().slot.state()
    }

    /// Whether the task reached a terminal state.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Execute the task's work on the calling task and record its outcome.
    ///
    /// Returns `false` without doing anything if the task is not pending,
    /// has no work attached, or was cancelled.
    pub async fn run(&self) -> bool {
        let work = {
            let mut guarded = self.inner.guarded.lock();
            let work = match &mut guarded.slot {
                Slot::Pending { work } => work.take(),
                _ => None,
            };
            match work {
                Some(work) => {
                    guarded.slot = Slot::Running;
                    work
                }
                None => return false,
            }
        };

        match work().await {
            Ok(value) => self.complete(value),
            Err(e) => self.fail(e),
        };
        true
    }

    /// Record a value. Returns `false` if the task was already terminal.
    pub fn complete(&self, value: V) -> bool {
        self.finish(Slot::Completed(value), false)
    }

    /// Record a failure. Returns `false` if the task was already terminal.
    pub fn fail(&self, error: Error) -> bool {
        let error = match error {
            Error::TaskFailed(inner) => inner,
            other => Arc::new(other),
        };
        self.finish(Slot::Failed(error), false)
    }

    /// Cancel a task that has not started running.
    ///
    /// Cancellation is terminal and still fires the completion callbacks.
    /// Returns `false` if the task is running or already terminal; a running
    /// task is never interrupted.
    pub fn cancel(&self) -> bool {
        self.finish(Slot::Cancelled, true)
    }

    fn finish(&self, outcome: Slot<V>, only_pending: bool) -> bool {
        let callbacks = {
            let mut guarded = self.inner.guarded.lock();
            let state = guarded.slot.state();
            if state.is_terminal() || (only_pending && state != TaskState::Pending) {
                return false;
            }
            guarded.slot = outcome;
            std::mem::take(&mut guarded.callbacks)
        };

        self.inner.done.send_replace(true);
        for callback in callbacks {
            callback(self);
        }
        true
    }

    /// Register a callback fired once with the finished task.
    ///
    /// If the task is already terminal the callback runs immediately on the
    /// calling task.
    pub fn on_complete<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&AsyncTask<V>) + Send + 'static,
    {
        let callback: Callback<V> = Box::new(callback);
        let fire_now = {
            let mut guarded = self.inner.guarded.lock();
            if guarded.slot.state().is_terminal() {
                Some(callback)
            } else {
                guarded.callbacks.push(callback);
                None
            }
        };
        if let Some(callback) = fire_now {
            callback(self);
        }
        self
    }

    /// Outcome if the task is terminal, `None` otherwise.
    pub fn try_get(&self) -> Option<Result<V>> {
        match &self.inner.guarded.lock().slot {
            Slot::Completed(value) => Some(Ok(value.clone())),
            Slot::Failed(e) => Some(Err(Error::TaskFailed(e.clone()))),
            Slot::Cancelled => Some(Err(Error::Cancelled)),
            Slot::Pending { .. } | Slot::Running => None,
        }
    }

    /// Wait for the outcome.
    ///
    /// Returns immediately when the task is already terminal. Failures are
    /// reported as [`Error::TaskFailed`], cancellation as [`Error::Cancelled`].
    pub async fn get(&self) -> Result<V> {
        let mut done = self.inner.done.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = done.wait_for(|finished| *finished).await;
        self.try_get().unwrap_or(Err(Error::Cancelled))
    }
}
