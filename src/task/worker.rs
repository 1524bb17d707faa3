//! Serialized worker.
//!
//! A [`Worker`] owns one tokio task that drains an unbounded queue of jobs,
//! running each to completion before taking the next. Jobs therefore never
//! overlap, even when a job awaits (for example, a rendezvous with the
//! receive loop).
//!
//! # Architecture
//!
//! ```text
//! submit()   ─┐
//! schedule() ─┼─► mpsc::UnboundedSender<Job> ─► Worker Task ─► job.run().await
//! periodic   ─┘
//! ```
//!
//! After [`Worker::shutdown`] no new work is accepted; submissions are
//! cancelled immediately. Queued jobs still run. [`Worker::shutdown_now`]
//! also cancels every queued job and all pending scheduled work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{AsyncTask, BoxFuture};
use crate::error::Result;

/// A type-erased unit of queued work.
trait Job: Send {
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;
    fn cancel(self: Box<Self>);
}

impl<V: Clone + Send + 'static> Job for AsyncTask<V> {
    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        let task = *self;
        Box::pin(async move {
            AsyncTask::run(&task).await;
        })
    }

    fn cancel(self: Box<Self>) {
        AsyncTask::cancel(&*self);
    }
}

struct WorkerInner {
    name: String,
    tx: Mutex<Option<mpsc::UnboundedSender<Box<dyn Job>>>>,
    shutdown: CancellationToken,
}

/// Handle to a serialized worker. Clones share the same queue.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.inner.name)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Worker {
    /// Spawn the worker task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(worker_loop(name.clone(), rx, shutdown.clone()));

        Self {
            inner: Arc::new(WorkerInner {
                name,
                tx: Mutex::new(Some(tx)),
                shutdown,
            }),
        }
    }

    /// Worker name, used in log output.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue `work` and return its task.
    ///
    /// If the worker has been shut down the task is cancelled before this
    /// returns.
    pub fn submit<V, F, Fut>(&self, work: F) -> AsyncTask<V>
    where
        V: Clone + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let task = AsyncTask::new(work);
        self.enqueue(task.clone());
        task
    }

    /// Queue an existing pending task. Returns `false` if it was rejected.
    pub fn enqueue<V: Clone + Send + 'static>(&self, task: AsyncTask<V>) -> bool {
        let rejected = {
            let tx = self.inner.tx.lock();
            match tx.as_ref() {
                Some(tx) => tx.send(Box::new(task)).err().map(|e| e.0),
                None => Some(Box::new(task) as Box<dyn Job>),
            }
        };

        match rejected {
            None => true,
            Some(job) => {
                warn!("Worker '{}' rejected work: shut down", self.inner.name);
                job.cancel();
                false
            }
        }
    }

    /// Queue `work` after `delay`.
    ///
    /// The returned task stays pending during the delay; it is cancelled if
    /// the worker shuts down before the delay elapses.
    pub fn schedule<V, F, Fut>(&self, delay: Duration, work: F) -> AsyncTask<V>
    where
        V: Clone + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let task = AsyncTask::new(work);
        if self.is_shutdown() {
            warn!("Worker '{}' rejected scheduled work: shut down", self.inner.name);
            task.cancel();
            return task;
        }

        let worker = self.clone();
        let pending = task.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = worker.inner.shutdown.cancelled() => {
                    pending.cancel();
                }
                _ = tokio::time::sleep(delay) => {
                    worker.enqueue(pending);
                }
            }
        });
        task
    }

    /// Run `f` on the worker every `period`, starting after `initial_delay`.
    ///
    /// Each tick queues one job; ticks that fall behind are skipped rather
    /// than bursting. The schedule ends when the returned [`Periodic`] is
    /// cancelled or the worker shuts down.
    pub fn schedule_at_fixed_rate<F, Fut>(
        &self,
        initial_delay: Duration,
        period: Duration,
        f: F,
    ) -> Periodic
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.inner.shutdown.child_token();
        let periodic = Periodic {
            token: token.clone(),
        };
        if self.is_shutdown() {
            warn!("Worker '{}' rejected periodic work: shut down", self.inner.name);
            token.cancel();
            return periodic;
        }

        let worker = self.clone();
        let f = Arc::new(f);
        // interval_at panics on a zero period.
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + initial_delay, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => {
                        let f = f.clone();
                        let task = AsyncTask::new(move || (*f)());
                        if !worker.enqueue(task) {
                            break;
                        }
                    }
                }
            }
            trace!("Periodic schedule on '{}' ended", worker.inner.name);
        });
        periodic
    }

    /// Stop accepting work. Already-queued jobs still run.
    pub fn shutdown(&self) {
        if self.inner.tx.lock().take().is_some() {
            debug!("Worker '{}' shutting down", self.inner.name);
        }
    }

    /// Stop accepting work and cancel queued jobs and scheduled work.
    ///
    /// A job that is already running finishes normally.
    pub fn shutdown_now(&self) {
        self.shutdown();
        self.inner.shutdown.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.tx.lock().is_none()
    }
}

/// Handle to a repeating schedule created by [`Worker::schedule_at_fixed_rate`].
#[derive(Debug, Clone)]
pub struct Periodic {
    token: CancellationToken,
}

impl Periodic {
    /// Stop the schedule. Jobs already queued still run.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the schedule has stopped.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

async fn worker_loop(
    name: String,
    mut rx: mpsc::UnboundedReceiver<Box<dyn Job>>,
    shutdown: CancellationToken,
) {
    debug!("Worker '{}' started", name);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                rx.close();
                let mut dropped = 0usize;
                while let Ok(job) = rx.try_recv() {
                    job.cancel();
                    dropped += 1;
                }
                debug!("Worker '{}' stopped, cancelled {} queued jobs", name, dropped);
                return;
            }
            job = rx.recv() => match job {
                Some(job) => job.run().await,
                None => break,
            },
        }
    }
    debug!("Worker '{}' drained and stopped", name);
}
