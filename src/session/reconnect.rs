//! Reconnect supervision.
//!
//! At most one reconnect attempt is in flight at a time. The guard is set
//! when an attempt is scheduled and cleared when that attempt's task
//! finishes, whatever the outcome, including when the worker refuses the
//! schedule.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::task::{AsyncTask, TaskState, Worker};

pub(crate) struct Reconnector {
    delay: Duration,
    in_flight: Arc<AtomicBool>,
    scheduled: Mutex<Option<AsyncTask<bool>>>,
}

impl Reconnector {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: Arc::new(AtomicBool::new(false)),
            scheduled: Mutex::new(None),
        }
    }

    /// Schedule `attempt` after the delay unless one is already pending.
    ///
    /// Returns `true` if an attempt was scheduled by this call.
    pub(crate) fn schedule<F, Fut>(&self, worker: &Worker, attempt: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Reconnect already scheduled");
            return false;
        }

        tracing::info!("Reconnecting in {:?}", self.delay);
        let task = worker.schedule(self.delay, attempt);

        let flag = self.in_flight.clone();
        task.on_complete(move |done| {
            flag.store(false, Ordering::Release);
            match done.try_get() {
                Some(Ok(true)) => tracing::info!("Reconnect succeeded"),
                Some(Ok(false)) => tracing::warn!("Reconnect attempt failed"),
                Some(Err(e)) => tracing::warn!("Reconnect attempt did not run: {}", e),
                None => {}
            }
        });

        let accepted = task.state() != TaskState::Cancelled;
        *self.scheduled.lock() = Some(task);
        accepted
    }

    /// Cancel an attempt that has not started yet.
    pub(crate) fn cancel_pending(&self) -> bool {
        match self.scheduled.lock().take() {
            Some(task) => task.cancel(),
            None => false,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}
