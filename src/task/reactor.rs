//! Reactor chains: linear pipelines of asynchronous stages.
//!
//! A stage turns a value `A` into a new [`AsyncTask<B>`]. When that task
//! completes, the next stage is invoked with its value from the completion
//! callback, so a chain advances on whichever task completes each step and
//! never blocks the task that started it.
//!
//! Chains are assembled once with [`Reactor::stage`] and [`Reactor::and_then`].
//! Both consume their inputs, so a chain is always a straight line and its
//! stage names can be inspected with [`Reactor::stages`].
//!
//! A chain halts at the first stage whose transformation returns an error or
//! whose produced task fails; no later stage is invoked and the task returned
//! by [`Reactor::initiate`] fails with [`Error::StageFailed`].
//!
//! # Example
//!
//! ```
//! use clipwire::task::{AsyncTask, Reactor};
//!
//! let chain = Reactor::stage("double", |n: u32| Ok(AsyncTask::completed(n * 2)))
//!     .and_then(Reactor::stage("describe", |n: u32| {
//!         Ok(AsyncTask::completed(format!("n={}", n)))
//!     }));
//!
//! assert_eq!(chain.stages(), ["double", "describe"]);
//! let out = chain.initiate(21);
//! assert_eq!(out.try_get().unwrap().unwrap(), "n=42");
//! ```

use std::fmt;
use std::sync::Arc;

use super::AsyncTask;
use crate::error::{Error, Result};

type Observer<T> = Arc<dyn Fn(&AsyncTask<T>) + Send + Sync>;
type Halt = Arc<dyn Fn(Error) + Send + Sync>;
type Link<A, B> = Arc<dyn Fn(Observer<B>, Halt) -> Observer<A> + Send + Sync>;

/// A built pipeline of stages taking `A` and eventually producing `B`.
pub struct Reactor<A, B> {
    stages: Vec<String>,
    link: Link<A, B>,
}

impl<A, B> Clone for Reactor<A, B> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
            link: self.link.clone(),
        }
    }
}

impl<A, B> fmt::Debug for Reactor<A, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("stages", &self.stages)
            .finish()
    }
}

fn stage_failed(stage: &str, error: Error) -> Error {
    let source = match error {
        Error::TaskFailed(inner) => inner,
        other => Arc::new(other),
    };
    Error::StageFailed {
        stage: stage.to_string(),
        source,
    }
}

impl<A, B> Reactor<A, B>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    /// Create a single-stage chain from a transformation.
    pub fn stage<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(A) -> Result<AsyncTask<B>> + Send + Sync + 'static,
    {
        let name = name.into();
        let transform = Arc::new(transform);
        let stage = name.clone();

        let link: Link<A, B> = Arc::new(move |next: Observer<B>, halt: Halt| {
            let transform = transform.clone();
            let stage = stage.clone();
            let observer: Observer<A> = Arc::new(move |input: &AsyncTask<A>| {
                let value = match input.try_get() {
                    Some(Ok(value)) => value,
                    Some(Err(e)) => {
                        tracing::debug!("Stage '{}' received a failed input, halting", stage);
                        halt(stage_failed(&stage, e));
                        return;
                    }
                    None => return,
                };

                let output = match transform(value) {
                    Ok(task) => task,
                    Err(e) => {
                        tracing::warn!("Stage '{}' failed: {}", stage, e);
                        halt(stage_failed(&stage, e));
                        return;
                    }
                };

                let next = next.clone();
                let halt = halt.clone();
                let stage = stage.clone();
                output.on_complete(move |done| match done.try_get() {
                    Some(Err(e)) => {
                        tracing::warn!("Stage '{}' task failed: {}", stage, e);
                        halt(stage_failed(&stage, e));
                    }
                    _ => next(done),
                });
            });
            observer
        });

        Self {
            stages: vec![name],
            link,
        }
    }

    /// Append `next` after the last stage of this chain.
    pub fn and_then<C>(self, next: Reactor<B, C>) -> Reactor<A, C>
    where
        C: Clone + Send + 'static,
    {
        let mut stages = self.stages;
        stages.extend(next.stages);

        let head = self.link;
        let tail = next.link;
        let link: Link<A, C> =
            Arc::new(move |sink: Observer<C>, halt: Halt| head(tail(sink, halt.clone()), halt));

        Reactor { stages, link }
    }

    /// Stage names, in execution order.
    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the chain has no stages (never true for a built chain).
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Feed an existing task into the chain head.
    ///
    /// The head stage runs when `input` completes. The returned task completes
    /// with the final stage's value or fails with the stage that halted.
    pub fn observe(&self, input: &AsyncTask<A>) -> AsyncTask<B> {
        let result = AsyncTask::deferred();

        let done = result.clone();
        let sink: Observer<B> = Arc::new(move |last: &AsyncTask<B>| match last.try_get() {
            Some(Ok(value)) => {
                done.complete(value);
            }
            Some(Err(e)) => {
                done.fail(e);
            }
            None => {}
        });

        let failed = result.clone();
        let halt: Halt = Arc::new(move |e| {
            failed.fail(e);
        });

        let head = (self.link)(sink, halt);
        input.on_complete(move |task| head(task));
        result
    }

    /// Start the chain with an already-available value.
    pub fn initiate(&self, input: A) -> AsyncTask<B> {
        self.observe(&AsyncTask::completed(input))
    }
}
