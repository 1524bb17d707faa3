//! Task module - completion primitives and the serialized worker.
//!
//! Provides:
//! - [`AsyncTask`] - single-assignment result with ordered completion callbacks
//! - [`Worker`] - runs submitted tasks one at a time, with delayed and periodic scheduling
//! - [`Reactor`] - a built, linear pipeline of asynchronous stages
//!
//! # Example
//!
//! ```ignore
//! use clipwire::task::Worker;
//!
//! let worker = Worker::spawn("outbound");
//! let task = worker.submit(|| async { Ok(1 + 1) });
//! assert_eq!(task.get().await?, 2);
//! ```

mod async_task;
mod reactor;
mod worker;

use std::future::Future;
use std::pin::Pin;

pub use async_task::{AsyncTask, TaskState};
pub use reactor::Reactor;
pub use worker::{Periodic, Worker};

/// Boxed future type for type-erased work.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
