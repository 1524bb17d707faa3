//! # clipwire
//!
//! Client library for a clipboard sync protocol over TCP.
//!
//! Devices sharing an account announce clipboard items to a sync peer,
//! pull item bytes on demand, and serve their own items when asked.
//!
//! ## Architecture
//!
//! - **Wire**: each frame is a 2-byte big-endian length followed by a JSON
//!   body whose `message_id` names the message type. A found sync response
//!   is followed by raw content bytes outside the length-prefixed body.
//! - **Session**: one connection at a time, a worker that runs outbound
//!   operations in order, a receive loop that dispatches inbound frames to
//!   broadcast handlers and FIFO reply waiters, heartbeats, and a single
//!   delayed reconnect after an unexpected drop.
//! - **Tasks**: every operation returns an [`AsyncTask`] that can be
//!   awaited, observed with callbacks, or chained with a [`Reactor`].
//!
//! ## Example
//!
//! ```ignore
//! use clipwire::{Credentials, Session};
//!
//! #[tokio::main]
//! async fn main() -> clipwire::Result<()> {
//!     let session = Session::builder().host("10.0.0.5").build()?;
//!     let ready = session
//!         .start(Credentials::from_phrases("alice", "laptop", "s3cret"))
//!         .get()
//!         .await?;
//!
//!     if ready {
//!         let index = session.refresh_index().get().await?;
//!         println!("{} items available", index.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod session;
pub mod task;
pub mod transport;
pub mod writer;

mod receiver;

pub use cache::ContentCache;
pub use config::{MalformedFramePolicy, SessionConfig};
pub use credentials::Credentials;
pub use error::{Error, Result};
pub use protocol::{DatasetType, Frame, MessageType};
pub use session::{
    ContentNotification, Disconnect, Session, SessionBuilder, SessionEvent, SessionState,
};
pub use task::{AsyncTask, Reactor, TaskState, Worker};
pub use transport::Endpoint;
