//! Handler module - inbound frame dispatch.
//!
//! Provides:
//! - [`HandlerRegistry`] - persistent broadcast handlers per message type
//! - [`PendingRpcs`] - FIFO one-shot reply waiters per message type
//! - [`Dispatcher`] - runs both for each inbound frame
//!
//! # Example
//!
//! ```
//! use clipwire::handler::Dispatcher;
//! use clipwire::protocol::{Frame, MessageType};
//!
//! let dispatcher = Dispatcher::new();
//!
//! // Persistent: every notify-available frame.
//! dispatcher.handlers().register(MessageType::NotifyAvailable, |frame| {
//!     println!("available: {}", frame.get_i64("content_id")?);
//!     Ok(())
//! });
//!
//! // One-shot: the next authenticate-response.
//! let reply = dispatcher.pending().expect(MessageType::AuthenticateResponse);
//!
//! let frame = Frame::new(MessageType::AuthenticateResponse).with_field("token", 7);
//! dispatcher.dispatch(&frame).unwrap();
//! # drop(reply);
//! ```

mod dispatcher;
mod pending;
mod registry;

pub use dispatcher::Dispatcher;
pub use pending::{PendingRpcs, Waiter};
pub use registry::{Handler, HandlerRegistry, HandlerResult};
