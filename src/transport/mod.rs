//! Transport module - TCP sockets and connection lifecycle.
//!
//! Provides:
//! - [`Endpoint`] and [`connect`] - resolve and open a TCP stream with a timeout
//! - [`Connection`] - a connected socket with its writer task
//! - [`ShutdownSignal`] - the single teardown signal shared by a connection's tasks

mod connection;
mod tcp;

pub use connection::{Connection, ShutdownSignal};
pub use tcp::{connect, Endpoint};
