//! TCP endpoint resolution and connect.
//!
//! # Example
//!
//! ```ignore
//! use clipwire::transport::{connect, Endpoint};
//! use std::time::Duration;
//!
//! let endpoint = Endpoint::new("127.0.0.1", 6000);
//! let stream = connect(&endpoint, Duration::from_secs(10)).await?;
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{lookup_host, TcpStream};

use crate::error::{Error, Result};

/// Host and port of the peer. Fixed once a connection begins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve to socket addresses, in resolver order.
    pub async fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
            .await?
            .collect();
        if addrs.is_empty() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", self),
            )));
        }
        Ok(addrs)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Connect to the first reachable address of `endpoint`.
///
/// Each address gets the full `timeout`. Nagle is disabled since frames are
/// small and latency-sensitive.
pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream> {
    let mut last_error = None;

    for addr in endpoint.resolve().await? {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                tracing::debug!("Connected to {} ({})", endpoint, addr);
                return Ok(stream);
            }
            Ok(Err(e)) => {
                tracing::debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(Error::Io(e));
            }
            Err(_) => {
                tracing::debug!("Connect to {} timed out after {:?}", addr, timeout);
                last_error = Some(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                )));
            }
        }
    }

    Err(last_error.unwrap_or(Error::NotConnected))
}
