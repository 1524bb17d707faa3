//! Session configuration.
//!
//! Every field has a default, so a TOML file only needs the values it
//! changes:
//!
//! ```toml
//! host = "10.0.0.5"
//! port = 6000
//! auth_timeout_secs = 30
//! malformed_frames = "skip"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{DatasetType, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::transport::Endpoint;

/// What the receive loop does with a body it cannot parse or dispatch.
///
/// I/O failures always close the connection regardless of this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedFramePolicy {
    /// Tear the connection down.
    #[default]
    Disconnect,
    /// Log and drop the frame; keep reading.
    Skip,
}

/// Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Peer host name or address
    #[serde(default = "default_host")]
    pub host: String,

    /// Peer port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Dataset sent on notify, sync and refresh frames
    #[serde(default)]
    pub dataset_id: DatasetType,

    /// Bound on a single connect attempt, in seconds
    #[serde(default = "default_ten")]
    pub connect_timeout_secs: u64,

    /// Deadline for the authenticate rendezvous (none = wait until the
    /// reply arrives or the connection drops)
    #[serde(default)]
    pub auth_timeout_secs: Option<u64>,

    /// Delay before the first heartbeat after `wake()`, in seconds
    #[serde(default = "default_ten")]
    pub heartbeat_delay_secs: u64,

    /// Heartbeat period, in seconds
    #[serde(default = "default_ten")]
    pub heartbeat_period_secs: u64,

    /// Delay before the single reconnect attempt, in seconds
    #[serde(default = "default_ten")]
    pub reconnect_delay_secs: u64,

    /// Schedule a reconnect when the connection drops
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Receive loop handling of unparseable bodies
    #[serde(default)]
    pub malformed_frames: MalformedFramePolicy,

    /// Largest sync payload accepted from the peer, in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Maximum cached items (none = unbounded)
    #[serde(default)]
    pub cache_capacity: Option<usize>,

    /// Capacity of the session event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6000
}

fn default_ten() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_max_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD_SIZE
}

fn default_event_capacity() -> usize {
    64
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dataset_id: DatasetType::default(),
            connect_timeout_secs: 10,
            auth_timeout_secs: None,
            heartbeat_delay_secs: 10,
            heartbeat_period_secs: 10,
            reconnect_delay_secs: 10,
            auto_reconnect: true,
            malformed_frames: MalformedFramePolicy::default(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_SIZE,
            cache_capacity: None,
            event_capacity: 64,
        }
    }
}

impl SessionConfig {
    /// Parse from TOML and validate.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Check values that would make the session unusable.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must not be 0".into()));
        }
        if self.heartbeat_period_secs == 0 {
            return Err(Error::Config("heartbeat_period_secs must be positive".into()));
        }
        if self.max_payload_bytes == 0 {
            return Err(Error::Config("max_payload_bytes must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be positive".into()));
        }
        if self.cache_capacity == Some(0) {
            return Err(Error::Config("cache_capacity must be positive when set".into()));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn auth_timeout(&self) -> Option<Duration> {
        self.auth_timeout_secs.map(Duration::from_secs)
    }

    pub fn heartbeat_delay(&self) -> Duration {
        Duration::from_secs(self.heartbeat_delay_secs)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_period_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}
