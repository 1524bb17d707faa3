//! Fluent session configuration.

use std::time::Duration;

use crate::config::{MalformedFramePolicy, SessionConfig};
use crate::error::Result;
use crate::handler::{Dispatcher, HandlerResult};
use crate::protocol::{DatasetType, Frame, MessageType};
use crate::transport::Endpoint;
use crate::writer::WriterConfig;

use super::Session;

/// Builder for a [`Session`].
///
/// Starts from [`SessionConfig::default`]; each setter overrides one value.
/// Durations are stored in whole seconds, as in the configuration file.
pub struct SessionBuilder {
    config: SessionConfig,
    writer_config: WriterConfig,
    dispatcher: Dispatcher,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            writer_config: WriterConfig::default(),
            dispatcher: Dispatcher::new(),
        }
    }

    /// Replace the whole configuration, e.g. one loaded from TOML.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn endpoint(self, endpoint: Endpoint) -> Self {
        self.host(endpoint.host).port(endpoint.port)
    }

    pub fn dataset(mut self, dataset: DatasetType) -> Self {
        self.config.dataset_id = dataset;
        self
    }

    /// Bound a single connect attempt. Rounded down to whole seconds, with
    /// a minimum of one.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Bound the authenticate rendezvous. `None` waits until the reply
    /// arrives or the connection drops.
    pub fn auth_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.auth_timeout_secs = timeout.map(|t| t.as_secs().max(1));
        self
    }

    /// Delay and period used by [`Session::wake`].
    pub fn heartbeat(mut self, delay: Duration, period: Duration) -> Self {
        self.config.heartbeat_delay_secs = delay.as_secs();
        self.config.heartbeat_period_secs = period.as_secs();
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay_secs = delay.as_secs();
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    pub fn malformed_frames(mut self, policy: MalformedFramePolicy) -> Self {
        self.config.malformed_frames = policy;
        self
    }

    /// Largest sync payload accepted from the peer.
    /// Default: 64 MiB
    pub fn max_payload(mut self, bytes: usize) -> Self {
        self.config.max_payload_bytes = bytes;
        self
    }

    /// Bound the content cache. `None` keeps it unbounded.
    pub fn cache_capacity(mut self, capacity: Option<usize>) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Outbound frames queued per connection before senders wait.
    /// Default: 256
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Register a broadcast handler before the session starts.
    pub fn on_message<F>(self, message_type: MessageType, handler: F) -> Self
    where
        F: Fn(&Frame) -> HandlerResult + Send + Sync + 'static,
    {
        self.dispatcher.handlers().register(message_type, handler);
        self
    }

    /// Validate the configuration and create the session.
    ///
    /// Must be called from within a Tokio runtime; the session's worker is
    /// spawned here.
    pub fn build(self) -> Result<Session> {
        Session::assemble(self.config, self.writer_config, self.dispatcher)
    }
}
