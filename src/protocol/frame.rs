//! Frame struct with typed accessors.
//!
//! A frame is one message type plus an ordered map of body fields. The
//! `message_id` field is implied by the type and is never stored in
//! `fields`; the encoder writes it first. A sync-response may also carry a
//! raw payload that travels unframed after the body.
//!
//! # Example
//!
//! ```
//! use clipwire::protocol::{Frame, MessageType};
//!
//! let frame = Frame::new(MessageType::Ping).with_field("token", 7);
//!
//! assert_eq!(frame.message_type, MessageType::Ping);
//! assert_eq!(frame.get_i64("token").unwrap(), 7);
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::MessageType;
use crate::error::{Error, Result};

/// Body field naming the message type.
pub const MESSAGE_ID_FIELD: &str = "message_id";

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Message type (the body's `message_id`).
    pub message_type: MessageType,
    /// Remaining body fields, in wire order.
    pub fields: Map<String, Value>,
    /// Raw bytes sent unframed after the body.
    pub payload: Option<Bytes>,
}

impl Frame {
    /// Create a frame with no fields.
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            fields: Map::new(),
            payload: None,
        }
    }

    /// Add a field, replacing any previous value under `key`.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != MESSAGE_ID_FIELD {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Attach a trailing raw payload.
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Build a frame from a serializable body struct.
    pub fn from_body<T: Serialize>(message_type: MessageType, body: &T) -> Result<Self> {
        match serde_json::to_value(body)? {
            Value::Object(mut fields) => {
                fields.remove(MESSAGE_ID_FIELD);
                Ok(Self {
                    message_type,
                    fields,
                    payload: None,
                })
            }
            other => Err(Error::Protocol(format!(
                "{} body must be a JSON object, got {}",
                message_type, other
            ))),
        }
    }

    /// Deserialize the body fields into a typed struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    /// Raw field value.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Integer field.
    pub fn get_i64(&self, key: &'static str) -> Result<i64> {
        self.fields
            .get(key)
            .and_then(Value::as_i64)
            .ok_or(Error::MissingField(key))
    }

    /// String field.
    pub fn get_str(&self, key: &'static str) -> Result<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .ok_or(Error::MissingField(key))
    }

    /// Payload bytes, or an empty slice.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    /// Full JSON body, `message_id` first.
    pub fn to_body(&self) -> Value {
        let mut body = Map::with_capacity(self.fields.len() + 1);
        body.insert(
            MESSAGE_ID_FIELD.to_string(),
            Value::from(self.message_type.id()),
        );
        for (key, value) in &self.fields {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }
}
