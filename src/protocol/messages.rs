//! Typed message bodies.
//!
//! Field names are part of the wire contract. Each body knows its
//! [`MessageType`] through [`Message::TYPE`] and converts to a [`Frame`]
//! with [`Message::to_frame`]; inbound frames are read back with
//! [`Frame::parse`].

use serde::{Deserialize, Deserializer, Serialize};

use super::{Frame, MessageType};
use crate::error::Result;

/// A body struct bound to its message type.
pub trait Message: Serialize + Sized {
    const TYPE: MessageType;

    /// Build the frame carrying this body.
    fn to_frame(&self) -> Result<Frame> {
        Frame::from_body(Self::TYPE, self)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub user_id: i64,
    pub device_id: i64,
    pub secret: i64,
}

impl Message for AuthenticateRequest {
    const TYPE: MessageType = MessageType::AuthenticateRequest;
}

/// Reply to [`AuthenticateRequest`]; a zero token means rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateResponse {
    pub token: i64,
}

impl Message for AuthenticateResponse {
    const TYPE: MessageType = MessageType::AuthenticateResponse;
}

/// Announces that a content item can be pulled from the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyAvailable {
    pub token: i64,
    pub dataset_id: u16,
    pub content_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content_type: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl Message for NotifyAvailable {
    const TYPE: MessageType = MessageType::NotifyAvailable;
}

/// Asks the peer for a content item's bytes.
///
/// Peers may omit `token` and `dataset_id`; only `content_id` is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub token: i64,
    #[serde(default)]
    pub dataset_id: u16,
    pub content_id: i64,
}

impl Message for SyncRequest {
    const TYPE: MessageType = MessageType::SyncRequest;
}

/// Reply to [`SyncRequest`]. When `message` is 1, `content_size` raw bytes
/// follow the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub token: i64,
    pub dataset_id: u16,
    pub content_id: i64,
    pub content_size: u32,
    pub message: i64,
}

impl Message for SyncResponse {
    const TYPE: MessageType = MessageType::SyncResponse;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub token: i64,
}

impl Message for Ping {
    const TYPE: MessageType = MessageType::Ping;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshIndexRequest {
    pub token: i64,
    pub dataset_id: u16,
}

impl Message for RefreshIndexRequest {
    const TYPE: MessageType = MessageType::RefreshIndexRequest;
}

/// One item listed in a [`RefreshIndexResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content_type: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshIndexResponse {
    pub message: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contents: Vec<IndexEntry>,
}

impl Message for RefreshIndexResponse {
    const TYPE: MessageType = MessageType::RefreshIndexResponse;
}
