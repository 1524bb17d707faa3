//! Protocol module - wire format, framing, and message types.
//!
//! This module implements the socket protocol:
//! - 2-byte big-endian length header followed by a JSON body
//! - Closed message type vocabulary keyed by `message_id`
//! - Frame struct with typed accessors and typed message bodies
//! - Unframed raw payloads after a sync-response

mod frame;
mod message_type;
mod messages;
mod wire_format;

pub use frame::{Frame, MESSAGE_ID_FIELD};
pub use message_type::{DatasetType, MessageType};
pub use messages::{
    AuthenticateRequest, AuthenticateResponse, IndexEntry, Message, NotifyAvailable, Ping,
    RefreshIndexRequest, RefreshIndexResponse, SyncRequest, SyncResponse,
};
pub use wire_format::{
    decode_body, decode_length_header, encode_body, encode_frame, encode_length_header,
    encode_parts, read_frame, read_frame_limited, trailing_payload_len, write_frame,
    DEFAULT_MAX_PAYLOAD_SIZE, LENGTH_HEADER_SIZE, MAX_BODY_SIZE, SYNC_FOUND, SYNC_NOT_FOUND,
};
