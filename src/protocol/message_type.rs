//! Message type vocabulary.
//!
//! Every frame body carries an integer `message_id` naming one of these
//! types. The set is closed: any other value is a protocol error.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Message identifiers carried in the `message_id` body field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum MessageType {
    Header = 100,
    AuthenticateRequest = 101,
    AuthenticateResponse = 102,
    RefreshIndexRequest = 103,
    RefreshIndexResponse = 104,
    NotifyAvailable = 105,
    SyncRequest = 106,
    SyncResponse = 107,
    Ping = 108,
}

impl MessageType {
    /// All message types, in identifier order.
    pub const ALL: [MessageType; 9] = [
        MessageType::Header,
        MessageType::AuthenticateRequest,
        MessageType::AuthenticateResponse,
        MessageType::RefreshIndexRequest,
        MessageType::RefreshIndexResponse,
        MessageType::NotifyAvailable,
        MessageType::SyncRequest,
        MessageType::SyncResponse,
        MessageType::Ping,
    ];

    /// Wire identifier.
    #[inline]
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Short name used in log output.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Header => "header",
            MessageType::AuthenticateRequest => "authenticate-request",
            MessageType::AuthenticateResponse => "authenticate-response",
            MessageType::RefreshIndexRequest => "refresh-index-request",
            MessageType::RefreshIndexResponse => "refresh-index-response",
            MessageType::NotifyAvailable => "notify-available-request",
            MessageType::SyncRequest => "sync-request",
            MessageType::SyncResponse => "sync-response",
            MessageType::Ping => "ping",
        }
    }
}

impl TryFrom<i64> for MessageType {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        MessageType::ALL
            .into_iter()
            .find(|ty| i64::from(ty.id()) == value)
            .ok_or(Error::UnknownMessageType(value))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.id())
    }
}

/// Dataset identifiers carried in `dataset_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum DatasetType {
    None = 0,
    #[default]
    Clipboard = 1,
}

impl From<DatasetType> for u16 {
    fn from(value: DatasetType) -> Self {
        value as u16
    }
}

impl TryFrom<u16> for DatasetType {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DatasetType::None),
            1 => Ok(DatasetType::Clipboard),
            other => Err(Error::Protocol(format!("unknown dataset id {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers() {
        assert_eq!(MessageType::Header.id(), 100);
        assert_eq!(MessageType::AuthenticateRequest.id(), 101);
        assert_eq!(MessageType::AuthenticateResponse.id(), 102);
        assert_eq!(MessageType::RefreshIndexRequest.id(), 103);
        assert_eq!(MessageType::RefreshIndexResponse.id(), 104);
        assert_eq!(MessageType::NotifyAvailable.id(), 105);
        assert_eq!(MessageType::SyncRequest.id(), 106);
        assert_eq!(MessageType::SyncResponse.id(), 107);
        assert_eq!(MessageType::Ping.id(), 108);
    }

    #[test]
    fn test_try_from_known_and_unknown() {
        for ty in MessageType::ALL {
            assert_eq!(MessageType::try_from(i64::from(ty.id())).unwrap(), ty);
        }
        assert!(matches!(
            MessageType::try_from(99),
            Err(Error::UnknownMessageType(99))
        ));
        assert!(MessageType::try_from(-1).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(MessageType::Ping.to_string(), "ping(108)");
    }

    #[test]
    fn test_dataset_type_serde() {
        assert_eq!(serde_json::to_string(&DatasetType::Clipboard).unwrap(), "1");
        let parsed: DatasetType = serde_json::from_str("0").unwrap();
        assert_eq!(parsed, DatasetType::None);
        assert!(serde_json::from_str::<DatasetType>("7").is_err());
    }
}
