use crate::core::error::ProtocolError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Ping,
    Pong,
    Announce,
    Request,
    Response,
    Leave,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::Announce => "ANNOUNCE",
            MessageType::Request => "REQUEST",
            MessageType::Response => "RESPONSE",
            MessageType::Leave => "LEAVE",
        };
        f.write_str(name)
    }
}

/// One line on the wire: `{"type": ..., "sender": ..., "payload": ...}`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub sender: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new<T: Serialize>(
        kind: MessageType,
        sender: &str,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind,
            sender: sender.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Envelope without a payload (PING, PONG)
    pub fn bare(kind: MessageType, sender: &str) -> Self {
        Self {
            kind,
            sender: sender.to_string(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Fail unless the envelope has the expected type
    pub fn expect(self, kind: MessageType) -> Result<Self, ProtocolError> {
        if self.kind == kind {
            Ok(self)
        } else {
            Err(ProtocolError::UnexpectedMessage {
                expected: kind.to_string(),
                got: self.kind.to_string(),
            })
        }
    }
}

/// Payload of ANNOUNCE: the endpoint a peer can be reached at
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Announcement {
    pub name: String,
    pub address: String,
    pub port: u16,
}

/// Payload of LEAVE
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Leave {
    pub peer_id: String,
}

/// Payload of REQUEST
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransferRequest {
    pub cid: String,
    pub requester_id: String,
    pub timestamp: i64,
}

/// Payload of RESPONSE; when accepted, `file_size` raw bytes follow the line
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransferResponse {
    pub cid: String,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub file_size: u64,
    pub checksum: String,
}

impl TransferResponse {
    pub fn reject(cid: &str, reason: impl Into<String>) -> Self {
        Self {
            cid: cid.to_string(),
            accepted: false,
            reason: Some(reason.into()),
            file_size: 0,
            checksum: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let env = Envelope::bare(MessageType::Ping, "peer-a");
        let json = serde_json::to_value(&env).unwrap();

        assert_eq!(json["type"], "PING");
        assert_eq!(json["sender"], "peer-a");
    }

    #[test]
    fn test_payload_decoding() {
        let req = TransferRequest {
            cid: "kx-1".to_string(),
            requester_id: "peer-b".to_string(),
            timestamp: 42,
        };
        let env = Envelope::new(MessageType::Request, "peer-b", &req).unwrap();
        let line = serde_json::to_string(&env).unwrap();
        let parsed: Envelope = serde_json::from_str(&line).unwrap();

        assert_eq!(parsed.payload::<TransferRequest>().unwrap(), req);
    }

    #[test]
    fn test_expect_rejects_wrong_type() {
        let env = Envelope::bare(MessageType::Ping, "peer-a");
        let err = env.expect(MessageType::Pong).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedMessage { .. }));
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let parsed: Envelope = serde_json::from_str(r#"{"type":"PONG","sender":"x"}"#).unwrap();
        assert_eq!(parsed.kind, MessageType::Pong);
        assert!(parsed.payload.is_null());
    }

    #[test]
    fn test_reject_response_omits_reason_when_none() {
        let accepted = TransferResponse {
            cid: "kx-1".to_string(),
            accepted: true,
            reason: None,
            file_size: 3,
            checksum: "ab".to_string(),
        };
        let json = serde_json::to_value(&accepted).unwrap();
        assert!(json.get("reason").is_none());

        let rejected = TransferResponse::reject("kx-1", "not hosted");
        assert_eq!(rejected.reason.as_deref(), Some("not hosted"));
    }
}
