//! Wire frames — the closed tagged union of everything the relay routes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use veil_crypto::{EncryptedChunk, EncryptedEnvelope};

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Frame serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

/// Receipt kinds carried by a receipt-form `message` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    Delivered,
    ReadAll,
}

/// Every frame kind on the wire, tagged by `type`.
///
/// A `message` frame has two shapes sharing one tag: an encrypted payload,
/// or a receipt (`receipt_type` + optional `message_ref_id`). Both land in
/// [`Frame::Message`]; [`Frame::Message`] callers disambiguate through
/// [`MessageBody`] so an ill-formed combination is an explicit error, not
/// a silent drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Register {
        peer_id: String,
        public_key: String,
    },
    /// Server ack for `register`.
    Registered {
        peer_id: String,
    },
    Message {
        from: String,
        to: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<EncryptedEnvelope>,
        #[serde(skip_serializing_if = "Option::is_none")]
        receipt_type: Option<ReceiptKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_ref_id: Option<i64>,
    },
    FileChunk {
        from: String,
        to: String,
        payload: EncryptedChunk,
    },
    Status {
        from: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<EncryptedEnvelope>,
    },
    GetPublicKey {
        from: String,
        target: String,
    },
    PublicKeyResponse {
        target: String,
        public_key: String,
    },
    /// Server notice: the addressed peer is offline.
    DeliveryFailed {
        to: String,
        reason: String,
    },
    Error {
        message: String,
    },
    WebrtcOffer {
        from: String,
        to: String,
        sdp: String,
    },
    WebrtcAnswer {
        from: String,
        to: String,
        sdp: String,
    },
    WebrtcIce {
        from: String,
        to: String,
        candidate: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
        sdp_m_line_index: u32,
    },
    /// Any `type` this client does not understand.
    #[serde(other)]
    Unknown,
}

/// Validated view of a `message` frame's body.
#[derive(Debug, Clone)]
pub enum MessageBody {
    Envelope(EncryptedEnvelope),
    Receipt {
        kind: ReceiptKind,
        message_ref_id: Option<i64>,
    },
}

impl Frame {
    pub fn parse(text: &str) -> Result<Frame, ProtoError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Disambiguate a `message` frame. Errors on a frame that carries
    /// neither payload nor receipt, or claims to be both.
    pub fn message_body(
        payload: Option<EncryptedEnvelope>,
        receipt_type: Option<ReceiptKind>,
        message_ref_id: Option<i64>,
    ) -> Result<MessageBody, ProtoError> {
        match (payload, receipt_type) {
            (Some(envelope), None) => Ok(MessageBody::Envelope(envelope)),
            (None, Some(kind)) => Ok(MessageBody::Receipt { kind, message_ref_id }),
            (Some(_), Some(_)) => Err(ProtoError::InvalidFrame(
                "message frame carries both payload and receipt_type".into(),
            )),
            (None, None) => Err(ProtoError::InvalidFrame(
                "message frame carries neither payload nor receipt_type".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_roundtrips_with_snake_case_tag() {
        let f = Frame::Register {
            peer_id: "p-1".into(),
            public_key: "AAAA".into(),
        };
        let json = f.to_json().unwrap();
        assert!(json.contains(r#""type":"register""#));
        assert!(matches!(Frame::parse(&json).unwrap(), Frame::Register { .. }));
    }

    #[test]
    fn encrypted_message_frame_parses() {
        let json = r#"{
            "type": "message",
            "from": "a", "to": "b",
            "payload": {"ciphertext": "Y3Q=", "iv": "aXY=", "wrapped_key": "a2V5"}
        }"#;
        match Frame::parse(json).unwrap() {
            Frame::Message { payload, receipt_type, message_ref_id, .. } => {
                let body =
                    Frame::message_body(payload, receipt_type, message_ref_id).unwrap();
                assert!(matches!(body, MessageBody::Envelope(_)));
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn receipt_frame_parses() {
        let json = r#"{"type":"message","from":"a","to":"b","receipt_type":"delivered","message_ref_id":7}"#;
        match Frame::parse(json).unwrap() {
            Frame::Message { payload, receipt_type, message_ref_id, .. } => {
                match Frame::message_body(payload, receipt_type, message_ref_id).unwrap() {
                    MessageBody::Receipt { kind, message_ref_id } => {
                        assert_eq!(kind, ReceiptKind::Delivered);
                        assert_eq!(message_ref_id, Some(7));
                    }
                    other => panic!("wrong body: {other:?}"),
                }
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn empty_message_frame_is_an_explicit_error() {
        let json = r#"{"type":"message","from":"a","to":"b"}"#;
        match Frame::parse(json).unwrap() {
            Frame::Message { payload, receipt_type, message_ref_id, .. } => {
                assert!(Frame::message_body(payload, receipt_type, message_ref_id).is_err());
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn file_chunk_flattens_envelope_fields() {
        let json = r#"{
            "type": "file_chunk",
            "from": "a", "to": "b",
            "payload": {
                "ciphertext": "Y3Q=", "iv": "aXY=", "wrapped_key": "a2V5",
                "transfer_id": "t-1", "chunk_index": 0, "chunk_count": 3,
                "file_name": "x.png", "mime_type": "image/png"
            }
        }"#;
        match Frame::parse(json).unwrap() {
            Frame::FileChunk { payload, .. } => {
                assert_eq!(payload.chunk_count, 3);
                assert_eq!(payload.envelope.iv, "aXY=");
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_distinct_not_dropped() {
        let json = r#"{"type":"totally_new_thing","whatever":1}"#;
        assert!(matches!(Frame::parse(json).unwrap(), Frame::Unknown));
    }

    #[test]
    fn ice_frame_carries_optional_mid() {
        let json = r#"{"type":"webrtc_ice","from":"a","to":"b","candidate":"cand","sdp_m_line_index":0}"#;
        match Frame::parse(json).unwrap() {
            Frame::WebrtcIce { sdp_mid, sdp_m_line_index, .. } => {
                assert!(sdp_mid.is_none());
                assert_eq!(sdp_m_line_index, 0);
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }
}
