//! veil_proto — Wire types and serialisation for Veil Secure Messenger
//!
//! One JSON object per websocket text frame. The relay is a DUMB ROUTER:
//! it reads `type`, `from`, `to` for routing and never sees plaintext —
//! message bodies and file chunks are opaque `EncryptedEnvelope` /
//! `EncryptedChunk` payloads.
//!
//! Frames are parsed ONCE at the channel boundary into the closed
//! [`Frame`] union; unrecognized kinds surface as `Frame::Unknown` so
//! nothing is silently ignored.

pub mod frame;

pub use frame::{Frame, MessageBody, ProtoError, ReceiptKind};
