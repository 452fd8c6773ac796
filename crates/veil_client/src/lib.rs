//! veil_client — the secure transport and signaling engine
//!
//! Owns one logical connection to the untrusted relay and everything that
//! rides on it:
//!
//! - `channel`   — websocket channel client: register-on-open, guarded
//!   fixed-delay reconnect, bounded retry sends.
//! - `engine`    — single-reader dispatch of inbound frames by kind, plus
//!   the outbound operations (text, file, status, contact management).
//! - `transfer`  — reassembly of concurrently in-flight file transfers.
//! - `receipts`  — delivered/read receipt correlation with stored messages.
//! - `call`      — the call-signaling state machine and the media-engine
//!   trait boundary it drives.
//!
//! The relay never sees plaintext; every payload crossing `channel` is an
//! `EncryptedEnvelope` or `EncryptedChunk` produced by `veil_crypto`.

pub mod call;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod receipts;
pub mod transfer;

pub use call::{
    CallCoordinator, CallError, CallPhase, ConnState, IceCandidate, MediaEngine, MediaEvent,
    MediaSession, SdpKind,
};
pub use channel::{ChannelClient, ChannelHandle, FrameSink};
pub use config::{ChannelConfig, EngineConfig};
pub use engine::Engine;
pub use error::ClientError;
pub use receipts::ReceiptTracker;
pub use transfer::{CompletedTransfer, IngestOutcome, Reassembler};
