//! veil_crypto — Veil Secure Messenger cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - One fresh symmetric key + nonce per message/chunk; the key travels
//!   only wrapped under the recipient's RSA public key (OAEP-SHA256).
//! - Secrecy comes from the per-item key, not a ratchet — identity keys
//!   are long-lived by design.
//!
//! # Module layout
//! - `identity` — long-term RSA-2048 identity keypair + stable peer id
//! - `hybrid`   — per-item AES-256-GCM encryption with RSA key wrap
//! - `chunker`  — fixed-size file chunking, one envelope per chunk
//! - `error`    — unified error type

pub mod chunker;
pub mod error;
pub mod hybrid;
pub mod identity;

pub use chunker::{EncryptedChunk, CHUNK_SIZE};
pub use error::CryptoError;
pub use hybrid::EncryptedEnvelope;
pub use identity::{Identity, PeerPublicKey};
