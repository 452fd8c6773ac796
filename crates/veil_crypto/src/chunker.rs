//! File chunking
//!
//! Files are split into fixed 16 KiB plaintext segments and each segment is
//! encrypted independently with its own fresh key/nonce — compromising one
//! chunk's key exposes no sibling. 16 KiB raw grows to roughly 22 KiB of
//! base64 plus JSON framing, comfortably under the channel's per-frame
//! limit.

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::hybrid::{self, EncryptedEnvelope};
use crate::identity::{Identity, PeerPublicKey};

/// Plaintext bytes per chunk.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// One encrypted file chunk. `transfer_id` must be unique per file send;
/// a collision would merge unrelated transfers on the receiving side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedChunk {
    #[serde(flatten)]
    pub envelope: EncryptedEnvelope,
    pub transfer_id: String,
    pub chunk_index: u32,
    pub chunk_count: u32,
    pub file_name: String,
    pub mime_type: String,
}

/// Split `bytes` into segments and encrypt each independently.
///
/// `chunk_count = ceil(len / CHUNK_SIZE)`; a zero-length file still yields
/// exactly one chunk with an empty payload, never zero chunks.
pub fn encrypt_file(
    bytes: &[u8],
    file_name: &str,
    mime_type: &str,
    recipient: &PeerPublicKey,
    transfer_id: &str,
) -> Result<Vec<EncryptedChunk>, CryptoError> {
    let chunk_count = bytes.len().div_ceil(CHUNK_SIZE).max(1);
    let mut chunks = Vec::with_capacity(chunk_count);

    for i in 0..chunk_count {
        let start = i * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(bytes.len());
        let envelope = hybrid::encrypt(&bytes[start..end], recipient)?;
        chunks.push(EncryptedChunk {
            envelope,
            transfer_id: transfer_id.to_string(),
            chunk_index: i as u32,
            chunk_count: chunk_count as u32,
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
        });
    }
    Ok(chunks)
}

/// Same contract as [`hybrid::decrypt`].
pub fn decrypt_chunk(chunk: &EncryptedChunk, identity: &Identity) -> Result<Vec<u8>, CryptoError> {
    hybrid::decrypt(&chunk.envelope, identity)
}
