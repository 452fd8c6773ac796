//! Hybrid per-item encryption
//!
//! Every message (and every file chunk) gets its OWN fresh AES-256-GCM key
//! and 12-byte nonce; the key is then wrapped with the recipient's RSA
//! public key using OAEP-SHA256. Compromise of one item's key exposes
//! nothing else.
//!
//! Wire format (all fields standard base64):
//!   ciphertext  — AES-GCM output, tag appended
//!   iv          — 12-byte GCM nonce
//!   wrapped_key — RSA-OAEP ciphertext of the 32-byte AES key

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use rand::rngs::OsRng;
use rsa::Oaep;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::identity::{Identity, PeerPublicKey};

pub const IV_LEN: usize = 12;
pub const SYM_KEY_LEN: usize = 32;

/// One encrypted item as it travels through the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub ciphertext: String,
    pub iv: String,
    pub wrapped_key: String,
}

/// Encrypt `plaintext` for `recipient` under a fresh key/nonce pair.
pub fn encrypt(
    plaintext: &[u8],
    recipient: &PeerPublicKey,
) -> Result<EncryptedEnvelope, CryptoError> {
    let key = Aes256Gcm::generate_key(&mut AeadOsRng);
    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);

    let cipher = Aes256Gcm::new(&key);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt("AEAD encryption failed".into()))?;

    let wrapped_key = recipient
        .0
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_slice())
        .map_err(|e| CryptoError::Encrypt(format!("key wrap failed: {e}")))?;

    Ok(EncryptedEnvelope {
        ciphertext: B64.encode(&ciphertext),
        iv: B64.encode(nonce),
        wrapped_key: B64.encode(&wrapped_key),
    })
}

/// Unwrap the symmetric key, then authenticated-decrypt.
///
/// Fails with `UnwrapFailure` if RSA-OAEP rejects the wrapped key and
/// `AuthTagMismatch` if the GCM tag does not verify. Never returns
/// plaintext on a failed tag check.
pub fn decrypt(envelope: &EncryptedEnvelope, identity: &Identity) -> Result<Vec<u8>, CryptoError> {
    let wrapped = B64.decode(&envelope.wrapped_key)?;
    let key_bytes = Zeroizing::new(
        identity
            .private_key()
            .decrypt(Oaep::new::<Sha256>(), &wrapped)
            .map_err(|_| CryptoError::UnwrapFailure)?,
    );
    if key_bytes.len() != SYM_KEY_LEN {
        return Err(CryptoError::UnwrapFailure);
    }

    let iv = B64.decode(&envelope.iv)?;
    if iv.len() != IV_LEN {
        return Err(CryptoError::AuthTagMismatch);
    }
    let ciphertext = B64.decode(&envelope.ciphertext)?;

    let cipher =
        Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| CryptoError::UnwrapFailure)?;
    cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
        .map_err(|_| CryptoError::AuthTagMismatch)
}
