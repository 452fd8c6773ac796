use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Key decode failure: {0}")]
    KeyDecodeFailure(String),

    #[error("Symmetric key unwrap failed (RSA-OAEP rejected the wrapped key)")]
    UnwrapFailure,

    #[error("Authentication tag mismatch, ciphertext rejected")]
    AuthTagMismatch,

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
