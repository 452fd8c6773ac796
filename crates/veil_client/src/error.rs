use thiserror::Error;

use crate::call::CallError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] veil_crypto::CryptoError),

    #[error("Protocol error: {0}")]
    Proto(#[from] veil_proto::ProtoError),

    #[error("Store error: {0}")]
    Store(#[from] veil_store::StoreError),

    #[error("Call error: {0}")]
    Call(#[from] CallError),

    #[error("No such contact: {0}")]
    UnknownContact(String),

    #[error("Public key for {0} still pending — key request sent, message blocked")]
    KeyPending(String),

    #[error("File type not allowed: {0}")]
    UnsupportedMime(String),
}
