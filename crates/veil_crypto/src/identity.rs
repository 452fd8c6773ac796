//! Identity key management
//!
//! Each peer has one long-lived RSA-2048 keypair and a stable opaque
//! `peer_id` (uuid v4). Keys are created once, persisted locally, and
//! never rotated in this design — there is no ratchet, so a key change
//! on the wire means the contact must be re-fetched, not trusted silently.
//!
//! Wire encodings: public key as SPKI DER, private key as PKCS#8 DER,
//! both standard base64.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const RSA_BITS: usize = 2048;

/// A contact's RSA public key, decoded from its base64 SPKI DER wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerPublicKey(pub(crate) RsaPublicKey);

impl PeerPublicKey {
    pub fn from_b64(b64: &str) -> Result<Self, CryptoError> {
        let der = B64.decode(b64)?;
        let key = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| CryptoError::KeyDecodeFailure(e.to_string()))?;
        Ok(Self(key))
    }

    pub fn to_b64(&self) -> Result<String, CryptoError> {
        let der = self
            .0
            .to_public_key_der()
            .map_err(|e| CryptoError::KeyDecodeFailure(e.to_string()))?;
        Ok(B64.encode(der.as_bytes()))
    }
}

/// Long-lived local identity: stable peer id + RSA-2048 keypair.
pub struct Identity {
    pub peer_id: String,
    public: PeerPublicKey,
    private: RsaPrivateKey,
}

impl Identity {
    /// Generate a fresh identity. Fails only on entropy / key-generation
    /// faults, which are fatal and non-retryable.
    pub fn generate() -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = PeerPublicKey(RsaPublicKey::from(&private));
        Ok(Self {
            peer_id: Uuid::new_v4().to_string(),
            public,
            private,
        })
    }

    /// Reload a persisted identity from its stored encodings.
    pub fn from_parts(
        peer_id: impl Into<String>,
        public_b64: &str,
        private_b64: &str,
    ) -> Result<Self, CryptoError> {
        let public = PeerPublicKey::from_b64(public_b64)?;
        let private_der = Zeroizing::new(B64.decode(private_b64)?);
        let private = RsaPrivateKey::from_pkcs8_der(&private_der)
            .map_err(|e| CryptoError::KeyDecodeFailure(e.to_string()))?;
        Ok(Self {
            peer_id: peer_id.into(),
            public,
            private,
        })
    }

    pub fn public_key(&self) -> &PeerPublicKey {
        &self.public
    }

    /// Base64 SPKI DER, the form uploaded on `register`.
    pub fn public_key_b64(&self) -> Result<String, CryptoError> {
        self.public.to_b64()
    }

    /// Base64 PKCS#8 DER for local persistence. Zeroized on drop.
    pub fn private_key_b64(&self) -> Result<Zeroizing<String>, CryptoError> {
        let der = self
            .private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::KeyDecodeFailure(e.to_string()))?;
        Ok(Zeroizing::new(B64.encode(der.as_bytes())))
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }
}
