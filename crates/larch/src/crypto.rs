use std::time::{SystemTime, UNIX_EPOCH};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::types::RouterId;

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

/// Fixed-size public key.
pub type PublicKey = [u8; PUBLIC_KEY_SIZE];

/// Fixed-size signature.
pub type Sig = [u8; SIGNATURE_SIZE];

/// Cryptographic identity: holds signing key and derived public key.
pub struct Crypto {
    pub signing_key: SigningKey,
    pub public_key: PublicKey,
}

impl Crypto {
    pub fn new(signing_key: SigningKey) -> Self {
        let public_key: PublicKey = signing_key.verifying_key().to_bytes();
        Self {
            signing_key,
            public_key,
        }
    }

    /// Sign a message with our private key.
    pub fn sign(&self, message: &[u8]) -> Sig {
        let sig = self.signing_key.sign(message);
        sig.to_bytes()
    }

    /// Verify a signature from the given public key.
    pub fn verify(key: &PublicKey, message: &[u8], sig: &Sig) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(key) else {
            return false;
        };
        let signature = Signature::from_bytes(sig);
        verifying_key.verify(message, &signature).is_ok()
    }

    /// Sign a message with an arbitrary signing key.
    pub fn sign_with_key(key: &SigningKey, message: &[u8]) -> Sig {
        let sig = key.sign(message);
        sig.to_bytes()
    }

    /// Get our public key as a RouterId.
    pub fn router_id(&self) -> RouterId {
        RouterId(self.public_key)
    }

    /// Wall clock in milliseconds since the Unix epoch.
    pub fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Draw from the process RNG.
    pub fn randint() -> u64 {
        rand::random()
    }
}
