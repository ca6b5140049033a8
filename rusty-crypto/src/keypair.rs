//! Keypair generation and management for masternode and spork keys.

use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer};
use rand::RngCore;

use crate::CryptoError;

/// Represents a cryptographic key pair (public and secret key).
pub struct RustyKeyPair {
    keypair: Keypair,
}

impl RustyKeyPair {
    /// Generates a new random key pair.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    /// Builds the key pair whose secret key is `seed`.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_bytes(seed).map_err(|_| CryptoError::InvalidSecretKey)?;
        let public = PublicKey::from(&secret);
        Ok(RustyKeyPair {
            keypair: Keypair { secret, public },
        })
    }

    /// Returns the public key of this key pair.
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public
    }

    /// Raw public key bytes, as stored in masternode entries.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.keypair.public.to_bytes()
    }

    /// Signs the given message with the secret key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }
}

impl std::fmt::Debug for RustyKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RustyKeyPair({})", hex::encode(self.public_key_bytes()))
    }
}
