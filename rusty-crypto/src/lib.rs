//! Cryptographic primitives for Rusty Coin masternodes and governance

pub mod keypair;
pub mod signature;

pub use keypair::RustyKeyPair;
pub use signature::{sign_message, verify_message, SignatureScheme};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature verification failed")]
    VerificationFailed,
}
