//! Message signing for governance objects.
//!
//! Two schemes coexist: the legacy scheme signs a prefixed string message,
//! the newer one signs the 32-byte object hash directly. Which one applies is
//! decided by the caller from the network-upgrade height.

use ed25519_dalek::{PublicKey, Signature, Verifier};

use crate::keypair::RustyKeyPair;
use crate::CryptoError;

const MESSAGE_MAGIC: &str = "Rusty Coin Signed Message:\n";

/// How a payload is turned into the bytes that get signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// Sign `blake3(magic ‖ payload)` where the payload is a string message
    LegacyMessage,
    /// Sign the payload (an object hash) as is
    Hash,
}

impl SignatureScheme {
    pub fn for_upgrade(hash_scheme_active: bool) -> Self {
        if hash_scheme_active {
            SignatureScheme::Hash
        } else {
            SignatureScheme::LegacyMessage
        }
    }

    pub fn is_hash(&self) -> bool {
        matches!(self, SignatureScheme::Hash)
    }
}

fn message_digest(payload: &[u8], scheme: SignatureScheme) -> Vec<u8> {
    match scheme {
        SignatureScheme::LegacyMessage => {
            let mut hasher = blake3::Hasher::new();
            hasher.update(MESSAGE_MAGIC.as_bytes());
            hasher.update(payload);
            hasher.finalize().as_bytes().to_vec()
        }
        SignatureScheme::Hash => payload.to_vec(),
    }
}

pub fn sign_message(keypair: &RustyKeyPair, payload: &[u8], scheme: SignatureScheme) -> Vec<u8> {
    keypair.sign(&message_digest(payload, scheme)).to_bytes().to_vec()
}

pub fn verify_message(
    public_key: &[u8; 32],
    payload: &[u8],
    signature: &[u8],
    scheme: SignatureScheme,
) -> Result<(), CryptoError> {
    let public_key = PublicKey::from_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = Signature::try_from(signature).map_err(|_| CryptoError::MalformedSignature)?;
    public_key
        .verify(&message_digest(payload, scheme), &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}
