//! Signed network feature flags.

use log::{debug, info, warn};
use std::collections::HashMap;
use thiserror::Error;

use rusty_crypto::{sign_message, RustyKeyPair, SignatureScheme};
use rusty_shared_types::interfaces::PeerGateway;
use rusty_shared_types::p2p::{GovernanceMessage, Inv, InventoryKind, PeerId};
use rusty_shared_types::spork::{SporkId, SporkMessage};
use rusty_shared_types::{Hash, PublicKey};

use crate::broadcast::verify_signed;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SporkError {
    #[error("unknown spork {0}")]
    UnknownSpork(u32),
    #[error("spork is not newer than the active one")]
    Stale,
    #[error("invalid spork signature")]
    InvalidSignature,
    #[error("no spork key configured for this network")]
    NoSporkKey,
    #[error("key does not match the network spork key")]
    NotSporkSigner,
}

impl SporkError {
    pub fn dos_score(&self) -> u32 {
        match self {
            SporkError::InvalidSignature => 100,
            _ => 0,
        }
    }
}

pub struct SporkManager {
    spork_pubkey: Option<PublicKey>,
    signer: Option<RustyKeyPair>,
    active: HashMap<SporkId, SporkMessage>,
    seen: HashMap<Hash, SporkMessage>,
}

impl SporkManager {
    pub fn new(spork_pubkey: Option<PublicKey>) -> Self {
        Self {
            spork_pubkey,
            signer: None,
            active: HashMap::new(),
            seen: HashMap::new(),
        }
    }

    /// Installs the spork signing key; it must match the network key.
    pub fn set_private_key(&mut self, keypair: RustyKeyPair) -> Result<(), SporkError> {
        let expected = self.spork_pubkey.ok_or(SporkError::NoSporkKey)?;
        if keypair.public_key_bytes() != expected {
            return Err(SporkError::NotSporkSigner);
        }
        info!("Spork signing key installed");
        self.signer = Some(keypair);
        Ok(())
    }

    pub fn value(&self, id: SporkId) -> i64 {
        self.active
            .get(&id)
            .map(|spork| spork.value)
            .unwrap_or_else(|| id.default_value())
    }

    /// A spork is on once its value (a timestamp) lies in the past.
    pub fn is_active(&self, id: SporkId, now: i64) -> bool {
        self.value(id) < now
    }

    fn verify(&self, spork: &SporkMessage, hash_scheme: bool) -> Result<(), SporkError> {
        let pubkey = self.spork_pubkey.ok_or(SporkError::NoSporkKey)?;
        if !verify_signed(&pubkey, &spork.signature, hash_scheme, |hash| {
            spork.signing_payload(hash)
        }) {
            return Err(SporkError::InvalidSignature);
        }
        Ok(())
    }

    /// Handles an inbound `spork`. Returns true when the active value changed.
    pub fn process_spork(
        &mut self,
        peer: PeerId,
        spork: &SporkMessage,
        hash_scheme: bool,
        peers: &dyn PeerGateway,
    ) -> Result<bool, SporkError> {
        let id = SporkId::from_number(spork.spork_id)
            .ok_or(SporkError::UnknownSpork(spork.spork_id))?;
        let hash = spork.hash();
        if self.seen.contains_key(&hash) {
            return Ok(false);
        }
        if let Some(current) = self.active.get(&id) {
            if current.time_signed >= spork.time_signed {
                debug!("spork - {} from peer {} is not newer, ignoring", id.name(), peer);
                return Err(SporkError::Stale);
            }
        }
        if let Err(e) = self.verify(spork, hash_scheme) {
            warn!("spork - invalid signature from peer {}", peer);
            peers.misbehaving(peer, e.dos_score());
            return Err(e);
        }

        info!("spork - new {} value {} signed at {}", id.name(), spork.value, spork.time_signed);
        self.seen.insert(hash, spork.clone());
        self.active.insert(id, spork.clone());
        peers.relay_inventory(Inv::new(InventoryKind::Spork, hash));
        Ok(true)
    }

    /// Signs a new value with the installed key, applies it and relays it.
    pub fn sign_and_relay(
        &mut self,
        id: SporkId,
        value: i64,
        now: i64,
        hash_scheme: bool,
        peers: &dyn PeerGateway,
    ) -> Result<SporkMessage, SporkError> {
        let signer = self.signer.as_ref().ok_or(SporkError::NoSporkKey)?;
        let mut spork = SporkMessage {
            spork_id: id.number(),
            value,
            time_signed: now,
            signature: Vec::new(),
        };
        spork.signature = sign_message(
            signer,
            &spork.signing_payload(hash_scheme),
            SignatureScheme::for_upgrade(hash_scheme),
        );
        self.verify(&spork, hash_scheme)?;

        let hash = spork.hash();
        self.seen.insert(hash, spork.clone());
        self.active.insert(id, spork.clone());
        peers.relay_inventory(Inv::new(InventoryKind::Spork, hash));
        Ok(spork)
    }

    /// Answers `getsporks` with every active spork.
    pub fn send_sporks(&self, peer: PeerId, peers: &dyn PeerGateway) {
        for spork in self.active.values() {
            peers.push_message(peer, GovernanceMessage::Spork(spork.clone()));
        }
    }

    pub fn get_spork(&self, hash: &Hash) -> Option<SporkMessage> {
        self.seen.get(hash).cloned()
    }

    /// Current value of every known spork, by name.
    pub fn show(&self) -> Vec<(&'static str, i64)> {
        SporkId::ALL
            .iter()
            .map(|id| (id.name(), self.value(*id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPeers {
        misbehaving: Mutex<Vec<(PeerId, u32)>>,
        relayed: Mutex<Vec<Inv>>,
    }

    impl PeerGateway for RecordingPeers {
        fn misbehaving(&self, peer: PeerId, score: u32) {
            self.misbehaving.lock().unwrap().push((peer, score));
        }
        fn push_message(&self, _peer: PeerId, _message: GovernanceMessage) {}
        fn push_inventory(&self, _peer: PeerId, _inv: Inv) {}
        fn relay_inventory(&self, inv: Inv) {
            self.relayed.lock().unwrap().push(inv);
        }
        fn connected_peers(&self) -> Vec<(PeerId, u32)> {
            Vec::new()
        }
        fn peer_address(&self, _peer: PeerId) -> Option<SocketAddr> {
            None
        }
    }

    fn signed(key: &RustyKeyPair, value: i64, time_signed: i64, hash_scheme: bool) -> SporkMessage {
        let mut spork = SporkMessage {
            spork_id: SporkId::BudgetEnforcement.number(),
            value,
            time_signed,
            signature: Vec::new(),
        };
        spork.signature = sign_message(
            key,
            &spork.signing_payload(hash_scheme),
            SignatureScheme::for_upgrade(hash_scheme),
        );
        spork
    }

    #[test]
    fn test_newer_spork_replaces_older() {
        let key = RustyKeyPair::from_seed(&[7u8; 32]).unwrap();
        let peers = RecordingPeers::default();
        let mut manager = SporkManager::new(Some(key.public_key_bytes()));

        assert!(!manager.is_active(SporkId::BudgetEnforcement, 1_000));
        assert!(manager.process_spork(1, &signed(&key, 500, 100, false), false, &peers).unwrap());
        assert!(manager.is_active(SporkId::BudgetEnforcement, 1_000));

        assert_eq!(
            manager.process_spork(1, &signed(&key, 5_000, 50, false), false, &peers),
            Err(SporkError::Stale)
        );
        assert_eq!(manager.value(SporkId::BudgetEnforcement), 500);
        assert_eq!(peers.relayed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_foreign_signature_is_penalized() {
        let key = RustyKeyPair::from_seed(&[7u8; 32]).unwrap();
        let other = RustyKeyPair::from_seed(&[8u8; 32]).unwrap();
        let peers = RecordingPeers::default();
        let mut manager = SporkManager::new(Some(key.public_key_bytes()));

        assert_eq!(
            manager.process_spork(4, &signed(&other, 500, 100, false), false, &peers),
            Err(SporkError::InvalidSignature)
        );
        assert_eq!(*peers.misbehaving.lock().unwrap(), vec![(4, 100)]);
    }

    #[test]
    fn test_sign_and_relay_requires_matching_key() {
        let key = RustyKeyPair::from_seed(&[7u8; 32]).unwrap();
        let other = RustyKeyPair::from_seed(&[8u8; 32]).unwrap();
        let peers = RecordingPeers::default();
        let mut manager = SporkManager::new(Some(key.public_key_bytes()));

        assert_eq!(manager.set_private_key(other), Err(SporkError::NotSporkSigner));
        manager.set_private_key(key).unwrap();
        let spork = manager
            .sign_and_relay(SporkId::MasternodePaymentEnforcement, 0, 100, true, &peers)
            .unwrap();
        assert_eq!(spork.spork_id, 10007);
        assert!(manager.is_active(SporkId::MasternodePaymentEnforcement, 1));
    }

    #[test]
    fn test_hash_signed_spork_needs_upgrade() {
        let key = RustyKeyPair::from_seed(&[7u8; 32]).unwrap();
        let peers = RecordingPeers::default();
        let mut manager = SporkManager::new(Some(key.public_key_bytes()));

        let hashed = signed(&key, 500, 100, true);
        assert_eq!(
            manager.process_spork(2, &hashed, false, &peers),
            Err(SporkError::InvalidSignature)
        );
        assert!(manager.process_spork(2, &hashed, true, &peers).unwrap());

        // A legacy signature is still honoured after the upgrade.
        assert!(manager
            .process_spork(2, &signed(&key, 600, 200, false), true, &peers)
            .unwrap());
        assert_eq!(manager.value(SporkId::BudgetEnforcement), 600);
    }
}
