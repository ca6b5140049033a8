//! Stateless validation and signing of masternode broadcasts and pings.

use thiserror::Error;

use rusty_crypto::{sign_message, verify_message, RustyKeyPair, SignatureScheme};
use rusty_shared_types::interfaces::ChainView;
use rusty_shared_types::masternode::{MasternodeBroadcast, MasternodePing};
use rusty_shared_types::script::script_for_pubkey;
use rusty_shared_types::PublicKey;

/// How far a signature time may lie ahead of (or behind, for pings) network time.
pub const MAX_SIG_TIME_DRIFT: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MasternodeError {
    #[error("signature time {0} is too far in the future")]
    SigTimeInFuture(i64),
    #[error("signature time {0} is too far in the past")]
    SigTimeTooOld(i64),
    #[error("obsolete protocol version {0}")]
    ObsoleteProtocol(u32),
    #[error("bad broadcast signature")]
    InvalidBroadcastSignature,
    #[error("bad ping signature")]
    InvalidPingSignature,
    #[error("broadcast is not newer than the known entry")]
    StaleBroadcast,
    #[error("entry was re-announced too recently")]
    BroadcastTooSoon,
    #[error("collateral output not found or spent")]
    CollateralNotFound,
    #[error("collateral has {found} confirmations, {required} required")]
    CollateralImmature { required: u64, found: u64 },
    #[error("collateral is not owned by the announced key")]
    CollateralKeyMismatch,
    #[error("ping references a block outside the active chain")]
    UnknownBlock,
    #[error("ping from unknown masternode")]
    UnknownMasternode,
    #[error("ping arrived before the minimum interval")]
    PingTooEarly,
    #[error("masternode list already requested by this peer")]
    ListAlreadyRequested,
}

impl MasternodeError {
    /// Misbehaviour score to charge the sending peer.
    pub fn dos_score(&self) -> u32 {
        match self {
            MasternodeError::SigTimeInFuture(_) | MasternodeError::SigTimeTooOld(_) => 1,
            MasternodeError::InvalidBroadcastSignature => 100,
            MasternodeError::InvalidPingSignature | MasternodeError::CollateralKeyMismatch => 33,
            MasternodeError::ListAlreadyRequested => 34,
            _ => 0,
        }
    }
}

pub fn sign_broadcast(mnb: &mut MasternodeBroadcast, collateral_key: &RustyKeyPair, hash_scheme: bool) {
    mnb.signature = sign_message(
        collateral_key,
        &mnb.signing_payload(hash_scheme),
        SignatureScheme::for_upgrade(hash_scheme),
    );
}

pub fn sign_ping(ping: &mut MasternodePing, masternode_key: &RustyKeyPair, hash_scheme: bool) {
    ping.signature = sign_message(
        masternode_key,
        &ping.signing_payload(hash_scheme),
        SignatureScheme::for_upgrade(hash_scheme),
    );
}

/// Verifies a signature over `payload(scheme)`. Once the hash scheme is
/// active, signatures made with the legacy scheme are still accepted.
pub(crate) fn verify_signed<F>(pubkey: &PublicKey, signature: &[u8], hash_scheme: bool, payload: F) -> bool
where
    F: Fn(bool) -> Vec<u8>,
{
    let check = |hash: bool| {
        verify_message(pubkey, &payload(hash), signature, SignatureScheme::for_upgrade(hash)).is_ok()
    };
    (hash_scheme && check(true)) || check(false)
}

/// Checks that do not depend on the registry: time window, protocol and signature.
pub fn check_broadcast(
    mnb: &MasternodeBroadcast,
    now: i64,
    min_protocol: u32,
    hash_scheme: bool,
) -> Result<(), MasternodeError> {
    if mnb.sig_time > now + MAX_SIG_TIME_DRIFT {
        return Err(MasternodeError::SigTimeInFuture(mnb.sig_time));
    }
    if mnb.protocol_version < min_protocol {
        return Err(MasternodeError::ObsoleteProtocol(mnb.protocol_version));
    }
    if !verify_signed(&mnb.collateral_pubkey, &mnb.signature, hash_scheme, |hash| {
        mnb.signing_payload(hash)
    }) {
        return Err(MasternodeError::InvalidBroadcastSignature);
    }
    Ok(())
}

/// The collateral must be unspent, deep enough and locked to the collateral key.
pub fn check_collateral_inputs(
    mnb: &MasternodeBroadcast,
    chain: &dyn ChainView,
    min_confirmations: u64,
) -> Result<(), MasternodeError> {
    let outpoint = mnb.vin.outpoint();
    let output = chain
        .unspent_output(outpoint)
        .ok_or(MasternodeError::CollateralNotFound)?;
    if output.script_pubkey != script_for_pubkey(&mnb.collateral_pubkey) {
        return Err(MasternodeError::CollateralKeyMismatch);
    }
    let height = chain.best_height().ok_or(MasternodeError::CollateralNotFound)?;
    let depth = chain
        .coin_depth(outpoint, height)
        .ok_or(MasternodeError::CollateralNotFound)?;
    if depth < min_confirmations {
        return Err(MasternodeError::CollateralImmature {
            required: min_confirmations,
            found: depth,
        });
    }
    Ok(())
}

/// Time window and signature of a ping, given the key of the entry it refreshes.
pub fn check_ping(
    ping: &MasternodePing,
    masternode_pubkey: &PublicKey,
    now: i64,
    hash_scheme: bool,
) -> Result<(), MasternodeError> {
    if ping.sig_time > now + MAX_SIG_TIME_DRIFT {
        return Err(MasternodeError::SigTimeInFuture(ping.sig_time));
    }
    if ping.sig_time <= now - MAX_SIG_TIME_DRIFT {
        return Err(MasternodeError::SigTimeTooOld(ping.sig_time));
    }
    if !verify_signed(masternode_pubkey, &ping.signature, hash_scheme, |hash| {
        ping.signing_payload(hash)
    }) {
        return Err(MasternodeError::InvalidPingSignature);
    }
    Ok(())
}
