//! A single masternode entry as tracked by the registry.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::net::SocketAddr;

use rusty_shared_types::interfaces::ChainView;
use rusty_shared_types::masternode::{
    MasternodeBroadcast, MasternodeID, MasternodePing, MasternodeStatus,
};
use rusty_shared_types::{hash_serialized, Hash, PublicKey};

pub const MASTERNODE_MIN_MNB_SECONDS: i64 = 5 * 60;
pub const MASTERNODE_MIN_MNP_SECONDS: i64 = 10 * 60;
pub const MASTERNODE_PING_SECONDS: i64 = 5 * 60;
pub const MASTERNODE_EXPIRATION_SECONDS: i64 = 120 * 60;
pub const MASTERNODE_REMOVAL_SECONDS: i64 = 130 * 60;
/// Nodes younger than this are skipped by ranking once payment enforcement is on.
pub const MASTERNODE_WINNER_MIN_AGE: i64 = 8000;

const MONTH_SECONDS: i64 = 60 * 60 * 24 * 30;

/// 256-bit unsigned distance, compared as a big-endian number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MasternodeScore(pub [u8; 32]);

impl MasternodeScore {
    pub const ZERO: MasternodeScore = MasternodeScore([0u8; 32]);

    /// |a - b| over big-endian 256-bit integers.
    pub fn abs_diff(a: &[u8; 32], b: &[u8; 32]) -> Self {
        let (hi, lo) = match a.cmp(b) {
            Ordering::Less => (b, a),
            _ => (a, b),
        };
        let mut out = [0u8; 32];
        let mut borrow = 0i16;
        for i in (0..32).rev() {
            let mut d = hi[i] as i16 - lo[i] as i16 - borrow;
            if d < 0 {
                d += 256;
                borrow = 1;
            } else {
                borrow = 0;
            }
            out[i] = d as u8;
        }
        MasternodeScore(out)
    }
}

impl fmt::Display for MasternodeScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Registry entry built from an accepted broadcast and refreshed by pings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Masternode {
    pub vin: MasternodeID,
    pub addr: SocketAddr,
    pub collateral_pubkey: PublicKey,
    pub masternode_pubkey: PublicKey,
    pub signature: Vec<u8>,
    pub sig_time: i64,
    pub protocol_version: u32,
    pub last_ping: MasternodePing,
    /// Unix time of the last block that paid this node, 0 if never seen
    pub last_paid_time: i64,
    pub last_paid_height: u64,
    pub status: MasternodeStatus,
}

impl Masternode {
    pub fn from_broadcast(mnb: &MasternodeBroadcast) -> Self {
        Masternode {
            vin: mnb.vin.clone(),
            addr: mnb.addr,
            collateral_pubkey: mnb.collateral_pubkey,
            masternode_pubkey: mnb.masternode_pubkey,
            signature: mnb.signature.clone(),
            sig_time: mnb.sig_time,
            protocol_version: mnb.protocol_version,
            last_ping: mnb.last_ping.clone(),
            last_paid_time: 0,
            last_paid_height: 0,
            status: MasternodeStatus::Enabled,
        }
    }

    /// Rebuilds the broadcast this entry was created from, with its latest ping.
    pub fn to_broadcast(&self) -> MasternodeBroadcast {
        MasternodeBroadcast {
            vin: self.vin.clone(),
            addr: self.addr,
            collateral_pubkey: self.collateral_pubkey,
            masternode_pubkey: self.masternode_pubkey,
            signature: self.signature.clone(),
            sig_time: self.sig_time,
            protocol_version: self.protocol_version,
            last_ping: self.last_ping.clone(),
        }
    }

    /// Replaces the announced fields with a strictly newer broadcast signed for
    /// the same collateral key. Returns false and leaves the entry untouched otherwise.
    pub fn update_from_new_broadcast(&mut self, mnb: &MasternodeBroadcast) -> bool {
        if mnb.sig_time <= self.sig_time || mnb.collateral_pubkey != self.collateral_pubkey {
            return false;
        }
        self.addr = mnb.addr;
        self.collateral_pubkey = mnb.collateral_pubkey;
        self.masternode_pubkey = mnb.masternode_pubkey;
        self.signature = mnb.signature.clone();
        self.sig_time = mnb.sig_time;
        self.protocol_version = mnb.protocol_version;
        if mnb.last_ping.sig_time > self.last_ping.sig_time {
            self.last_ping = mnb.last_ping.clone();
        }
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.status == MasternodeStatus::Enabled
    }

    pub fn is_pinged_within(&self, seconds: i64, now: i64) -> bool {
        now - self.last_ping.sig_time < seconds
    }

    pub fn is_broadcasted_within(&self, seconds: i64, now: i64) -> bool {
        now - self.sig_time < seconds
    }

    /// Refreshes `status` from ping age and collateral state.
    pub fn check(&mut self, now: i64, chain: &dyn ChainView) {
        if self.status == MasternodeStatus::OutpointSpent {
            return;
        }

        if let Some(height) = chain.best_height() {
            if chain.coin_depth(self.vin.outpoint(), height).is_none() {
                self.status = MasternodeStatus::OutpointSpent;
                return;
            }
        }

        if !self.is_pinged_within(MASTERNODE_REMOVAL_SECONDS, now) {
            self.status = MasternodeStatus::Removed;
            return;
        }

        if !self.is_pinged_within(MASTERNODE_EXPIRATION_SECONDS, now) {
            self.status = MasternodeStatus::Expired;
            return;
        }

        if self.last_ping.sig_time - self.sig_time < MASTERNODE_MIN_MNP_SECONDS {
            self.status = MasternodeStatus::PreEnabled;
            return;
        }

        self.status = MasternodeStatus::Enabled;
    }

    /// Deterministic distance between this node and a block hash.
    pub fn calculate_score(&self, block_hash: &Hash) -> MasternodeScore {
        let aux = hash_serialized(&self.vin);
        let hash2 = blake3::hash(block_hash);
        let mut hasher = blake3::Hasher::new();
        hasher.update(block_hash);
        hasher.update(&aux);
        let hash3 = hasher.finalize();
        MasternodeScore::abs_diff(hash3.as_bytes(), hash2.as_bytes())
    }

    /// Seconds since the last payment. Nodes never paid in the last month get a
    /// month plus a stable per-node offset so their order is deterministic.
    pub fn seconds_since_payment(&self, now: i64) -> i64 {
        let elapsed = now - self.last_paid_time;
        if self.last_paid_time > 0 && elapsed < MONTH_SECONDS {
            return elapsed;
        }
        let tiebreak = hash_serialized(&(&self.vin, self.sig_time));
        let offset = u32::from_be_bytes([tiebreak[0], tiebreak[1], tiebreak[2], tiebreak[3]]);
        MONTH_SECONDS + offset as i64
    }

    pub fn record_payment(&mut self, height: u64, block_time: i64) {
        if block_time > self.last_paid_time {
            self.last_paid_time = block_time;
            self.last_paid_height = height;
        }
    }
}
