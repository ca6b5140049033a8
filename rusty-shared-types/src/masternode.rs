use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::{hash_serialized, Hash, OutPoint, PublicKey};

/// Represents the unique identifier for a Masternode, derived from its collateral UTXO.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MasternodeID(pub OutPoint);

impl MasternodeID {
    /// Get the bytes representation of the MasternodeID
    pub fn as_bytes(&self) -> Vec<u8> {
        bincode::serialize(&self.0).unwrap_or_default()
    }

    pub fn outpoint(&self) -> &OutPoint {
        &self.0
    }

    pub fn to_short_string(&self) -> String {
        self.0.to_short_string()
    }
}

impl From<OutPoint> for MasternodeID {
    fn from(outpoint: OutPoint) -> Self {
        MasternodeID(outpoint)
    }
}

impl fmt::Display for MasternodeID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Liveness state of a masternode entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MasternodeStatus {
    PreEnabled,
    Enabled,
    Expired,
    NewStartRequired,
    Removed,
    WatchdogExpired,
    OutpointSpent,
}

impl MasternodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MasternodeStatus::PreEnabled => "PRE_ENABLED",
            MasternodeStatus::Enabled => "ENABLED",
            MasternodeStatus::Expired => "EXPIRED",
            MasternodeStatus::NewStartRequired => "NEW_START_REQUIRED",
            MasternodeStatus::Removed => "REMOVE",
            MasternodeStatus::WatchdogExpired => "WATCHDOG_EXPIRED",
            MasternodeStatus::OutpointSpent => "OUTPOINT_SPENT",
        }
    }
}

/// Periodic liveness proof signed by the masternode key (`mnp`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodePing {
    pub vin: MasternodeID,
    /// Hash of a recent block, proving the pinger follows the chain
    pub block_hash: Hash,
    pub sig_time: i64,
    pub signature: Vec<u8>,
}

impl MasternodePing {
    /// Identity of the ping on the wire (covers vin and sig time only).
    pub fn hash(&self) -> Hash {
        hash_serialized(&(&self.vin, self.sig_time))
    }

    /// Bytes covered by the masternode key signature, in the legacy string
    /// form or the hash form.
    pub fn signing_payload(&self, hash_scheme: bool) -> Vec<u8> {
        if hash_scheme {
            hash_serialized(&(&self.vin, &self.block_hash, self.sig_time)).to_vec()
        } else {
            format!(
                "{}{}{}",
                self.vin.to_short_string(),
                hex::encode(self.block_hash),
                self.sig_time
            )
            .into_bytes()
        }
    }
}

/// Announcement of a masternode bound to a collateral output (`mnb`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeBroadcast {
    pub vin: MasternodeID,
    pub addr: SocketAddr,
    /// Key owning the collateral output
    pub collateral_pubkey: PublicKey,
    /// Operational key used for pings and votes
    pub masternode_pubkey: PublicKey,
    /// Signature by the collateral key
    pub signature: Vec<u8>,
    pub sig_time: i64,
    pub protocol_version: u32,
    pub last_ping: MasternodePing,
}

impl MasternodeBroadcast {
    pub fn hash(&self) -> Hash {
        hash_serialized(&(&self.vin, &self.collateral_pubkey, self.sig_time))
    }

    /// Bytes covered by the collateral key signature.
    pub fn signing_payload(&self, hash_scheme: bool) -> Vec<u8> {
        if hash_scheme {
            hash_serialized(&(
                &self.vin,
                &self.addr,
                &self.collateral_pubkey,
                &self.masternode_pubkey,
                self.sig_time,
                self.protocol_version,
            ))
            .to_vec()
        } else {
            format!(
                "{}{}{}{}{}",
                self.addr,
                self.sig_time,
                hex::encode(self.collateral_pubkey),
                hex::encode(self.masternode_pubkey),
                self.protocol_version
            )
            .into_bytes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping(sig_time: i64) -> MasternodePing {
        MasternodePing {
            vin: MasternodeID(OutPoint::new([1u8; 32], 0)),
            block_hash: [2u8; 32],
            sig_time,
            signature: vec![],
        }
    }

    #[test]
    fn test_ping_hash_ignores_signature() {
        let a = ping(100);
        let mut b = ping(100);
        b.signature = vec![9; 64];
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), ping(101).hash());
    }

    #[test]
    fn test_ping_hash_payload_covers_block() {
        let a = ping(100);
        let mut b = ping(100);
        b.block_hash = [3u8; 32];
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.signing_payload(true), b.signing_payload(true));
        assert_eq!(a.signing_payload(true).len(), 32);
    }
}
