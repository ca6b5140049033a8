//! Types shared by the Rusty Coin masternode and governance crates.
//!
//! Chain primitives (outpoints, transactions, scripts), network parameters,
//! the wire representation of every governance object, and the traits through
//! which the governance layer talks to the chain, the peer network and the wallet.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod flat_file;
pub mod governance;
pub mod interfaces;
pub mod masternode;
pub mod p2p;
pub mod params;
pub mod script;
pub mod spork;

pub use flat_file::{FlatFileError, FlatFileStore};
pub use params::{ChainParams, Network};

pub type PublicKey = [u8; 32];
pub type Hash = [u8; 32];
pub type PubKeyHash = [u8; 20];

/// Number of base units in one coin.
pub const COIN: u64 = 100_000_000;

/// The all-zero hash, used as the "no object" marker on the wire.
pub const NULL_HASH: Hash = [0u8; 32];

/// Hashes any serializable value as `blake3(bincode(value))`.
pub fn hash_serialized<T: Serialize + ?Sized>(value: &T) -> Hash {
    match bincode::serialize(value) {
        Ok(bytes) => blake3::hash(&bytes).into(),
        Err(_) => NULL_HASH,
    }
}

/// Represents a reference to a specific transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// The transaction ID (hash) of the transaction containing the output.
    pub txid: [u8; 32],
    /// The index of the output within that transaction.
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    /// A null outpoint references no output at all.
    pub fn null() -> Self {
        OutPoint { txid: NULL_HASH, vout: u32::MAX }
    }

    pub fn is_null(&self) -> bool {
        self.txid == NULL_HASH && self.vout == u32::MAX
    }

    /// Compact `txid-vout` form used in logs and signed vote messages.
    pub fn to_short_string(&self) -> String {
        format!("{}-{}", hex::encode(self.txid), self.vout)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutPoint({}, {})", hex::encode(&self.txid[..5]), self.vout)
    }
}

impl From<[u8; 32]> for OutPoint {
    fn from(txid: [u8; 32]) -> Self {
        OutPoint {
            txid,
            vout: 0, // Default vout to 0 when converting from a raw txid
        }
    }
}

/// Represents a transaction input, referencing a previous transaction's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// The `OutPoint` referencing the output being spent.
    pub previous_output: OutPoint,
    /// The script signature, providing proof of ownership.
    pub script_sig: Vec<u8>,
    /// A sequence number.
    pub sequence: u32,
}

/// Represents a transaction output, specifying a value and a locking script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// The value of the output in base units.
    pub value: u64,
    /// The locking script (scriptPubKey) that defines the conditions for spending this output.
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    /// Creates a new `TxOutput`.
    ///
    /// # Arguments
    /// * `value` - The value of the output in base units
    /// * `script_pubkey` - The locking script that defines spending conditions
    pub fn new(value: u64, script_pubkey: Vec<u8>) -> Self {
        TxOutput { value, script_pubkey }
    }

    /// Extracts the public key hash from a P2PKH script, if applicable.
    pub fn extract_public_key_hash(&self) -> Option<PubKeyHash> {
        script::extract_p2pkh(&self.script_pubkey)
    }
}

/// A transaction as seen by the governance layer.
///
/// Only the parts needed for collateral checks and block payee validation are modelled.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transaction {
    /// The version of the transaction format.
    pub version: u32,
    /// A list of transaction inputs.
    pub inputs: Vec<TxInput>,
    /// A list of transaction outputs.
    pub outputs: Vec<TxOutput>,
    /// The earliest block height at which the transaction may be included.
    pub lock_time: u32,
}

impl Transaction {
    /// Returns the canonical byte representation of the transaction.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }

    /// Calculates and returns the transaction ID (hash) of the transaction.
    pub fn txid(&self) -> Hash {
        hash_serialized(self)
    }

    /// Sum of all output values.
    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }
}

/// Renders a hash for log lines.
pub fn short_hash(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}
