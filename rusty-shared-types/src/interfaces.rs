//! Collaborators the governance layer consumes but does not implement.
//!
//! The node wires concrete implementations (chain state, peer manager, wallet)
//! into a `GovernanceContext`; tests use in-memory fakes.

use std::net::SocketAddr;

use crate::p2p::{GovernanceMessage, Inv, PeerId};
use crate::{Hash, OutPoint, Transaction, TxOutput};

/// Read access to the active chain.
pub trait ChainView: Send + Sync {
    /// Height of the active tip, `None` before genesis is connected.
    fn best_height(&self) -> Option<u64>;

    /// Hash of the active-chain block at `height`.
    fn block_hash(&self, height: u64) -> Option<Hash>;

    /// Height and time of a block, only if it is part of the active chain.
    fn block_in_active_chain(&self, block_hash: &Hash) -> Option<(u64, i64)>;

    /// A transaction and the hash of the block containing it (`None` if unconfirmed).
    fn get_transaction(&self, txid: &Hash) -> Option<(Transaction, Option<Hash>)>;

    /// Confirmation depth of an unspent output at `height`; `None` if spent or unknown.
    fn coin_depth(&self, outpoint: &OutPoint, height: u64) -> Option<u64>;

    /// The unspent output itself, used to tie a collateral to its key.
    fn unspent_output(&self, outpoint: &OutPoint) -> Option<TxOutput>;

    /// Network-adjusted unix time in seconds.
    fn adjusted_time(&self) -> i64;
}

/// Message delivery and peer scoring.
pub trait PeerGateway: Send + Sync {
    fn misbehaving(&self, peer: PeerId, score: u32);

    fn push_message(&self, peer: PeerId, message: GovernanceMessage);

    fn push_inventory(&self, peer: PeerId, inv: Inv);

    /// Announce an object to every connected peer.
    fn relay_inventory(&self, inv: Inv);

    /// Connected peers with their negotiated protocol version.
    fn connected_peers(&self) -> Vec<(PeerId, u32)>;

    fn peer_address(&self, peer: PeerId) -> Option<SocketAddr>;
}

/// Wallet operations needed to submit finalized budgets.
pub trait CollateralWallet: Send + Sync {
    /// Creates, commits and broadcasts a fee transaction carrying `OP_RETURN <object_hash>`.
    /// Returns the transaction id.
    fn create_budget_collateral(&self, object_hash: &Hash, fee: u64) -> Result<Hash, String>;
}
