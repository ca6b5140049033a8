//! Masternode registry, payment ordering and the local masternode.

pub mod active_masternode;
pub mod broadcast;
pub mod cache;
pub mod masternode;
pub mod mn_list;
pub mod payment_queue;
pub mod spork;
pub mod sync;

pub use active_masternode::{ActiveMasternode, ActiveMasternodeConfig, ActiveMasternodeStatus};
pub use broadcast::MasternodeError;
pub use masternode::{Masternode, MasternodeScore};
pub use mn_list::{MasternodeRegistry, RegistryConfig, RegistrySnapshot};
pub use payment_queue::PaymentOrderEngine;
pub use spork::{SporkError, SporkManager};
pub use sync::{MasternodeSync, SyncAsset};
