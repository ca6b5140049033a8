//! Progress of the initial masternode and governance sync.

use log::info;
use std::collections::HashSet;

use rusty_shared_types::Hash;

/// Seconds without new items before an asset is considered complete.
pub const SYNC_TIMEOUT_SECONDS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncAsset {
    Initial,
    Sporks,
    List,
    Budget,
    Finished,
}

impl SyncAsset {
    pub fn name(&self) -> &'static str {
        match self {
            SyncAsset::Initial => "MASTERNODE_SYNC_INITIAL",
            SyncAsset::Sporks => "MASTERNODE_SYNC_SPORKS",
            SyncAsset::List => "MASTERNODE_SYNC_LIST",
            SyncAsset::Budget => "MASTERNODE_SYNC_BUDGET",
            SyncAsset::Finished => "MASTERNODE_SYNC_FINISHED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MasternodeSync {
    blockchain_synced: bool,
    asset: SyncAsset,
    asset_started: i64,
    seen_list_items: HashSet<Hash>,
    seen_budget_items: HashSet<Hash>,
    last_list_item: i64,
    last_budget_item: i64,
}

impl Default for MasternodeSync {
    fn default() -> Self {
        Self::new()
    }
}

impl MasternodeSync {
    pub fn new() -> Self {
        Self {
            blockchain_synced: false,
            asset: SyncAsset::Initial,
            asset_started: 0,
            seen_list_items: HashSet::new(),
            seen_budget_items: HashSet::new(),
            last_list_item: 0,
            last_budget_item: 0,
        }
    }

    pub fn is_blockchain_synced(&self) -> bool {
        self.blockchain_synced
    }

    pub fn set_blockchain_synced(&mut self, synced: bool) {
        self.blockchain_synced = synced;
    }

    pub fn is_synced(&self) -> bool {
        self.asset == SyncAsset::Finished
    }

    pub fn is_masternode_list_synced(&self) -> bool {
        self.asset > SyncAsset::List
    }

    pub fn asset(&self) -> SyncAsset {
        self.asset
    }

    pub fn reset(&mut self) {
        *self = Self {
            blockchain_synced: self.blockchain_synced,
            ..Self::new()
        };
    }

    pub fn mark_synced(&mut self) {
        self.asset = SyncAsset::Finished;
    }

    pub fn added_masternode_list(&mut self, hash: Hash, now: i64) {
        if self.seen_list_items.insert(hash) {
            self.last_list_item = now;
        }
    }

    pub fn added_budget_item(&mut self, hash: Hash, now: i64) {
        if self.seen_budget_items.insert(hash) {
            self.last_budget_item = now;
        }
    }

    pub fn list_items(&self) -> usize {
        self.seen_list_items.len()
    }

    pub fn budget_items(&self) -> usize {
        self.seen_budget_items.len()
    }

    fn switch_to(&mut self, asset: SyncAsset, now: i64) -> Option<SyncAsset> {
        info!("Masternode sync: {} -> {}", self.asset.name(), asset.name());
        self.asset = asset;
        self.asset_started = now;
        Some(asset)
    }

    /// Advances to the next asset once the current one has gone quiet.
    /// Returns the newly requested asset so the caller can issue its requests.
    pub fn process(&mut self, now: i64) -> Option<SyncAsset> {
        if !self.blockchain_synced {
            return None;
        }
        let quiet_since = |last_item: i64, started: i64| now - last_item.max(started) > SYNC_TIMEOUT_SECONDS;
        match self.asset {
            SyncAsset::Initial => self.switch_to(SyncAsset::Sporks, now),
            SyncAsset::Sporks if now - self.asset_started > SYNC_TIMEOUT_SECONDS => {
                self.switch_to(SyncAsset::List, now)
            }
            SyncAsset::List if quiet_since(self.last_list_item, self.asset_started) => {
                self.switch_to(SyncAsset::Budget, now)
            }
            SyncAsset::Budget if quiet_since(self.last_budget_item, self.asset_started) => {
                self.switch_to(SyncAsset::Finished, now)
            }
            _ => None,
        }
    }
}
