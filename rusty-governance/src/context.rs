//! The governance context: one explicitly constructed owner of the masternode
//! registry, payment schedule, sporks, sync tracker, local masternode and the
//! budget coordinator, plus the background maintenance worker.
//!
//! Lock order extends the coordinator's: coordinator internals, active
//! masternode, payment schedule, registry, sync status. Sporks are a leaf.

use log::{debug, info, warn};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rusty_masternode::cache::{dump_masternode_cache, load_masternode_cache};
use rusty_masternode::masternode::MASTERNODE_PING_SECONDS;
use rusty_masternode::{
    ActiveMasternode, MasternodeRegistry, MasternodeSync, PaymentOrderEngine, RegistryConfig,
    SporkManager, SyncAsset,
};
use rusty_shared_types::governance::TrxValidationStatus;
use rusty_shared_types::interfaces::{ChainView, CollateralWallet, PeerGateway};
use rusty_shared_types::p2p::{GovernanceMessage, Inv, InventoryKind, PeerId};
use rusty_shared_types::script::{script_for_pubkey, script_to_string};
use rusty_shared_types::spork::SporkId;
use rusty_shared_types::{ChainParams, Transaction, TxOutput};

use crate::budget_db::{dump_budgets, load_budgets};
use crate::budget_manager::{lock, BudgetCoordinator};
use crate::config::BudgetConfig;
use crate::error::Result;

/// Registry sweep and payment schedule cleanup cadence, in ticks.
pub const MAINTENANCE_SWEEP_TICKS: u64 = 60;

/// Who the next block pays besides the miner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockPayee {
    Budget { payee: Vec<u8>, amount: u64 },
    Masternode { payee: Vec<u8>, amount: u64 },
}

pub struct GovernanceContext {
    chain: Arc<dyn ChainView>,
    peers: Arc<dyn PeerGateway>,
    params: ChainParams,
    registry: Arc<Mutex<MasternodeRegistry>>,
    payments: Mutex<PaymentOrderEngine>,
    sporks: Mutex<SporkManager>,
    sync: Arc<Mutex<MasternodeSync>>,
    active: Option<Arc<Mutex<ActiveMasternode>>>,
    budget: BudgetCoordinator,
}

impl GovernanceContext {
    pub fn new(
        chain: Arc<dyn ChainView>,
        peers: Arc<dyn PeerGateway>,
        params: ChainParams,
        budget_config: BudgetConfig,
        active: Option<ActiveMasternode>,
        wallet: Option<Arc<dyn CollateralWallet>>,
    ) -> Self {
        let registry = Arc::new(Mutex::new(MasternodeRegistry::new(
            Arc::clone(&chain),
            Arc::clone(&peers),
            params.clone(),
            RegistryConfig::from_params(&params),
        )));
        let sync = Arc::new(Mutex::new(MasternodeSync::new()));
        let active = active.map(|mn| Arc::new(Mutex::new(mn)));
        let budget = BudgetCoordinator::new(
            Arc::clone(&chain),
            Arc::clone(&peers),
            params.clone(),
            budget_config,
            Arc::clone(&registry),
            Arc::clone(&sync),
            active.clone(),
            wallet,
        );
        Self {
            payments: Mutex::new(PaymentOrderEngine::new(Arc::clone(&chain))),
            sporks: Mutex::new(SporkManager::new(params.spork_pubkey)),
            chain,
            peers,
            params,
            registry,
            sync,
            active,
            budget,
        }
    }

    pub fn chain(&self) -> &Arc<dyn ChainView> {
        &self.chain
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn registry(&self) -> &Arc<Mutex<MasternodeRegistry>> {
        &self.registry
    }

    pub fn payments(&self) -> &Mutex<PaymentOrderEngine> {
        &self.payments
    }

    pub fn sporks(&self) -> &Mutex<SporkManager> {
        &self.sporks
    }

    pub fn sync_status(&self) -> &Arc<Mutex<MasternodeSync>> {
        &self.sync
    }

    pub fn active(&self) -> Option<&Arc<Mutex<ActiveMasternode>>> {
        self.active.as_ref()
    }

    pub fn budget(&self) -> &BudgetCoordinator {
        &self.budget
    }

    /// Whether objects are signed with the hash scheme at the current tip.
    pub fn uses_hash_signatures(&self) -> bool {
        self.chain
            .best_height()
            .map_or(false, |height| self.params.uses_hash_signatures(height))
    }

    fn superblocks_enabled(&self) -> bool {
        let now = self.chain.adjusted_time();
        lock(&self.sporks).is_active(SporkId::EnableSuperblocks, now)
    }

    /// Routes one inbound governance message to its handler.
    pub fn process_message(&self, peer: PeerId, message: &GovernanceMessage) -> Result<()> {
        match message {
            GovernanceMessage::MasternodeBroadcast(mnb) => {
                lock(&self.registry).process_message(peer, message)?;
                let now = self.chain.adjusted_time();
                lock(&self.sync).added_masternode_list(mnb.hash(), now);
                Ok(())
            }
            GovernanceMessage::MasternodePing(ping) => {
                lock(&self.registry).process_message(peer, message)?;
                let now = self.chain.adjusted_time();
                lock(&self.sync).added_masternode_list(ping.hash(), now);
                Ok(())
            }
            GovernanceMessage::MasternodeList(_) => {
                lock(&self.registry).process_message(peer, message)?;
                Ok(())
            }
            GovernanceMessage::Spork(spork) => {
                let hash_scheme = self.uses_hash_signatures();
                lock(&self.sporks).process_spork(peer, spork, hash_scheme, self.peers.as_ref())?;
                Ok(())
            }
            GovernanceMessage::GetSporks => {
                lock(&self.sporks).send_sporks(peer, self.peers.as_ref());
                Ok(())
            }
            GovernanceMessage::SyncStatusCount { item, count } => {
                debug!("ssc - peer {} reports {} {:?} items", peer, count, item);
                Ok(())
            }
            GovernanceMessage::VoteSync(_)
            | GovernanceMessage::Proposal(_)
            | GovernanceMessage::ProposalVote(_)
            | GovernanceMessage::FinalizedBudget(_)
            | GovernanceMessage::FinalizedBudgetVote(_) => self.budget.process_message(peer, message),
        }
    }

    /// The wire message for an inventory item we can serve.
    pub fn get_inventory_item(&self, inv: &Inv) -> Option<GovernanceMessage> {
        match inv.kind {
            InventoryKind::MasternodeAnnounce => lock(&self.registry)
                .seen_broadcast(&inv.hash)
                .map(GovernanceMessage::MasternodeBroadcast),
            InventoryKind::MasternodePing => lock(&self.registry)
                .seen_ping(&inv.hash)
                .map(GovernanceMessage::MasternodePing),
            InventoryKind::Spork => lock(&self.sporks)
                .get_spork(&inv.hash)
                .map(GovernanceMessage::Spork),
            _ => self.budget.inventory_message(inv),
        }
    }

    /// Called after the active tip moved: schedules the masternode paid by the
    /// next block and runs budget maintenance.
    pub fn new_block(&self) {
        let Some(height) = self.chain.best_height() else {
            return;
        };
        let next = height + 1;
        {
            let mut payments = lock(&self.payments);
            if payments.winner(next).is_none() {
                let mut registry = lock(&self.registry);
                let (winner, eligible) = payments.next_in_queue_for_payment(&mut registry, next, true);
                if let Some(mn) = winner {
                    debug!(
                        "new_block - {} scheduled for height {} ({} eligible)",
                        mn.vin.to_short_string(),
                        next,
                        eligible
                    );
                    payments.record_winner(next, mn.vin);
                }
            }
        }
        self.budget.new_block();
    }

    /// Appends the non-miner payout of the next block to `tx`: the winning
    /// finalized budget on a budget payment block when superblocks are on,
    /// otherwise the scheduled masternode.
    pub fn fill_block_payee(&self, tx: &mut Transaction, masternode_amount: u64) -> Option<BlockPayee> {
        let height = self.chain.best_height()? + 1;
        if self.superblocks_enabled() && self.budget.is_budget_payment_block(height) {
            if let Some((payee, amount)) = self.budget.fill_block_payee(tx) {
                return Some(BlockPayee::Budget { payee, amount });
            }
        }

        let payee = {
            let mut payments = lock(&self.payments);
            let mut registry = lock(&self.registry);
            let scheduled = payments.winner(height).and_then(|vin| registry.find(vin));
            let mn = match scheduled {
                Some(mn) => Some(mn),
                None => payments.next_in_queue_for_payment(&mut registry, height, true).0,
            };
            mn.map(|mn| script_for_pubkey(&mn.collateral_pubkey))
        };
        let Some(payee) = payee else {
            warn!("fill_block_payee - no masternode to pay at height {}", height);
            return None;
        };
        tx.outputs.push(TxOutput::new(masternode_amount, payee.clone()));
        info!(
            "Masternode payment of {} to {} at height {}",
            masternode_amount,
            script_to_string(&payee),
            height
        );
        Some(BlockPayee::Masternode {
            payee,
            amount: masternode_amount,
        })
    }

    /// Budget verdict for the payout of a block at `height`. `VoteThreshold`
    /// means no budget applies and the regular masternode rules decide.
    pub fn is_transaction_valid(&self, tx: &Transaction, height: u64) -> TrxValidationStatus {
        if !self.superblocks_enabled() || !self.budget.is_budget_payment_block(height) {
            return TrxValidationStatus::VoteThreshold;
        }
        self.budget.is_transaction_valid(tx, height)
    }

    /// Advances the sync state machine and asks peers for the next asset.
    pub fn process_sync(&self, now: i64) {
        let Some(asset) = lock(&self.sync).process(now) else {
            return;
        };
        let min_protocol = self.params.min_protocol_version;
        let peers: Vec<PeerId> = self
            .peers
            .connected_peers()
            .into_iter()
            .filter(|(_, version)| *version >= min_protocol)
            .map(|(peer, _)| peer)
            .collect();
        match asset {
            SyncAsset::Sporks => {
                for peer in peers {
                    self.peers.push_message(peer, GovernanceMessage::GetSporks);
                }
            }
            SyncAsset::List => {
                let mut registry = lock(&self.registry);
                for peer in peers {
                    registry.dseg_update(peer);
                }
            }
            SyncAsset::Budget => {
                for peer in peers {
                    self.peers.push_message(peer, GovernanceMessage::VoteSync(None));
                }
            }
            SyncAsset::Finished => self.budget.mark_synced(),
            SyncAsset::Initial => {}
        }
    }

    /// One tick of the maintenance worker. Pinging and sweeping run on
    /// sub-cadences of the tick counter.
    pub fn run_maintenance_tick(&self, tick: u64) {
        let now = self.chain.adjusted_time();
        self.process_sync(now);

        if tick % MASTERNODE_PING_SECONDS as u64 == 0 {
            if let Some(active) = &self.active {
                let blockchain_synced = lock(&self.sync).is_blockchain_synced();
                let mut active = lock(active);
                let mut registry = lock(&self.registry);
                active.manage_status(&mut registry, blockchain_synced);
            }
        }

        if tick % MAINTENANCE_SWEEP_TICKS == 0 {
            lock(&self.registry).check_and_remove(false);
            if let Some(height) = self.chain.best_height() {
                lock(&self.payments).clean_payment_list(height);
            }
        }
    }

    pub fn load_caches(&self, data_dir: &Path) -> Result<()> {
        load_masternode_cache(data_dir, &mut lock(&self.registry))?;
        load_budgets(data_dir, &self.budget)?;
        Ok(())
    }

    pub fn flush_caches(&self, data_dir: &Path) -> Result<()> {
        dump_masternode_cache(data_dir, &lock(&self.registry))?;
        dump_budgets(data_dir, &self.budget)?;
        Ok(())
    }
}

/// Handle to the maintenance worker thread.
pub struct MaintenanceHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signals the worker and waits for it to exit.
    pub fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.handle.join().is_err() {
            warn!("governance maintenance worker panicked");
        }
    }
}

/// Starts the worker that calls `run_maintenance_tick` every `tick`.
pub fn spawn_maintenance(context: Arc<GovernanceContext>, tick: Duration) -> io::Result<MaintenanceHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let handle = thread::Builder::new()
        .name("governance-maintenance".to_string())
        .spawn(move || {
            let mut ticks = 0u64;
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(tick);
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                ticks += 1;
                context.run_maintenance_tick(ticks);
            }
            debug!("governance maintenance worker stopped after {} ticks", ticks);
        })?;
    Ok(MaintenanceHandle { stop, handle })
}
