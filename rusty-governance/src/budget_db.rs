//! Budget persistence (`budget.dat`).

use log::{info, warn};
use std::path::Path;

use rusty_shared_types::{FlatFileError, FlatFileStore};

use crate::budget_manager::{BudgetCoordinator, BudgetSnapshot};

pub const BUDGET_CACHE_FILE: &str = "budget.dat";
pub const BUDGET_CACHE_MAGIC: &str = "MasternodeBudget";

fn store(data_dir: &Path, coordinator: &BudgetCoordinator) -> FlatFileStore {
    FlatFileStore::new(
        data_dir.join(BUDGET_CACHE_FILE),
        BUDGET_CACHE_MAGIC,
        coordinator.params().message_start,
    )
}

pub fn dump_budgets(data_dir: &Path, coordinator: &BudgetCoordinator) -> Result<(), FlatFileError> {
    store(data_dir, coordinator).write(&coordinator.snapshot())?;
    info!("Written info to {}: {}", BUDGET_CACHE_FILE, coordinator);
    Ok(())
}

/// Restores proposals, finalized budgets and seen votes, then revalidates
/// them against the current chain. On failure the coordinator is left empty.
pub fn load_budgets(data_dir: &Path, coordinator: &BudgetCoordinator) -> Result<(), FlatFileError> {
    let snapshot: BudgetSnapshot = match store(data_dir, coordinator).read() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Failed to load {}: {}, starting with an empty budget", BUDGET_CACHE_FILE, e);
            coordinator.clear();
            return Err(e);
        }
    };
    coordinator.restore(snapshot);
    coordinator.check_and_remove();
    info!("Loaded info from {}: {}", BUDGET_CACHE_FILE, coordinator);
    Ok(())
}
