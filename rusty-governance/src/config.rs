//! Budget subsystem configuration.

use std::fmt;
use std::str::FromStr;

/// How this node takes part in finalizing budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BudgetMode {
    /// Vote for finalized budgets that exactly match our own projection
    #[default]
    Auto,
    /// Build, pay for and broadcast a finalized budget each cycle
    Suggest,
    /// Neither vote nor suggest
    Off,
}

impl fmt::Display for BudgetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetMode::Auto => write!(f, "auto"),
            BudgetMode::Suggest => write!(f, "suggest"),
            BudgetMode::Off => write!(f, "off"),
        }
    }
}

impl FromStr for BudgetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(BudgetMode::Auto),
            "suggest" => Ok(BudgetMode::Suggest),
            "off" => Ok(BudgetMode::Off),
            other => Err(format!("unknown budget mode '{}'", other)),
        }
    }
}

/// Configuration for the budget coordinator
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub mode: BudgetMode,
    /// Maintenance runs on heights divisible by this
    pub maintenance_interval_blocks: u64,
    /// One maintenance run in this many forgets seen objects and resyncs votes
    pub sync_reset_odds: u32,
    /// On mainnet a masternode checks a finalized budget on one run in this many
    pub auto_vote_odds: u32,
    /// How long a request for a missing proposal or budget is remembered (in seconds)
    pub source_request_ttl_secs: i64,
    /// Seed for the throttling RNG; `None` seeds from the OS
    pub rng_seed: Option<u64>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            mode: BudgetMode::Auto,
            maintenance_interval_blocks: 14,
            sync_reset_odds: 1440,
            auto_vote_odds: 4,
            source_request_ttl_secs: 24 * 60 * 60, // 24 hours
            rng_seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("suggest".parse::<BudgetMode>(), Ok(BudgetMode::Suggest));
        assert_eq!(BudgetMode::Off.to_string(), "off");
        assert!("manual".parse::<BudgetMode>().is_err());
    }
}
