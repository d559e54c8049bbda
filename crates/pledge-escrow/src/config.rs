use pledge_types::PledgeAmount;
use serde::{Deserialize, Serialize};

pub const DEFAULT_STAKING_WINDOW_SECS: i64 = 72 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Pool value that must be strictly exceeded to complete, in whole units.
    pub threshold: f64,
    /// Staking window length; the deadline is construction time plus this.
    pub staking_window_secs: i64,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            staking_window_secs: DEFAULT_STAKING_WINDOW_SECS,
        }
    }
}

impl EscrowConfig {
    pub fn threshold_amount(&self) -> PledgeAmount {
        PledgeAmount::from_value(self.threshold)
    }
}
