pub mod completion;
pub mod config;
pub mod escrow;
pub mod ledger;

pub use completion::{CompletionTarget, MemoryCompletion};
pub use config::EscrowConfig;
pub use escrow::{PledgeEscrow, StakeEvent};
pub use ledger::{Ledger, LedgerStore, MemoryLedger};
