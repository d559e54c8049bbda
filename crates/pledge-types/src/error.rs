use crate::account::AccountAddress;
use crate::amount::PledgeAmount;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("Pool already completed")]
    AlreadyCompleted,

    #[error("Deadline has not passed: {remaining}s remaining")]
    DeadlineNotPassed { remaining: u64 },

    #[error("Deadline has passed")]
    DeadlinePassed,

    #[error("Threshold met: held {held}, threshold {threshold}")]
    ThresholdMet {
        held: PledgeAmount,
        threshold: PledgeAmount,
    },

    #[error("Withdrawals are not open")]
    WithdrawalNotOpen,

    #[error("No recorded balance for {0}")]
    ZeroBalance(AccountAddress),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Balance overflow for {0}")]
    AmountOverflow(AccountAddress),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EscrowError>;
