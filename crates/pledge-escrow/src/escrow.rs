use crate::completion::CompletionTarget;
use crate::config::EscrowConfig;
use crate::ledger::Ledger;
use chrono::{DateTime, Duration, Utc};
use pledge_types::{AccountAddress, EscrowError, PledgeAmount, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Notification emitted after every successful stake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeEvent {
    pub contributor: AccountAddress,
    pub amount: PledgeAmount,
    pub total_staked: PledgeAmount,
    pub timestamp: DateTime<Utc>,
}

struct PoolState {
    balances: HashMap<AccountAddress, PledgeAmount>,
    open_for_withdraw: bool,
}

impl PoolState {
    fn total_staked(&self) -> PledgeAmount {
        self.balances
            .values()
            .fold(PledgeAmount::ZERO, |acc, b| acc.saturating_add(*b))
    }
}

/// Deadline- and threshold-gated contribution pool.
///
/// Contributions are staked into a reserved pool account on the ledger until
/// the deadline. `execute` then routes the pooled value: strictly above the
/// threshold it is forwarded to the completion collaborator in one shot,
/// otherwise withdrawals open and each contributor reclaims exactly what they
/// staked.
pub struct PledgeEscrow {
    threshold: PledgeAmount,
    deadline: DateTime<Utc>,
    pool: AccountAddress,
    completion: Arc<dyn CompletionTarget>,
    ledger: Arc<Ledger>,
    state: RwLock<PoolState>,
    event_tx: Option<mpsc::UnboundedSender<StakeEvent>>,
}

impl PledgeEscrow {
    pub fn new(completion: Arc<dyn CompletionTarget>, ledger: Arc<Ledger>) -> Self {
        Self::with_config(completion, ledger, EscrowConfig::default())
    }

    pub fn with_config(
        completion: Arc<dyn CompletionTarget>,
        ledger: Arc<Ledger>,
        config: EscrowConfig,
    ) -> Self {
        Self {
            threshold: config.threshold_amount(),
            deadline: Utc::now() + Duration::seconds(config.staking_window_secs),
            pool: AccountAddress::pool(),
            completion,
            ledger,
            state: RwLock::new(PoolState {
                balances: HashMap::new(),
                open_for_withdraw: false,
            }),
            event_tx: None,
        }
    }

    /// Create an escrow that emits a `StakeEvent` for every successful stake.
    pub fn with_events(
        completion: Arc<dyn CompletionTarget>,
        ledger: Arc<Ledger>,
        config: EscrowConfig,
    ) -> (Self, mpsc::UnboundedReceiver<StakeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut escrow = Self::with_config(completion, ledger, config);
        escrow.event_tx = Some(tx);
        (escrow, rx)
    }

    /// Override the deadline; for simulations and tests.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Record a contribution. The attached value moves from the contributor's
    /// ledger account into the pool in the same atomic unit that records it;
    /// a failed deposit leaves no trace.
    pub async fn stake(&self, contributor: AccountAddress, amount: PledgeAmount) -> Result<()> {
        self.ensure_deadline(false)?;
        self.ensure_not_completed().await?;

        if amount.is_zero() {
            return Ok(());
        }

        let mut state = self.state.write().await;

        let current = state
            .balances
            .get(&contributor)
            .copied()
            .unwrap_or(PledgeAmount::ZERO);
        let updated = current
            .checked_add(amount)
            .ok_or(EscrowError::AmountOverflow(contributor))?;

        self.ledger
            .transfer(contributor, self.pool, amount)
            .await
            .map_err(|e| EscrowError::TransferFailed(e.to_string()))?;

        state.balances.insert(contributor, updated);
        let total = state.total_staked();

        if let Some(ref tx) = self.event_tx {
            let event = StakeEvent {
                contributor,
                amount,
                total_staked: total,
                timestamp: Utc::now(),
            };
            if let Err(e) = tx.send(event) {
                warn!(
                    contributor = %contributor,
                    error = %e,
                    "Failed to emit stake event"
                );
            }
        }

        info!(
            contributor = %contributor,
            amount = amount.to_value(),
            balance_after = updated.to_value(),
            total_staked = total.to_value(),
            "💰 Stake recorded"
        );
        Ok(())
    }

    /// Entry point for raw value that arrives with no operation selected;
    /// treated as a stake from the sender.
    pub async fn deposit(&self, from: AccountAddress, amount: PledgeAmount) -> Result<()> {
        debug!(from = %from, amount = amount.to_value(), "Raw deposit routed to stake");
        self.stake(from, amount).await
    }

    /// Decide the outcome. Strictly above the threshold the entire pool is
    /// forwarded to the collaborator; at or below it, withdrawals open.
    ///
    /// There is deliberately no deadline guard here: calling before the
    /// deadline while the pool is still at or below the threshold permanently
    /// opens withdrawals, even though later stakes might have pushed the pool
    /// over. Callers who want the decision made on the full staking window
    /// must wait for `time_left()` to reach zero.
    pub async fn execute(&self) -> Result<()> {
        self.ensure_not_completed().await?;

        let mut state = self.state.write().await;
        let held = self.ledger.get_balance(self.pool).await?;

        if held > self.threshold {
            // The pool is drained before control passes to the collaborator;
            // a rejected hand-off restores it so no partial completion
            // survives.
            self.ledger.debit(self.pool, held).await?;
            if let Err(e) = self.completion.accept_completion(held).await {
                self.ledger.credit(self.pool, held).await?;
                return Err(EscrowError::TransferFailed(e.to_string()));
            }

            info!(
                forwarded = held.to_value(),
                threshold = self.threshold.to_value(),
                "🎯 Pool forwarded to completion target"
            );
        } else if !state.open_for_withdraw {
            state.open_for_withdraw = true;
            info!(
                held = held.to_value(),
                threshold = self.threshold.to_value(),
                "🔓 Withdrawals opened"
            );
        } else {
            debug!(held = held.to_value(), "Withdrawals already open");
        }

        Ok(())
    }

    /// Reclaim the caller's recorded contribution after a failed pool.
    /// Returns the amount paid out.
    pub async fn withdraw(&self, contributor: AccountAddress) -> Result<PledgeAmount> {
        self.ensure_not_completed().await?;
        self.ensure_deadline(true)?;

        let mut state = self.state.write().await;

        let held = self.ledger.get_balance(self.pool).await?;
        if held > self.threshold {
            return Err(EscrowError::ThresholdMet {
                held,
                threshold: self.threshold,
            });
        }
        if !state.open_for_withdraw {
            return Err(EscrowError::WithdrawalNotOpen);
        }

        let amount = state
            .balances
            .get(&contributor)
            .copied()
            .unwrap_or(PledgeAmount::ZERO);
        if amount.is_zero() {
            return Err(EscrowError::ZeroBalance(contributor));
        }

        // Zero the recorded balance before paying out; a rejected payout
        // restores it so the call stays all-or-nothing.
        state.balances.insert(contributor, PledgeAmount::ZERO);
        if let Err(e) = self.ledger.transfer(self.pool, contributor, amount).await {
            state.balances.insert(contributor, amount);
            return Err(EscrowError::TransferFailed(e.to_string()));
        }

        info!(
            contributor = %contributor,
            amount = amount.to_value(),
            "💸 Stake withdrawn"
        );
        Ok(amount)
    }

    /// Seconds until the deadline, floored at zero.
    pub fn time_left(&self) -> u64 {
        let remaining = (self.deadline - Utc::now()).num_seconds();
        remaining.max(0) as u64
    }

    /// Value currently held by the pool account on the ledger.
    pub async fn held(&self) -> Result<PledgeAmount> {
        Ok(self.ledger.get_balance(self.pool).await?)
    }

    pub async fn balance_of(&self, contributor: AccountAddress) -> PledgeAmount {
        let state = self.state.read().await;
        state
            .balances
            .get(&contributor)
            .copied()
            .unwrap_or(PledgeAmount::ZERO)
    }

    /// Sum of all recorded contributions.
    pub async fn total_staked(&self) -> PledgeAmount {
        let state = self.state.read().await;
        state.total_staked()
    }

    pub async fn contributor_count(&self) -> usize {
        let state = self.state.read().await;
        state.balances.values().filter(|b| !b.is_zero()).count()
    }

    pub async fn is_open_for_withdraw(&self) -> bool {
        let state = self.state.read().await;
        state.open_for_withdraw
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn threshold(&self) -> PledgeAmount {
        self.threshold
    }

    pub fn pool_address(&self) -> AccountAddress {
        self.pool
    }

    /// Handle on the bound completion collaborator.
    pub fn completion_target(&self) -> Arc<dyn CompletionTarget> {
        self.completion.clone()
    }

    /// Precondition: the external goal has not already been fulfilled.
    async fn ensure_not_completed(&self) -> Result<()> {
        let completed = self
            .completion
            .is_completed()
            .await
            .map_err(|e| EscrowError::Collaborator(e.to_string()))?;
        if completed {
            return Err(EscrowError::AlreadyCompleted);
        }
        Ok(())
    }

    /// Precondition on the staking window. `require_passed` selects which
    /// side of the deadline is acceptable.
    fn ensure_deadline(&self, require_passed: bool) -> Result<()> {
        let remaining = self.time_left();
        if require_passed && remaining > 0 {
            return Err(EscrowError::DeadlineNotPassed { remaining });
        }
        if !require_passed && remaining == 0 {
            return Err(EscrowError::DeadlinePassed);
        }
        Ok(())
    }
}
