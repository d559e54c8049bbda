use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use pledge_escrow::{
    CompletionTarget, EscrowConfig, Ledger, LedgerStore, MemoryCompletion, MemoryLedger,
    PledgeEscrow,
};
use pledge_types::{AccountAddress, EscrowError, PledgeAmount};
use std::sync::Arc;
use tokio::sync::RwLock;

fn setup() -> (Arc<MemoryCompletion>, Arc<Ledger>) {
    let completion = Arc::new(MemoryCompletion::new());
    let ledger = Arc::new(Ledger::new(Arc::new(MemoryLedger::new())));
    (completion, ledger)
}

/// Collaborator that refuses the hand-off.
struct RejectingCompletion;

#[async_trait]
impl CompletionTarget for RejectingCompletion {
    async fn is_completed(&self) -> Result<bool> {
        Ok(false)
    }

    async fn accept_completion(&self, _amount: PledgeAmount) -> Result<()> {
        bail!("hand-off refused")
    }
}

/// Store that can be told to refuse writes to one account.
struct FaultyStore {
    inner: MemoryLedger,
    reject: RwLock<Option<AccountAddress>>,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: MemoryLedger::new(),
            reject: RwLock::new(None),
        }
    }

    async fn reject_writes_to(&self, address: AccountAddress) {
        let mut reject = self.reject.write().await;
        *reject = Some(address);
    }

    async fn allow_all(&self) {
        let mut reject = self.reject.write().await;
        *reject = None;
    }
}

#[async_trait]
impl LedgerStore for FaultyStore {
    async fn get_balance(&self, address: AccountAddress) -> Result<PledgeAmount> {
        self.inner.get_balance(address).await
    }

    async fn set_balance(&self, address: AccountAddress, balance: PledgeAmount) -> Result<()> {
        if *self.reject.read().await == Some(address) {
            bail!("account {} refuses transfers", address);
        }
        self.inner.set_balance(address, balance).await
    }

    async fn snapshot(&self) -> Result<()> {
        self.inner.snapshot().await
    }

    async fn commit(&self) -> Result<()> {
        self.inner.commit().await
    }

    async fn restore(&self) -> Result<()> {
        self.inner.restore().await
    }
}

#[tokio::test]
async fn test_recorded_balances_match_held_value() {
    let (completion, ledger) = setup();
    let escrow = PledgeEscrow::new(completion, ledger.clone());

    println!("\n=== Conservation across interleaved stakes ===");
    let contributors: Vec<AccountAddress> =
        (1..=8).map(|i| AccountAddress::from_bytes([i; 32])).collect();
    for c in &contributors {
        ledger.credit(*c, PledgeAmount::from_value(10.0)).await.unwrap();
    }

    let mut deposited = PledgeAmount::ZERO;
    for i in 0..40 {
        let contributor = contributors[i % contributors.len()];
        let amount = PledgeAmount::from_base_units(((i % 5) as u64 + 1) * 10_000_000);
        escrow.stake(contributor, amount).await.unwrap();
        deposited = deposited.saturating_add(amount);

        // Sum of recorded balances == total deposited == pool balance.
        assert_eq!(escrow.total_staked().await, deposited);
        assert_eq!(escrow.held().await.unwrap(), deposited);
    }
    println!("✓ Sum of balances equals held value through {} stakes", 40);
}

#[tokio::test]
async fn test_time_left_non_increasing_and_floored() {
    let (completion, ledger) = setup();
    let escrow = PledgeEscrow::new(completion.clone(), ledger.clone());

    let first = escrow.time_left();
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let second = escrow.time_left();
    assert!(second <= first);

    let expired = PledgeEscrow::new(completion, ledger)
        .with_deadline(Utc::now() - Duration::hours(3));
    assert_eq!(expired.time_left(), 0);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(expired.time_left(), 0);
}

#[tokio::test]
async fn test_zero_balance_withdraw_always_fails() {
    let (completion, ledger) = setup();

    let alice = AccountAddress::from_bytes([1; 32]);
    let mallory = AccountAddress::from_bytes([9; 32]);
    ledger.credit(alice, PledgeAmount::from_value(1.0)).await.unwrap();

    let config = EscrowConfig {
        threshold: 1.0,
        staking_window_secs: 1,
    };
    let escrow = PledgeEscrow::with_config(completion, ledger.clone(), config);
    escrow.stake(alice, PledgeAmount::from_value(0.4)).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    escrow.execute().await.unwrap();
    assert!(escrow.is_open_for_withdraw().await);

    // Never staked: nothing to withdraw.
    let err = escrow.withdraw(mallory).await.unwrap_err();
    assert!(matches!(err, EscrowError::ZeroBalance(_)));
}

#[tokio::test]
async fn test_double_withdraw_fails_second_time() {
    let (completion, ledger) = setup();

    let alice = AccountAddress::from_bytes([1; 32]);
    let bob = AccountAddress::from_bytes([2; 32]);
    ledger.credit(alice, PledgeAmount::from_value(1.0)).await.unwrap();
    ledger.credit(bob, PledgeAmount::from_value(1.0)).await.unwrap();

    let config = EscrowConfig {
        threshold: 1.0,
        staking_window_secs: 1,
    };
    let escrow = PledgeEscrow::with_config(completion, ledger.clone(), config);

    escrow.stake(alice, PledgeAmount::from_value(0.4)).await.unwrap();
    escrow.stake(bob, PledgeAmount::from_value(0.3)).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    escrow.execute().await.unwrap();

    assert_eq!(
        escrow.withdraw(alice).await.unwrap(),
        PledgeAmount::from_value(0.4)
    );

    // Second attempt: the entry is already zero.
    let err = escrow.withdraw(alice).await.unwrap_err();
    assert!(matches!(err, EscrowError::ZeroBalance(_)));

    // Bob's stake is untouched by Alice's withdrawal.
    assert_eq!(
        escrow.withdraw(bob).await.unwrap(),
        PledgeAmount::from_value(0.3)
    );
    assert_eq!(escrow.held().await.unwrap(), PledgeAmount::ZERO);
}

#[tokio::test]
async fn test_withdraw_needs_open_flag_and_failed_threshold() {
    // Deadline passed but no outcome decided yet: withdrawal stays closed.
    let (completion, ledger) = setup();
    let alice = AccountAddress::from_bytes([1; 32]);
    ledger.credit(alice, PledgeAmount::from_value(1.0)).await.unwrap();

    let config = EscrowConfig {
        threshold: 1.0,
        staking_window_secs: 1,
    };
    let escrow = PledgeEscrow::with_config(completion, ledger.clone(), config.clone());
    escrow.stake(alice, PledgeAmount::from_value(0.4)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let err = escrow.withdraw(alice).await.unwrap_err();
    assert!(matches!(err, EscrowError::WithdrawalNotOpen));

    // Pool over the threshold: withdrawal is never the outcome.
    let (completion, ledger) = setup();
    ledger.credit(alice, PledgeAmount::from_value(2.0)).await.unwrap();

    let escrow = PledgeEscrow::with_config(completion, ledger.clone(), config);
    escrow.stake(alice, PledgeAmount::from_value(1.5)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let err = escrow.withdraw(alice).await.unwrap_err();
    assert!(matches!(err, EscrowError::ThresholdMet { .. }));
}

#[tokio::test]
async fn test_rejected_completion_leaves_state_intact() {
    let ledger = Arc::new(Ledger::new(Arc::new(MemoryLedger::new())));
    let escrow = PledgeEscrow::new(Arc::new(RejectingCompletion), ledger.clone());

    let alice = AccountAddress::from_bytes([1; 32]);
    ledger.credit(alice, PledgeAmount::from_value(2.0)).await.unwrap();
    escrow.stake(alice, PledgeAmount::from_value(1.5)).await.unwrap();

    let err = escrow.execute().await.unwrap_err();
    assert!(matches!(err, EscrowError::TransferFailed(_)));

    // The drain was rolled back; nothing was decided.
    assert_eq!(escrow.held().await.unwrap(), PledgeAmount::from_value(1.5));
    assert!(!escrow.is_open_for_withdraw().await);
    assert_eq!(
        escrow.balance_of(alice).await,
        PledgeAmount::from_value(1.5)
    );
}

#[tokio::test]
async fn test_rejected_payout_restores_recorded_balance() {
    let store = Arc::new(FaultyStore::new());
    let ledger = Arc::new(Ledger::new(store.clone()));
    let completion = Arc::new(MemoryCompletion::new());

    let alice = AccountAddress::from_bytes([1; 32]);
    ledger.credit(alice, PledgeAmount::from_value(1.0)).await.unwrap();

    let config = EscrowConfig {
        threshold: 1.0,
        staking_window_secs: 1,
    };
    let escrow = PledgeEscrow::with_config(completion, ledger.clone(), config);
    escrow.stake(alice, PledgeAmount::from_value(0.4)).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    escrow.execute().await.unwrap();
    assert!(escrow.is_open_for_withdraw().await);

    store.reject_writes_to(alice).await;
    let err = escrow.withdraw(alice).await.unwrap_err();
    assert!(matches!(err, EscrowError::TransferFailed(_)));

    // All-or-nothing: the zeroed entry came back and the pool still holds it.
    assert_eq!(
        escrow.balance_of(alice).await,
        PledgeAmount::from_value(0.4)
    );
    assert_eq!(escrow.held().await.unwrap(), PledgeAmount::from_value(0.4));

    // Once the account accepts transfers again the payout goes through.
    store.allow_all().await;
    assert_eq!(
        escrow.withdraw(alice).await.unwrap(),
        PledgeAmount::from_value(0.4)
    );
    assert_eq!(
        ledger.get_balance(alice).await.unwrap(),
        PledgeAmount::from_value(1.0)
    );
}
