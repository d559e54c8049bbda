use anyhow::{bail, Result};
use async_trait::async_trait;
use pledge_types::{AccountAddress, PledgeAmount};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

type BalanceMap = HashMap<AccountAddress, PledgeAmount>;

/// Backing store for account balances. Snapshot/restore bracket a group of
/// writes so a failed group can be undone as a unit.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_balance(&self, address: AccountAddress) -> Result<PledgeAmount>;
    async fn set_balance(&self, address: AccountAddress, balance: PledgeAmount) -> Result<()>;

    async fn snapshot(&self) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn restore(&self) -> Result<()>;
}

pub struct MemoryLedger {
    balances: Arc<RwLock<BalanceMap>>,
    backup: Arc<RwLock<Option<BalanceMap>>>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            balances: Arc::new(RwLock::new(HashMap::new())),
            backup: Arc::new(RwLock::new(None)),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn get_balance(&self, address: AccountAddress) -> Result<PledgeAmount> {
        let balances = self.balances.read().await;
        Ok(balances.get(&address).copied().unwrap_or(PledgeAmount::ZERO))
    }

    async fn set_balance(&self, address: AccountAddress, balance: PledgeAmount) -> Result<()> {
        let mut balances = self.balances.write().await;
        if balance.is_zero() {
            balances.remove(&address);
        } else {
            balances.insert(address, balance);
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<()> {
        let balances = self.balances.read().await;
        let mut backup = self.backup.write().await;
        *backup = Some(balances.clone());
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut backup = self.backup.write().await;
        *backup = None;
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        let mut backup = self.backup.write().await;
        if let Some(saved) = backup.take() {
            let mut balances = self.balances.write().await;
            *balances = saved;
        }
        Ok(())
    }
}

/// Checked balance operations over a pluggable store.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn get_balance(&self, address: AccountAddress) -> Result<PledgeAmount> {
        self.store.get_balance(address).await
    }

    pub async fn credit(&self, address: AccountAddress, amount: PledgeAmount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }

        let current = self.store.get_balance(address).await?;
        let new_balance = current
            .checked_add(amount)
            .ok_or_else(|| anyhow::anyhow!("Balance overflow for {}", address))?;

        self.store.set_balance(address, new_balance).await?;

        info!(
            address = %address,
            amount = amount.to_value(),
            balance_before = current.to_value(),
            balance_after = new_balance.to_value(),
            "💰 Balance credited"
        );
        Ok(())
    }

    pub async fn debit(&self, address: AccountAddress, amount: PledgeAmount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }

        let current = self.store.get_balance(address).await?;
        let new_balance = current.checked_sub(amount).ok_or_else(|| {
            anyhow::anyhow!(
                "Insufficient balance for {}: has {}, needs {}",
                address,
                current,
                amount
            )
        })?;

        self.store.set_balance(address, new_balance).await?;

        info!(
            address = %address,
            amount = amount.to_value(),
            balance_before = current.to_value(),
            balance_after = new_balance.to_value(),
            "💸 Balance debited"
        );
        Ok(())
    }

    /// Move `amount` between accounts as one all-or-nothing unit. Returns the
    /// transfer id.
    pub async fn transfer(
        &self,
        from: AccountAddress,
        to: AccountAddress,
        amount: PledgeAmount,
    ) -> Result<String> {
        if from == to {
            bail!("Cannot transfer to same account");
        }

        self.store.snapshot().await?;

        match self.transfer_internal(from, to, amount).await {
            Ok(transfer_id) => {
                self.store.commit().await?;
                info!(
                    from = %from,
                    to = %to,
                    amount = amount.to_value(),
                    transfer_id = %transfer_id,
                    "✅ Transfer committed"
                );
                Ok(transfer_id)
            }
            Err(e) => {
                self.store.restore().await?;
                Err(e)
            }
        }
    }

    async fn transfer_internal(
        &self,
        from: AccountAddress,
        to: AccountAddress,
        amount: PledgeAmount,
    ) -> Result<String> {
        self.debit(from, amount).await?;
        self.credit(to, amount).await?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(from.as_bytes());
        hasher.update(to.as_bytes());
        hasher.update(&amount.to_base_units().to_le_bytes());
        hasher.update(&chrono::Utc::now().timestamp().to_le_bytes());
        Ok(hex::encode(hasher.finalize().as_bytes()))
    }
}
