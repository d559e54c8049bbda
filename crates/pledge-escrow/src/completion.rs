use anyhow::{bail, Result};
use async_trait::async_trait;
use pledge_types::PledgeAmount;
use tokio::sync::RwLock;
use tracing::info;

/// External completion collaborator. The escrow only ever asks whether the
/// goal is already fulfilled and, on success, hands over the pooled value.
#[async_trait]
pub trait CompletionTarget: Send + Sync {
    async fn is_completed(&self) -> Result<bool>;

    /// One-shot value transfer; marks the target as completed.
    async fn accept_completion(&self, amount: PledgeAmount) -> Result<()>;
}

/// In-memory stand-in for tests and simulations.
pub struct MemoryCompletion {
    completed: RwLock<bool>,
    received: RwLock<PledgeAmount>,
}

impl Default for MemoryCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCompletion {
    pub fn new() -> Self {
        Self {
            completed: RwLock::new(false),
            received: RwLock::new(PledgeAmount::ZERO),
        }
    }

    /// Simulate the goal being satisfied independently of the escrow.
    pub async fn set_completed(&self) {
        let mut completed = self.completed.write().await;
        *completed = true;
    }

    pub async fn received(&self) -> PledgeAmount {
        *self.received.read().await
    }
}

#[async_trait]
impl CompletionTarget for MemoryCompletion {
    async fn is_completed(&self) -> Result<bool> {
        Ok(*self.completed.read().await)
    }

    async fn accept_completion(&self, amount: PledgeAmount) -> Result<()> {
        let mut completed = self.completed.write().await;
        if *completed {
            bail!("Completion target already fulfilled");
        }
        *completed = true;

        let mut received = self.received.write().await;
        *received = received.saturating_add(amount);

        info!(amount = amount.to_value(), "🎯 Completion accepted");
        Ok(())
    }
}
