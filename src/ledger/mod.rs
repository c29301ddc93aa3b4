//! Ledger
//!
//! Append-only audit trail of every balance-affecting event.
//!
//! # Invariants
//! - Entries are never updated or removed once appended
//! - A batch passed to [`LedgerStore::append`] lands completely or not at all
//! - Entries are returned in append order

pub mod memory;
pub mod platform;
pub mod sqlite;

pub use memory::InMemoryLedger;
pub use platform::{FeeSplit, PlatformWallet};
pub use sqlite::SqliteLedger;

use async_trait::async_trait;

use crate::models::{LedgerEntry, MarketId, TransactionType, UserId};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a batch atomically.
    async fn append(&self, entries: &[LedgerEntry]) -> anyhow::Result<()>;

    async fn entries_for_user(&self, user_id: UserId) -> anyhow::Result<Vec<LedgerEntry>>;

    async fn entries_for_market(&self, market_id: MarketId) -> anyhow::Result<Vec<LedgerEntry>>;

    async fn all(&self) -> anyhow::Result<Vec<LedgerEntry>>;

    async fn len(&self) -> anyhow::Result<usize> {
        Ok(self.all().await?.len())
    }

    /// Signed sum of a user's entries of the given type.
    async fn net_amount(
        &self,
        user_id: UserId,
        transaction_type: TransactionType,
    ) -> anyhow::Result<f64> {
        Ok(self
            .entries_for_user(user_id)
            .await?
            .iter()
            .filter(|e| e.transaction_type == transaction_type)
            .map(|e| e.amount)
            .sum())
    }
}
