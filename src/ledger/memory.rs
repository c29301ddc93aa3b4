use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use super::LedgerStore;
use crate::models::{LedgerEntry, MarketId, UserId};

/// Process-local ledger.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: RwLock<Vec<LedgerEntry>>,
    /// When set, every append fails without writing anything.
    fail_appends: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a backend outage.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn append(&self, entries: &[LedgerEntry]) -> anyhow::Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            anyhow::bail!("ledger unavailable");
        }
        self.entries.write().extend_from_slice(entries);
        Ok(())
    }

    async fn entries_for_user(&self, user_id: UserId) -> anyhow::Result<Vec<LedgerEntry>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn entries_for_market(&self, market_id: MarketId) -> anyhow::Result<Vec<LedgerEntry>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.market_id == Some(market_id))
            .cloned()
            .collect())
    }

    async fn all(&self) -> anyhow::Result<Vec<LedgerEntry>> {
        Ok(self.entries.read().clone())
    }

    async fn len(&self) -> anyhow::Result<usize> {
        Ok(self.entries.read().len())
    }
}
