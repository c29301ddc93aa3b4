//! Shared handles injected into every service.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::{MarketConfig, SharedConfig};
use crate::error::MarketResult;
use crate::ledger::{InMemoryLedger, LedgerStore, PlatformWallet};
use crate::models::LedgerEntry;
use crate::store::{MarketStore, UserStore};

#[derive(Clone)]
pub struct CoreContext {
    pub markets: Arc<MarketStore>,
    pub users: Arc<UserStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub wallet: Arc<PlatformWallet>,
    pub config: SharedConfig,
    pub clock: Arc<dyn Clock>,
}

impl CoreContext {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        config: MarketConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            markets: Arc::new(MarketStore::new()),
            users: Arc::new(UserStore::new()),
            ledger,
            wallet: Arc::new(PlatformWallet::new()),
            config: config.shared(),
            clock,
        }
    }

    /// Fresh stores, in-memory ledger, wall clock.
    pub fn in_memory(config: MarketConfig) -> Self {
        Self::new(Arc::new(InMemoryLedger::new()), config, Arc::new(SystemClock))
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> MarketConfig {
        self.config.read().clone()
    }

    /// Append a batch, mapping backend failures to `MarketError::Storage`.
    pub async fn write_ledger(&self, entries: &[LedgerEntry]) -> MarketResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.ledger.append(entries).await?;
        Ok(())
    }
}
