//! In-process stores for markets and user accounts.
//!
//! Each market and each user sits behind its own async mutex. The maps holding
//! the handles are guarded by short-lived `parking_lot` locks that are never
//! held across an `.await`.
//!
//! Lock order: market before user. Never acquire a market lock while holding
//! a user lock.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::{MarketError, MarketResult};
use crate::models::{
    Market, MarketEvent, MarketEventKind, MarketId, Prediction, UserAccount, UserId,
};

// =============================================================================
// MARKETS
// =============================================================================

/// A market together with everything its lock protects.
#[derive(Debug, Clone)]
pub struct MarketBook {
    pub market: Market,
    pub predictions: Vec<Prediction>,
    pub events: Vec<MarketEvent>,
}

impl MarketBook {
    pub fn new(market: Market) -> Self {
        Self {
            market,
            predictions: Vec::new(),
            events: Vec::new(),
        }
    }

    /// The user's unresolved prediction on this market, if any.
    pub fn open_position(&self, user_id: UserId) -> Option<&Prediction> {
        self.predictions
            .iter()
            .find(|p| p.user_id == user_id && p.is_open())
    }

    pub fn record_event(
        &mut self,
        kind: MarketEventKind,
        user_id: Option<UserId>,
        detail: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) {
        self.events.push(MarketEvent {
            market_id: self.market.id,
            kind,
            user_id,
            detail: detail.into(),
            timestamp,
        });
    }
}

pub type MarketHandle = Arc<Mutex<MarketBook>>;

#[derive(Debug, Default)]
pub struct MarketStore {
    markets: RwLock<HashMap<MarketId, MarketHandle>>,
    open: RwLock<HashSet<MarketId>>,
}

impl MarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a market handed over by the creation workflow.
    ///
    /// Pools must be finite and strictly positive.
    pub fn insert(&self, market: Market) -> MarketResult<()> {
        if let Err(e) = market.pool().validate() {
            error!(
                market_id = market.id,
                yes_pool = market.yes_pool,
                no_pool = market.no_pool,
                "rejecting market with invalid liquidity"
            );
            return Err(e);
        }

        let id = market.id;
        let resolved = market.resolved;
        let created_at = market.created_at;
        let mut book = MarketBook::new(market);
        book.record_event(MarketEventKind::Created, None, "market created", created_at);

        {
            let mut markets = self.markets.write();
            if markets.contains_key(&id) {
                return Err(MarketError::DuplicateMarket(id));
            }
            markets.insert(id, Arc::new(Mutex::new(book)));
        }
        if !resolved {
            self.open.write().insert(id);
        }
        info!(market_id = id, "market registered");
        Ok(())
    }

    pub fn get(&self, market_id: MarketId) -> MarketResult<MarketHandle> {
        self.markets
            .read()
            .get(&market_id)
            .cloned()
            .ok_or(MarketError::MarketNotFound(market_id))
    }

    pub fn len(&self) -> usize {
        self.markets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.read().is_empty()
    }

    /// Markets still accepting resolution. Readable without any market lock.
    pub fn open_market_count(&self) -> usize {
        self.open.read().len()
    }

    pub(crate) fn mark_resolved(&self, market_id: MarketId) {
        self.open.write().remove(&market_id);
    }

    /// Copy of the market as currently stored.
    pub async fn snapshot(&self, market_id: MarketId) -> MarketResult<Market> {
        let handle = self.get(market_id)?;
        let book = handle.lock().await;
        Ok(book.market.clone())
    }

    pub async fn predictions(&self, market_id: MarketId) -> MarketResult<Vec<Prediction>> {
        let handle = self.get(market_id)?;
        let book = handle.lock().await;
        Ok(book.predictions.clone())
    }

    pub async fn events(&self, market_id: MarketId) -> MarketResult<Vec<MarketEvent>> {
        let handle = self.get(market_id)?;
        let book = handle.lock().await;
        Ok(book.events.clone())
    }
}

// =============================================================================
// USERS
// =============================================================================

pub type UserHandle = Arc<Mutex<UserAccount>>;

#[derive(Debug, Default)]
pub struct UserStore {
    users: RwLock<HashMap<UserId, UserHandle>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, account: UserAccount) -> MarketResult<()> {
        let id = account.id;
        let mut users = self.users.write();
        if users.contains_key(&id) {
            return Err(MarketError::DuplicateUser(id));
        }
        users.insert(id, Arc::new(Mutex::new(account)));
        Ok(())
    }

    pub fn get(&self, user_id: UserId) -> MarketResult<UserHandle> {
        self.users
            .read()
            .get(&user_id)
            .cloned()
            .ok_or(MarketError::UserNotFound(user_id))
    }

    /// All handles, ordered by user id.
    pub fn handles(&self) -> Vec<(UserId, UserHandle)> {
        let mut all: Vec<_> = self
            .users
            .read()
            .iter()
            .map(|(id, h)| (*id, h.clone()))
            .collect();
        all.sort_unstable_by_key(|(id, _)| *id);
        all
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    pub async fn snapshot(&self, user_id: UserId) -> MarketResult<UserAccount> {
        let handle = self.get(user_id)?;
        let user = handle.lock().await;
        Ok(user.clone())
    }

    /// Point-in-time copies, locking one user at a time.
    pub async fn snapshots(&self) -> Vec<UserAccount> {
        let mut out = Vec::new();
        for (_, handle) in self.handles() {
            out.push(handle.lock().await.clone());
        }
        out
    }
}
