//! Core data model: markets, predictions, user balances and ledger entries.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amm::PoolState;
use crate::error::MarketError;

pub type MarketId = u64;
pub type UserId = u64;
pub type PredictionId = u64;

// =============================================================================
// OUTCOME
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn from_bool(yes: bool) -> Self {
        if yes {
            Outcome::Yes
        } else {
            Outcome::No
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "YES" => Ok(Outcome::Yes),
            "NO" => Ok(Outcome::No),
            other => Err(MarketError::InvalidOutcome(format!(
                "expected YES or NO, got {:?}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// MARKET
// =============================================================================

/// A binary civic question with its constant-product pool.
///
/// Pools are mutated only by placements; once `resolved` is set the market is
/// frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub title: String,
    pub domain: Option<String>,
    pub yes_pool: f64,
    pub no_pool: f64,
    /// Aggregate liquidity (yes_pool + no_pool), kept in sync on every trade.
    pub liquidity_pool: f64,
    pub resolved: bool,
    pub resolved_outcome: Option<Outcome>,
    pub prediction_deadline: DateTime<Utc>,
    pub resolution_deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Market {
    pub fn new(
        id: MarketId,
        title: impl Into<String>,
        yes_pool: f64,
        no_pool: f64,
        prediction_deadline: DateTime<Utc>,
        resolution_deadline: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            domain: None,
            yes_pool,
            no_pool,
            liquidity_pool: yes_pool + no_pool,
            resolved: false,
            resolved_outcome: None,
            prediction_deadline,
            resolution_deadline,
            created_at,
            resolved_at: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn pool(&self) -> PoolState {
        PoolState::new(self.yes_pool, self.no_pool)
    }

    pub fn apply_pool(&mut self, pool: PoolState) {
        self.yes_pool = pool.yes_liquidity;
        self.no_pool = pool.no_liquidity;
        self.liquidity_pool = pool.total();
    }

    pub fn accepts_predictions(&self, now: DateTime<Utc>) -> bool {
        !self.resolved && now <= self.prediction_deadline
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketEventKind {
    Created,
    PredictionPlaced,
    Resolved,
}

/// Market-level audit record, distinct from the per-user ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEvent {
    pub market_id: MarketId,
    pub kind: MarketEventKind,
    pub user_id: Option<UserId>,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// PREDICTION
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: PredictionId,
    pub user_id: UserId,
    pub market_id: MarketId,
    /// Gross stake, fee included.
    pub stake: f64,
    pub outcome: Outcome,
    pub platform_fee: f64,
    pub shares_purchased: f64,
    pub price_paid: f64,
    pub slippage: f64,
    pub used_liquidity_buffer: bool,
    pub placed_at: DateTime<Utc>,
    /// Settlement guard; set exactly once, whether the prediction won or lost.
    pub xp_awarded: bool,
    pub was_correct: Option<bool>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub awarded_points: f64,
    pub awarded_xp: u64,
}

impl Prediction {
    pub fn net_stake(&self) -> f64 {
        self.stake - self.platform_fee
    }

    pub fn is_open(&self) -> bool {
        !self.xp_awarded
    }
}

// =============================================================================
// USER ACCOUNT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub username: String,
    /// Spendable points.
    pub points: f64,
    /// Time-locked liquidity buffer balance.
    pub liquidity_buffer_deposit: f64,
    pub xp: u64,
    /// Bounded to [0, 100].
    pub reliability_index: f64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_check_in_date: Option<NaiveDate>,
    /// Lockout anchor for buffer withdrawals.
    pub last_liquidity_deposit_at: Option<DateTime<Utc>>,
    /// Buffer yield has been credited up to this instant.
    pub yield_accrued_through: Option<DateTime<Utc>>,
    pub predictions_count: u64,
    pub successful_predictions: u64,
    /// XP thresholds already unlocked, ascending.
    pub badges: Vec<u64>,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(
        id: UserId,
        username: impl Into<String>,
        points: f64,
        initial_reliability: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            username: username.into(),
            points,
            liquidity_buffer_deposit: 0.0,
            xp: 0,
            reliability_index: initial_reliability.clamp(0.0, 100.0),
            current_streak: 0,
            longest_streak: 0,
            last_check_in_date: None,
            last_liquidity_deposit_at: None,
            yield_accrued_through: None,
            predictions_count: 0,
            successful_predictions: 0,
            badges: Vec::new(),
            created_at,
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.predictions_count == 0 {
            0.0
        } else {
            self.successful_predictions as f64 / self.predictions_count as f64
        }
    }
}

// =============================================================================
// LEDGER ENTRY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Trade,
    Resolution,
    Xp,
    LiquidityDeposit,
    LiquidityWithdraw,
    LiquidityStake,
    LiquidityYield,
    LiquidityFeeShare,
    AdminManual,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Trade => "trade",
            TransactionType::Resolution => "resolution",
            TransactionType::Xp => "xp",
            TransactionType::LiquidityDeposit => "liquidity_deposit",
            TransactionType::LiquidityWithdraw => "liquidity_withdraw",
            TransactionType::LiquidityStake => "liquidity_stake",
            TransactionType::LiquidityYield => "liquidity_yield",
            TransactionType::LiquidityFeeShare => "liquidity_fee_share",
            TransactionType::AdminManual => "admin_manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "trade" => Some(TransactionType::Trade),
            "resolution" => Some(TransactionType::Resolution),
            "xp" => Some(TransactionType::Xp),
            "liquidity_deposit" => Some(TransactionType::LiquidityDeposit),
            "liquidity_withdraw" => Some(TransactionType::LiquidityWithdraw),
            "liquidity_stake" => Some(TransactionType::LiquidityStake),
            "liquidity_yield" => Some(TransactionType::LiquidityYield),
            "liquidity_fee_share" => Some(TransactionType::LiquidityFeeShare),
            "admin_manual" => Some(TransactionType::AdminManual),
            _ => None,
        }
    }
}

/// One append-only audit record. `amount` is signed: credits positive,
/// debits negative. XP entries carry the XP amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub market_id: Option<MarketId>,
    pub amount: f64,
    pub transaction_type: TransactionType,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        user_id: UserId,
        amount: f64,
        transaction_type: TransactionType,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            market_id: None,
            amount,
            transaction_type,
            description: description.into(),
            timestamp,
        }
    }

    pub fn for_market(mut self, market_id: MarketId) -> Self {
        self.market_id = Some(market_id);
        self
    }
}
