//! Market Errors
//!
//! Every core operation returns a typed [`MarketError`]. Callers branch on
//! [`MarketError::kind`] to decide how to render the failure; infrastructure
//! failures (SQLite, config I/O) arrive wrapped in [`MarketError::Storage`].

use crate::models::{MarketId, PredictionId, UserId};

/// Coarse classification of a [`MarketError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad amount or outcome, rejected before any mutation.
    Validation,
    /// Operation conflicts with current state (resolved, duplicate, locked).
    StateConflict,
    /// Not enough balance or pool capacity.
    ResourceExhaustion,
    /// Zero/negative liquidity or other corrupted upstream data.
    InvariantViolation,
    /// Referenced market, user or prediction does not exist.
    NotFound,
    /// Ledger or config backend failed.
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::ResourceExhaustion => "resource_exhaustion",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Storage => "storage",
        }
    }
}

#[derive(Debug)]
pub enum MarketError {
    // Validation
    InvalidStakeAmount {
        stake: f64,
        min: f64,
        max: f64,
    },
    InvalidAmount {
        amount: f64,
    },
    InvalidOutcome(String),
    EmptyReason,

    // State conflicts
    MarketClosed {
        market_id: MarketId,
        reason: &'static str,
    },
    DuplicatePosition {
        user_id: UserId,
        market_id: MarketId,
    },
    AlreadyResolved {
        market_id: MarketId,
    },
    MarketNotResolved {
        market_id: MarketId,
    },
    NoDeposit {
        user_id: UserId,
    },
    LockoutActive {
        user_id: UserId,
        days_elapsed: i64,
        lockout_days: i64,
    },

    // Resource exhaustion
    InsufficientBalance {
        user_id: UserId,
        required: f64,
        available: f64,
    },
    InsufficientBuffer {
        user_id: UserId,
        required: f64,
        available: f64,
    },
    PoolCapExceeded {
        market_id: MarketId,
        pool_total: f64,
        cap: f64,
    },

    // Invariant violations
    DivisionByZero(&'static str),
    InvalidLiquidity {
        yes_liquidity: f64,
        no_liquidity: f64,
    },
    MalformedPrediction {
        prediction_id: PredictionId,
        reason: String,
    },

    // Lookups
    MarketNotFound(MarketId),
    UserNotFound(UserId),
    DuplicateMarket(MarketId),
    DuplicateUser(UserId),

    Storage(anyhow::Error),
}

impl MarketError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidStakeAmount { .. }
            | Self::InvalidAmount { .. }
            | Self::InvalidOutcome(_)
            | Self::EmptyReason => ErrorKind::Validation,
            Self::MarketClosed { .. }
            | Self::DuplicatePosition { .. }
            | Self::AlreadyResolved { .. }
            | Self::MarketNotResolved { .. }
            | Self::NoDeposit { .. }
            | Self::LockoutActive { .. }
            | Self::DuplicateMarket(_)
            | Self::DuplicateUser(_) => ErrorKind::StateConflict,
            Self::InsufficientBalance { .. }
            | Self::InsufficientBuffer { .. }
            | Self::PoolCapExceeded { .. } => ErrorKind::ResourceExhaustion,
            Self::DivisionByZero(_)
            | Self::InvalidLiquidity { .. }
            | Self::MalformedPrediction { .. } => ErrorKind::InvariantViolation,
            Self::MarketNotFound(_) | Self::UserNotFound(_) => ErrorKind::NotFound,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Caller can fix the request and retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::StateConflict | ErrorKind::ResourceExhaustion
        )
    }
}

impl std::fmt::Display for MarketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidStakeAmount { stake, min, max } => {
                write!(f, "Stake {} outside allowed range [{}, {}]", stake, min, max)
            }
            Self::InvalidAmount { amount } => write!(f, "Amount must be positive, got {}", amount),
            Self::InvalidOutcome(msg) => write!(f, "Invalid outcome: {}", msg),
            Self::EmptyReason => write!(f, "Reason cannot be empty"),
            Self::MarketClosed { market_id, reason } => {
                write!(f, "Market {} is closed: {}", market_id, reason)
            }
            Self::DuplicatePosition { user_id, market_id } => write!(
                f,
                "User {} already holds an open prediction on market {}",
                user_id, market_id
            ),
            Self::AlreadyResolved { market_id } => {
                write!(f, "Market {} is already resolved", market_id)
            }
            Self::MarketNotResolved { market_id } => {
                write!(f, "Market {} is not resolved", market_id)
            }
            Self::NoDeposit { user_id } => {
                write!(f, "User {} has no liquidity buffer deposit", user_id)
            }
            Self::LockoutActive {
                user_id,
                days_elapsed,
                lockout_days,
            } => write!(
                f,
                "Liquidity buffer locked for user {}: {} of {} days elapsed",
                user_id, days_elapsed, lockout_days
            ),
            Self::InsufficientBalance {
                user_id,
                required,
                available,
            } => write!(
                f,
                "Insufficient points for user {}: required {:.4}, available {:.4}",
                user_id, required, available
            ),
            Self::InsufficientBuffer {
                user_id,
                required,
                available,
            } => write!(
                f,
                "Insufficient liquidity buffer for user {}: required {:.4}, available {:.4}",
                user_id, required, available
            ),
            Self::PoolCapExceeded {
                market_id,
                pool_total,
                cap,
            } => write!(
                f,
                "Market {} pool would reach {:.4}, exceeding cap {:.4}",
                market_id, pool_total, cap
            ),
            Self::DivisionByZero(context) => write!(f, "Division by zero: {}", context),
            Self::InvalidLiquidity {
                yes_liquidity,
                no_liquidity,
            } => write!(
                f,
                "Invalid pool liquidity: yes={} no={}",
                yes_liquidity, no_liquidity
            ),
            Self::MalformedPrediction {
                prediction_id,
                reason,
            } => write!(f, "Malformed prediction {}: {}", prediction_id, reason),
            Self::MarketNotFound(id) => write!(f, "Market {} not found", id),
            Self::UserNotFound(id) => write!(f, "User {} not found", id),
            Self::DuplicateMarket(id) => write!(f, "Market {} already exists", id),
            Self::DuplicateUser(id) => write!(f, "User {} already exists", id),
            Self::Storage(e) => write!(f, "Storage error: {:#}", e),
        }
    }
}

impl std::error::Error for MarketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for MarketError {
    fn from(e: anyhow::Error) -> Self {
        Self::Storage(e)
    }
}

pub type MarketResult<T> = Result<T, MarketError>;
