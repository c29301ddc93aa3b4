//! Civic Market Core
//!
//! Binary-outcome prediction market engine: constant-product pricing,
//! placement and settlement of predictions, the time-locked liquidity buffer,
//! the audit ledger and per-user reliability/XP.
//!
//! Hosts build a [`CoreContext`] (stores, ledger, config, clock) and drive it
//! through [`PredictionEngine`].

pub mod amm;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod reliability;
pub mod store;

pub use buffer::LiquidityBuffer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MarketConfig;
pub use context::CoreContext;
pub use engine::{PredictionEngine, ResolutionReport};
pub use error::{ErrorKind, MarketError, MarketResult};
pub use ledger::{InMemoryLedger, LedgerStore, PlatformWallet, SqliteLedger};
pub use models::{LedgerEntry, Market, Outcome, Prediction, TransactionType, UserAccount};
pub use reliability::{LeaderboardMetric, ReliabilityService};
pub use store::{MarketStore, UserStore};
