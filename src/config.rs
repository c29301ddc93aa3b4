//! Market configuration
//!
//! Fee rate, trade-size policy, pool cap, buffer yield and XP knobs.
//! Every field has a serde default so a partial TOML file is valid.

use anyhow::{bail, Context};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Config handle shared by every service; read at call time.
pub type SharedConfig = Arc<RwLock<MarketConfig>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Fraction of the gross stake kept as platform fee.
    #[serde(default = "default_entry_fee_rate")]
    pub entry_fee_rate: f64,

    #[serde(default = "default_min_trade_size")]
    pub min_trade_size: f64,

    #[serde(default = "default_max_trade_size")]
    pub max_trade_size: f64,

    /// Upper bound on a market's total liquidity after a trade.
    #[serde(default = "default_pool_cap")]
    pub pool_cap: f64,

    /// Liquidity buffer
    #[serde(default = "default_buffer_base_annual_yield_pct")]
    pub buffer_base_annual_yield_pct: f64,

    #[serde(default = "default_buffer_activity_bonus_cap_pct")]
    pub buffer_activity_bonus_cap_pct: f64,

    #[serde(default = "default_buffer_lockout_days")]
    pub buffer_lockout_days: i64,

    /// Per-deposit bounds, inclusive.
    #[serde(default = "default_buffer_min_deposit")]
    pub buffer_min_deposit: f64,

    #[serde(default = "default_buffer_max_deposit")]
    pub buffer_max_deposit: f64,

    /// Fraction of each platform fee routed to buffer holders.
    #[serde(default = "default_buffer_fee_share")]
    pub buffer_fee_share: f64,

    /// Experience / reliability
    #[serde(default = "default_correct_prediction_xp")]
    pub correct_prediction_xp: u64,

    #[serde(default = "default_check_in_base_xp")]
    pub check_in_base_xp: u64,

    #[serde(default = "default_streak_bonus_step")]
    pub streak_bonus_step: f64,

    #[serde(default = "default_streak_multiplier_cap")]
    pub streak_multiplier_cap: f64,

    #[serde(default = "default_xp_badge_thresholds")]
    pub xp_badge_thresholds: Vec<u64>,

    #[serde(default = "default_initial_reliability")]
    pub initial_reliability: f64,

    #[serde(default = "default_reliability_correct_weight")]
    pub reliability_correct_weight: f64,

    #[serde(default = "default_reliability_incorrect_weight")]
    pub reliability_incorrect_weight: f64,
}

fn default_entry_fee_rate() -> f64 {
    0.05
}
fn default_min_trade_size() -> f64 {
    10.0
}
fn default_max_trade_size() -> f64 {
    10_000.0
}
fn default_pool_cap() -> f64 {
    100_000.0
}
fn default_buffer_base_annual_yield_pct() -> f64 {
    6.0
}
fn default_buffer_activity_bonus_cap_pct() -> f64 {
    2.0
}
fn default_buffer_lockout_days() -> i64 {
    90
}
fn default_buffer_min_deposit() -> f64 {
    20.0
}
fn default_buffer_max_deposit() -> f64 {
    100.0
}
fn default_buffer_fee_share() -> f64 {
    0.01
}
fn default_correct_prediction_xp() -> u64 {
    10
}
fn default_check_in_base_xp() -> u64 {
    5
}
fn default_streak_bonus_step() -> f64 {
    0.1
}
fn default_streak_multiplier_cap() -> f64 {
    2.0
}
fn default_xp_badge_thresholds() -> Vec<u64> {
    vec![100, 500, 1000]
}
fn default_initial_reliability() -> f64 {
    50.0
}
fn default_reliability_correct_weight() -> f64 {
    20.0
}
fn default_reliability_incorrect_weight() -> f64 {
    10.0
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            entry_fee_rate: default_entry_fee_rate(),
            min_trade_size: default_min_trade_size(),
            max_trade_size: default_max_trade_size(),
            pool_cap: default_pool_cap(),
            buffer_base_annual_yield_pct: default_buffer_base_annual_yield_pct(),
            buffer_activity_bonus_cap_pct: default_buffer_activity_bonus_cap_pct(),
            buffer_lockout_days: default_buffer_lockout_days(),
            buffer_min_deposit: default_buffer_min_deposit(),
            buffer_max_deposit: default_buffer_max_deposit(),
            buffer_fee_share: default_buffer_fee_share(),
            correct_prediction_xp: default_correct_prediction_xp(),
            check_in_base_xp: default_check_in_base_xp(),
            streak_bonus_step: default_streak_bonus_step(),
            streak_multiplier_cap: default_streak_multiplier_cap(),
            xp_badge_thresholds: default_xp_badge_thresholds(),
            initial_reliability: default_initial_reliability(),
            reliability_correct_weight: default_reliability_correct_weight(),
            reliability_incorrect_weight: default_reliability_incorrect_weight(),
        }
    }
}

impl MarketConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading market config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing market config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `MARKET_CONFIG_PATH` (or `market_config.toml`), then apply
    /// `MARKET_*` overrides. Falls back to defaults when no file is present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let path = std::env::var("MARKET_CONFIG_PATH")
            .unwrap_or_else(|_| "market_config.toml".to_string());

        let mut config = if Path::new(&path).exists() {
            Self::load(&path)?
        } else {
            tracing::debug!(path = %path, "market config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        override_f64("MARKET_ENTRY_FEE_RATE", &mut self.entry_fee_rate)?;
        override_f64("MARKET_MIN_TRADE_SIZE", &mut self.min_trade_size)?;
        override_f64("MARKET_MAX_TRADE_SIZE", &mut self.max_trade_size)?;
        override_f64("MARKET_POOL_CAP", &mut self.pool_cap)?;
        override_f64(
            "MARKET_BUFFER_BASE_ANNUAL_YIELD_PCT",
            &mut self.buffer_base_annual_yield_pct,
        )?;
        override_f64("MARKET_BUFFER_MIN_DEPOSIT", &mut self.buffer_min_deposit)?;
        override_f64("MARKET_BUFFER_MAX_DEPOSIT", &mut self.buffer_max_deposit)?;
        override_f64("MARKET_BUFFER_FEE_SHARE", &mut self.buffer_fee_share)?;
        if let Ok(raw) = std::env::var("MARKET_BUFFER_LOCKOUT_DAYS") {
            self.buffer_lockout_days = raw
                .trim()
                .parse()
                .with_context(|| format!("MARKET_BUFFER_LOCKOUT_DAYS={:?}", raw))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..1.0).contains(&self.entry_fee_rate) {
            bail!("entry_fee_rate must be in [0, 1), got {}", self.entry_fee_rate);
        }
        if !(self.min_trade_size > 0.0 && self.min_trade_size <= self.max_trade_size) {
            bail!(
                "trade size bounds invalid: min={} max={}",
                self.min_trade_size,
                self.max_trade_size
            );
        }
        if !(self.pool_cap > 0.0) {
            bail!("pool_cap must be positive, got {}", self.pool_cap);
        }
        if !(0.0..=1.0).contains(&self.buffer_fee_share) {
            bail!("buffer_fee_share must be in [0, 1], got {}", self.buffer_fee_share);
        }
        if !(self.buffer_min_deposit > 0.0 && self.buffer_min_deposit <= self.buffer_max_deposit) {
            bail!(
                "buffer deposit bounds invalid: min={} max={}",
                self.buffer_min_deposit,
                self.buffer_max_deposit
            );
        }
        if self.buffer_lockout_days < 0 {
            bail!("buffer_lockout_days must be non-negative");
        }
        if self.buffer_base_annual_yield_pct < 0.0 || self.buffer_activity_bonus_cap_pct < 0.0 {
            bail!("buffer yield percentages must be non-negative");
        }
        if self.streak_multiplier_cap < 1.0 {
            bail!("streak_multiplier_cap must be at least 1.0");
        }
        if !(0.0..=100.0).contains(&self.initial_reliability) {
            bail!("initial_reliability must be in [0, 100]");
        }
        if self.xp_badge_thresholds.windows(2).any(|w| w[0] >= w[1]) {
            bail!("xp_badge_thresholds must be strictly ascending");
        }
        Ok(())
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    /// Streak XP multiplier: `min(1 + step * (streak - 1), cap)`.
    pub fn streak_multiplier(&self, streak: u32) -> f64 {
        let bonus = self.streak_bonus_step * streak.saturating_sub(1) as f64;
        (1.0 + bonus).min(self.streak_multiplier_cap)
    }
}

fn override_f64(var: &str, slot: &mut f64) -> anyhow::Result<()> {
    if let Ok(raw) = std::env::var(var) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("{}={:?}", var, raw))?;
    }
    Ok(())
}
