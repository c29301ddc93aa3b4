//! Liquidity Buffer
//!
//! Per-user time-locked balance. Deposits reset the withdrawal lockout;
//! yield accrues lazily as simple interest per whole elapsed day.
//!
//! ```text
//! daily_rate% = (base_annual% + min(bonus_cap%, open_markets / 10)) / 365
//! yield       = balance * daily_rate% / 100 * whole_days
//! ```
//!
//! Every operation works on a draft copy of the account and publishes it only
//! after its ledger entries are written.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::whole_days_between;
use crate::config::MarketConfig;
use crate::context::CoreContext;
use crate::error::{MarketError, MarketResult};
use crate::models::{LedgerEntry, TransactionType, UserAccount, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferReceipt {
    pub user_id: UserId,
    pub amount: f64,
    pub yield_credited: f64,
    pub buffer_balance: f64,
    pub points_balance: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeDistribution {
    pub distributed: f64,
    pub recipients: usize,
    /// Left in the wallet (no holders, or a failed payment).
    pub retained: f64,
}

/// Daily yield rate as a fraction of the balance.
pub fn daily_yield_rate(config: &MarketConfig, open_markets: usize) -> f64 {
    let bonus_pct = (open_markets as f64 / 10.0).min(config.buffer_activity_bonus_cap_pct);
    (config.buffer_base_annual_yield_pct + bonus_pct) / 365.0 / 100.0
}

/// Credit whole days of yield into `user`. Returns the ledger entry when
/// anything was credited. Partial days carry over to the next accrual.
pub(crate) fn accrue_into(
    user: &mut UserAccount,
    now: DateTime<Utc>,
    open_markets: usize,
    config: &MarketConfig,
) -> Option<LedgerEntry> {
    let anchor = user.yield_accrued_through?;
    let days = whole_days_between(anchor, now);
    if days == 0 {
        return None;
    }
    user.yield_accrued_through = Some(anchor + Duration::days(days));

    let balance = user.liquidity_buffer_deposit;
    if balance <= 0.0 {
        return None;
    }
    let amount = balance * daily_yield_rate(config, open_markets) * days as f64;
    if !(amount.is_finite() && amount > 0.0) {
        return None;
    }
    user.liquidity_buffer_deposit += amount;
    debug!(user_id = user.id, days, amount, "buffer yield accrued");
    Some(LedgerEntry::new(
        user.id,
        amount,
        TransactionType::LiquidityYield,
        format!("{} day(s) of buffer yield", days),
        now,
    ))
}

fn lockout_error(
    user: &UserAccount,
    now: DateTime<Utc>,
    config: &MarketConfig,
) -> Option<MarketError> {
    let Some(last) = user.last_liquidity_deposit_at else {
        return Some(MarketError::NoDeposit { user_id: user.id });
    };
    if now - last < Duration::days(config.buffer_lockout_days) {
        return Some(MarketError::LockoutActive {
            user_id: user.id,
            days_elapsed: whole_days_between(last, now),
            lockout_days: config.buffer_lockout_days,
        });
    }
    None
}

#[derive(Clone)]
pub struct LiquidityBuffer {
    ctx: CoreContext,
}

impl LiquidityBuffer {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    pub async fn deposit(
        &self,
        user_id: UserId,
        amount: f64,
        fund_from_points: bool,
    ) -> MarketResult<BufferReceipt> {
        let config = self.ctx.config();
        if !(amount.is_finite()
            && amount > 0.0
            && amount >= config.buffer_min_deposit
            && amount <= config.buffer_max_deposit)
        {
            return Err(MarketError::InvalidAmount { amount });
        }
        let handle = self.ctx.users.get(user_id)?;
        let now = self.ctx.clock.now();
        let open_markets = self.ctx.markets.open_market_count();

        let mut user = handle.lock().await;
        let mut draft = user.clone();
        let mut entries = Vec::with_capacity(2);

        let accrued = accrue_into(&mut draft, now, open_markets, &config);
        let yield_credited = accrued.as_ref().map(|e| e.amount).unwrap_or(0.0);
        entries.extend(accrued);

        if fund_from_points {
            if draft.points < amount {
                return Err(MarketError::InsufficientBalance {
                    user_id,
                    required: amount,
                    available: draft.points,
                });
            }
            draft.points -= amount;
        }
        draft.liquidity_buffer_deposit += amount;
        draft.last_liquidity_deposit_at = Some(now);
        if draft.yield_accrued_through.is_none() {
            draft.yield_accrued_through = Some(now);
        }

        let source = if fund_from_points { "points" } else { "external" };
        entries.push(LedgerEntry::new(
            user_id,
            amount,
            TransactionType::LiquidityDeposit,
            format!("Buffer deposit from {}", source),
            now,
        ));

        self.ctx.write_ledger(&entries).await?;
        *user = draft;

        info!(user_id, amount, source, balance = user.liquidity_buffer_deposit, "buffer deposit");
        Ok(BufferReceipt {
            user_id,
            amount,
            yield_credited,
            buffer_balance: user.liquidity_buffer_deposit,
            points_balance: user.points,
        })
    }

    /// Move `amount` from the buffer back to spendable points once the
    /// lockout since the last deposit has elapsed.
    pub async fn withdraw(&self, user_id: UserId, amount: f64) -> MarketResult<BufferReceipt> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(MarketError::InvalidAmount { amount });
        }
        let config = self.ctx.config();
        let handle = self.ctx.users.get(user_id)?;
        let now = self.ctx.clock.now();
        let open_markets = self.ctx.markets.open_market_count();

        let mut user = handle.lock().await;
        if let Some(err) = lockout_error(&user, now, &config) {
            warn!(user_id, error = %err, "buffer withdrawal rejected");
            return Err(err);
        }

        let mut draft = user.clone();
        let mut entries = Vec::with_capacity(2);
        let accrued = accrue_into(&mut draft, now, open_markets, &config);
        let yield_credited = accrued.as_ref().map(|e| e.amount).unwrap_or(0.0);
        entries.extend(accrued);

        if amount > draft.liquidity_buffer_deposit {
            return Err(MarketError::InsufficientBuffer {
                user_id,
                required: amount,
                available: draft.liquidity_buffer_deposit,
            });
        }
        draft.liquidity_buffer_deposit -= amount;
        draft.points += amount;
        entries.push(LedgerEntry::new(
            user_id,
            -amount,
            TransactionType::LiquidityWithdraw,
            "Buffer withdrawal to points",
            now,
        ));

        self.ctx.write_ledger(&entries).await?;
        *user = draft;

        info!(user_id, amount, balance = user.liquidity_buffer_deposit, "buffer withdrawal");
        Ok(BufferReceipt {
            user_id,
            amount,
            yield_credited,
            buffer_balance: user.liquidity_buffer_deposit,
            points_balance: user.points,
        })
    }

    /// Credit any whole days of pending yield. Returns the amount credited.
    pub async fn accrue_yield(&self, user_id: UserId) -> MarketResult<f64> {
        let config = self.ctx.config();
        let handle = self.ctx.users.get(user_id)?;
        let now = self.ctx.clock.now();
        let open_markets = self.ctx.markets.open_market_count();

        let mut user = handle.lock().await;
        let mut draft = user.clone();
        let Some(entry) = accrue_into(&mut draft, now, open_markets, &config) else {
            // Anchor may still have moved past a zero balance.
            *user = draft;
            return Ok(0.0);
        };
        let amount = entry.amount;
        self.ctx.write_ledger(&[entry]).await?;
        *user = draft;
        Ok(amount)
    }

    pub async fn can_withdraw(&self, user_id: UserId) -> MarketResult<bool> {
        let config = self.ctx.config();
        let handle = self.ctx.users.get(user_id)?;
        let now = self.ctx.clock.now();
        let user = handle.lock().await;
        Ok(lockout_error(&user, now, &config).is_none() && user.liquidity_buffer_deposit > 0.0)
    }

    /// Sum of every user's buffer balance.
    pub async fn total_liquidity(&self) -> f64 {
        let mut total = 0.0;
        for (_, handle) in self.ctx.users.handles() {
            total += handle.lock().await.liquidity_buffer_deposit;
        }
        total
    }

    /// Pay the accumulated buffer fee pool to holders pro rata to their
    /// buffer balance, credited as spendable points.
    pub async fn distribute_fee_pool(&self) -> MarketResult<FeeDistribution> {
        let taken = self.ctx.wallet.take_buffer_fee_pool();
        if taken <= 0.0 {
            return Ok(FeeDistribution::default());
        }

        let mut holders = Vec::new();
        let mut total_balance = 0.0;
        for (id, handle) in self.ctx.users.handles() {
            let balance = handle.lock().await.liquidity_buffer_deposit;
            if balance > 0.0 {
                total_balance += balance;
                holders.push((id, handle, balance));
            }
        }
        if total_balance <= 0.0 {
            self.ctx.wallet.finish_distribution(taken, 0.0);
            return Ok(FeeDistribution {
                retained: taken,
                ..Default::default()
            });
        }

        let now = self.ctx.clock.now();
        let mut paid = 0.0;
        let mut recipients = 0;
        for (user_id, handle, balance) in holders {
            let share = taken * balance / total_balance;
            let mut user = handle.lock().await;
            let entry = LedgerEntry::new(
                user_id,
                share,
                TransactionType::LiquidityFeeShare,
                "Buffer fee pool share",
                now,
            );
            if let Err(e) = self.ctx.write_ledger(&[entry]).await {
                self.ctx.wallet.finish_distribution(taken, paid);
                return Err(e);
            }
            user.points += share;
            paid += share;
            recipients += 1;
        }

        self.ctx.wallet.finish_distribution(taken, paid);
        info!(distributed = paid, recipients, "buffer fee pool distributed");
        Ok(FeeDistribution {
            distributed: paid,
            recipients,
            retained: (taken - paid).max(0.0),
        })
    }
}
