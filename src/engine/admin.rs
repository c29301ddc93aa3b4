use tracing::info;

use super::PredictionEngine;
use crate::error::{MarketError, MarketResult};
use crate::models::{LedgerEntry, TransactionType, UserAccount, UserId};
use crate::reliability::unlock_badges;

fn validate(amount: f64, reason: &str) -> MarketResult<()> {
    if !(amount.is_finite() && amount > 0.0) {
        return Err(MarketError::InvalidAmount { amount });
    }
    if reason.trim().is_empty() {
        return Err(MarketError::EmptyReason);
    }
    Ok(())
}

impl PredictionEngine {
    /// Manual point grant. Returns the user's new points balance.
    pub async fn admin_credit_points(
        &self,
        user_id: UserId,
        amount: f64,
        reason: &str,
    ) -> MarketResult<f64> {
        validate(amount, reason)?;
        self.admin_adjust(user_id, amount, reason, |user| {
            user.points += amount;
            Ok(())
        })
        .await
        .map(|u| u.points)
    }

    /// Manual point deduction. Never takes a balance below zero.
    pub async fn admin_debit_points(
        &self,
        user_id: UserId,
        amount: f64,
        reason: &str,
    ) -> MarketResult<f64> {
        validate(amount, reason)?;
        self.admin_adjust(user_id, -amount, reason, |user| {
            if user.points < amount {
                return Err(MarketError::InsufficientBalance {
                    user_id,
                    required: amount,
                    available: user.points,
                });
            }
            user.points -= amount;
            Ok(())
        })
        .await
        .map(|u| u.points)
    }

    /// Manual XP grant, no streak multiplier. Returns the user's new XP.
    pub async fn admin_award_xp(
        &self,
        user_id: UserId,
        xp: u64,
        reason: &str,
    ) -> MarketResult<u64> {
        validate(xp as f64, reason)?;
        let thresholds = self.ctx.config().xp_badge_thresholds;
        self.admin_adjust(user_id, xp as f64, reason, |user| {
            user.xp = user
                .xp
                .checked_add(xp)
                .ok_or(MarketError::InvalidAmount { amount: xp as f64 })?;
            unlock_badges(user, &thresholds);
            Ok(())
        })
        .await
        .map(|u| u.xp)
    }

    async fn admin_adjust<F>(
        &self,
        user_id: UserId,
        ledger_amount: f64,
        reason: &str,
        apply: F,
    ) -> MarketResult<UserAccount>
    where
        F: FnOnce(&mut UserAccount) -> MarketResult<()>,
    {
        let handle = self.ctx.users.get(user_id)?;
        let now = self.ctx.clock.now();
        let mut user = handle.lock().await;
        let mut draft = user.clone();
        apply(&mut draft)?;

        let entry = LedgerEntry::new(
            user_id,
            ledger_amount,
            TransactionType::AdminManual,
            format!("Admin: {}", reason.trim()),
            now,
        );
        self.ctx.write_ledger(&[entry]).await?;
        *user = draft;

        info!(user_id, amount = ledger_amount, reason = reason.trim(), "admin adjustment");
        Ok(user.clone())
    }
}
