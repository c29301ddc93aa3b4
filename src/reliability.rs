//! Reliability & experience
//!
//! Reliability moves by `weight / (1 + predictions_so_far)` so early results
//! swing it most, and is clamped to [0, 100]. XP is monotonic; crossing a
//! configured threshold unlocks a badge once.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::MarketConfig;
use crate::context::CoreContext;
use crate::error::{MarketError, MarketResult};
use crate::models::{LedgerEntry, TransactionType, UserAccount, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityUpdate {
    pub user_id: UserId,
    pub was_correct: bool,
    /// Signed change actually applied after clamping.
    pub adjustment: f64,
    pub reliability_index: f64,
    pub xp_awarded: u64,
    pub new_badges: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInOutcome {
    pub user_id: UserId,
    pub already_checked_in: bool,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub multiplier: f64,
    pub xp_awarded: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardMetric {
    Xp,
    LiquidityBuffer,
    Reliability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: UserId,
    pub username: String,
    pub value: f64,
    pub accuracy: f64,
}

/// Unlock every configured threshold the user's XP has reached.
pub(crate) fn unlock_badges(user: &mut UserAccount, thresholds: &[u64]) -> Vec<u64> {
    let mut unlocked = Vec::new();
    for &t in thresholds {
        if user.xp >= t && !user.badges.contains(&t) {
            user.badges.push(t);
            unlocked.push(t);
        }
    }
    user.badges.sort_unstable();
    unlocked
}

/// Apply one resolved prediction to the user's skill metrics.
pub(crate) fn apply_outcome(
    user: &mut UserAccount,
    was_correct: bool,
    config: &MarketConfig,
) -> ReliabilityUpdate {
    let weight = if was_correct {
        config.reliability_correct_weight
    } else {
        -config.reliability_incorrect_weight
    };
    let before = user.reliability_index;
    let raw = weight / (1.0 + user.predictions_count as f64);
    user.reliability_index = (before + raw).clamp(0.0, 100.0);
    user.predictions_count += 1;

    let mut xp_awarded = 0;
    if was_correct {
        user.successful_predictions += 1;
        xp_awarded = config.correct_prediction_xp;
        user.xp = user.xp.saturating_add(xp_awarded);
    }
    let new_badges = unlock_badges(user, &config.xp_badge_thresholds);

    ReliabilityUpdate {
        user_id: user.id,
        was_correct,
        adjustment: user.reliability_index - before,
        reliability_index: user.reliability_index,
        xp_awarded,
        new_badges,
    }
}

fn streak_xp(config: &MarketConfig, base: u64, streak: u32) -> (f64, u64) {
    let multiplier = config.streak_multiplier(streak);
    // epsilon keeps 5 * 1.4 from flooring to 6
    (multiplier, (base as f64 * multiplier + 1e-9).floor() as u64)
}

#[derive(Clone)]
pub struct ReliabilityService {
    ctx: CoreContext,
}

impl ReliabilityService {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    pub async fn update_reliability(
        &self,
        user_id: UserId,
        was_correct: bool,
    ) -> MarketResult<ReliabilityUpdate> {
        let config = self.ctx.config();
        let handle = self.ctx.users.get(user_id)?;
        let now = self.ctx.clock.now();

        let mut user = handle.lock().await;
        let mut draft = user.clone();
        let update = apply_outcome(&mut draft, was_correct, &config);
        if update.xp_awarded > 0 {
            let entry = LedgerEntry::new(
                user_id,
                update.xp_awarded as f64,
                TransactionType::Xp,
                "Correct prediction",
                now,
            );
            self.ctx.write_ledger(&[entry]).await?;
        }
        *user = draft;

        debug!(
            user_id,
            was_correct,
            reliability = update.reliability_index,
            "reliability updated"
        );
        Ok(update)
    }

    /// Daily check-in. A second call on the same day changes nothing.
    pub async fn check_in(&self, user_id: UserId) -> MarketResult<CheckInOutcome> {
        let config = self.ctx.config();
        let handle = self.ctx.users.get(user_id)?;
        let now = self.ctx.clock.now();
        let today = now.date_naive();

        let mut user = handle.lock().await;
        if user.last_check_in_date == Some(today) {
            return Ok(CheckInOutcome {
                user_id,
                already_checked_in: true,
                current_streak: user.current_streak,
                longest_streak: user.longest_streak,
                multiplier: config.streak_multiplier(user.current_streak),
                xp_awarded: 0,
            });
        }

        let mut draft = user.clone();
        let yesterday = today - Duration::days(1);
        draft.current_streak = if draft.last_check_in_date == Some(yesterday) {
            draft.current_streak + 1
        } else {
            1
        };
        draft.longest_streak = draft.longest_streak.max(draft.current_streak);
        draft.last_check_in_date = Some(today);

        let (multiplier, xp) = streak_xp(&config, config.check_in_base_xp, draft.current_streak);
        draft.xp = draft.xp.saturating_add(xp);
        unlock_badges(&mut draft, &config.xp_badge_thresholds);

        let entry = LedgerEntry::new(
            user_id,
            xp as f64,
            TransactionType::Xp,
            format!("Daily check-in, streak {}", draft.current_streak),
            now,
        );
        self.ctx.write_ledger(&[entry]).await?;
        *user = draft;

        info!(user_id, streak = user.current_streak, xp, "check-in");
        Ok(CheckInOutcome {
            user_id,
            already_checked_in: false,
            current_streak: user.current_streak,
            longest_streak: user.longest_streak,
            multiplier,
            xp_awarded: xp,
        })
    }

    /// Award `base` XP scaled by the user's current streak multiplier.
    pub async fn award_xp(&self, user_id: UserId, base: u64, reason: &str) -> MarketResult<u64> {
        if reason.trim().is_empty() {
            return Err(MarketError::EmptyReason);
        }
        let config = self.ctx.config();
        let handle = self.ctx.users.get(user_id)?;
        let now = self.ctx.clock.now();

        let mut user = handle.lock().await;
        let (_, xp) = streak_xp(&config, base, user.current_streak);
        if xp == 0 {
            return Ok(0);
        }
        let mut draft = user.clone();
        draft.xp = draft
            .xp
            .checked_add(xp)
            .ok_or(MarketError::InvalidAmount { amount: xp as f64 })?;
        unlock_badges(&mut draft, &config.xp_badge_thresholds);

        let entry = LedgerEntry::new(user_id, xp as f64, TransactionType::Xp, reason.trim(), now);
        self.ctx.write_ledger(&[entry]).await?;
        *user = draft;
        Ok(xp)
    }

    /// Top `limit` users by `metric`, ties broken by user id.
    pub async fn leaderboard(
        &self,
        metric: LeaderboardMetric,
        limit: usize,
    ) -> Vec<LeaderboardEntry> {
        let mut users = self.ctx.users.snapshots().await;
        let value = |u: &UserAccount| match metric {
            LeaderboardMetric::Xp => u.xp as f64,
            LeaderboardMetric::LiquidityBuffer => u.liquidity_buffer_deposit,
            LeaderboardMetric::Reliability => u.reliability_index,
        };
        users.sort_by(|a, b| {
            value(b)
                .partial_cmp(&value(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        users
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, u)| LeaderboardEntry {
                rank: i + 1,
                user_id: u.id,
                value: value(&u),
                accuracy: u.accuracy(),
                username: u.username,
            })
            .collect()
    }
}
