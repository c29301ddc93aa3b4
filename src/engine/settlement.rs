//! Market resolution and settlement fan-out.
//!
//! # Invariants
//! - A market moves OPEN -> RESOLVED exactly once
//! - Each prediction is settled at most once; `xp_awarded` is the guard
//! - Sum of payouts never exceeds the frozen pool's total liquidity
//! - One prediction failing to settle does not block the others

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::PredictionEngine;
use crate::amm::{settlement_payouts, PayoutPlan, WinningPosition};
use crate::error::{MarketError, MarketResult};
use crate::models::{
    LedgerEntry, MarketEventKind, MarketId, Outcome, Prediction, PredictionId, TransactionType,
    UserId,
};
use crate::reliability::apply_outcome;
use crate::store::MarketBook;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementFailure {
    pub prediction_id: PredictionId,
    pub user_id: UserId,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub market_id: MarketId,
    pub outcome: Outcome,
    pub settled: usize,
    pub winners: usize,
    pub losers: usize,
    pub total_paid: f64,
    /// Pro-rata factor applied to winner payouts (1.0 unless clamped).
    pub payout_scale: f64,
    pub failures: Vec<SettlementFailure>,
}

impl ResolutionReport {
    fn new(market_id: MarketId, outcome: Outcome) -> Self {
        Self {
            market_id,
            outcome,
            settled: 0,
            winners: 0,
            losers: 0,
            total_paid: 0.0,
            payout_scale: 1.0,
            failures: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

fn check_well_formed(p: &Prediction) -> MarketResult<()> {
    let bad = |reason: &str| MarketError::MalformedPrediction {
        prediction_id: p.id,
        reason: reason.to_string(),
    };
    if !(p.stake.is_finite() && p.stake > 0.0) {
        return Err(bad("stake is not a positive number"));
    }
    if !(p.shares_purchased.is_finite() && p.shares_purchased > 0.0) {
        return Err(bad("shares are not a positive number"));
    }
    Ok(())
}

impl PredictionEngine {
    /// Finalize `market_id` to `outcome` and settle every open prediction.
    pub async fn resolve(
        &self,
        market_id: MarketId,
        outcome: Outcome,
    ) -> MarketResult<ResolutionReport> {
        let handle = self.ctx.markets.get(market_id)?;
        let mut book = handle.lock().await;
        if book.market.resolved {
            warn!(market_id, "market already resolved");
            return Err(MarketError::AlreadyResolved { market_id });
        }

        let now = self.ctx.clock.now();
        book.market.resolved = true;
        book.market.resolved_outcome = Some(outcome);
        book.market.resolved_at = Some(now);
        self.ctx.markets.mark_resolved(market_id);

        let report = self.settle_book(&mut book, outcome, now).await;
        book.record_event(
            MarketEventKind::Resolved,
            None,
            format!(
                "resolved {}: {} settled, {:.4} paid",
                outcome, report.settled, report.total_paid
            ),
            now,
        );

        info!(
            market_id,
            outcome = %outcome,
            settled = report.settled,
            winners = report.winners,
            losers = report.losers,
            total_paid = report.total_paid,
            failures = report.failures.len(),
            "market resolved"
        );
        Ok(report)
    }

    /// Retry settlement of predictions on a resolved market that failed
    /// earlier. A no-op when nothing is pending.
    pub async fn settle_pending(&self, market_id: MarketId) -> MarketResult<ResolutionReport> {
        let handle = self.ctx.markets.get(market_id)?;
        let mut book = handle.lock().await;
        let outcome = match (book.market.resolved, book.market.resolved_outcome) {
            (true, Some(outcome)) => outcome,
            _ => return Err(MarketError::MarketNotResolved { market_id }),
        };
        if !book.predictions.iter().any(Prediction::is_open) {
            return Ok(ResolutionReport::new(market_id, outcome));
        }

        let now = self.ctx.clock.now();
        let report = self.settle_book(&mut book, outcome, now).await;
        info!(
            market_id,
            settled = report.settled,
            failures = report.failures.len(),
            "pending predictions settled"
        );
        Ok(report)
    }

    /// Fan resolution out over the book's open predictions. Caller holds the
    /// market lock.
    async fn settle_book(
        &self,
        book: &mut MarketBook,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> ResolutionReport {
        let market_id = book.market.id;
        let mut report = ResolutionReport::new(market_id, outcome);

        // Plan over every well-formed winner, settled or not, so a retry pays
        // at the same scale as the first pass.
        let winners: Vec<WinningPosition> = book
            .predictions
            .iter()
            .filter(|p| p.outcome == outcome && check_well_formed(p).is_ok())
            .map(|p| WinningPosition {
                prediction_id: p.id,
                shares: p.shares_purchased,
            })
            .collect();
        let plan: Result<PayoutPlan, String> =
            settlement_payouts(book.market.pool(), outcome, &winners).map_err(|e| {
                error!(market_id, error = %e, "cannot compute payouts from frozen pool");
                e.to_string()
            });
        if let Ok(plan) = &plan {
            report.payout_scale = plan.scale;
        }

        for idx in 0..book.predictions.len() {
            if !book.predictions[idx].is_open() {
                continue;
            }
            let prediction = book.predictions[idx].clone();
            let result = match (check_well_formed(&prediction), &plan) {
                (Err(e), _) => Err(e.to_string()),
                (Ok(()), Err(e)) if prediction.outcome == outcome => Err(e.clone()),
                (Ok(()), plan) => {
                    let payout = plan
                        .as_ref()
                        .map(|p| p.payout_for(prediction.id))
                        .unwrap_or(0.0);
                    self.settle_prediction(&prediction, outcome, payout, now)
                        .await
                        .map_err(|e| e.to_string())
                }
            };

            match result {
                Ok((correct, points, xp)) => {
                    let p = &mut book.predictions[idx];
                    p.xp_awarded = true;
                    p.was_correct = Some(correct);
                    p.resolved_at = Some(now);
                    p.awarded_points = points;
                    p.awarded_xp = xp;
                    report.settled += 1;
                    report.total_paid += points;
                    if correct {
                        report.winners += 1;
                    } else {
                        report.losers += 1;
                    }
                }
                Err(error) => {
                    error!(
                        market_id,
                        prediction_id = prediction.id,
                        user_id = prediction.user_id,
                        error = %error,
                        "prediction settlement failed"
                    );
                    report.failures.push(SettlementFailure {
                        prediction_id: prediction.id,
                        user_id: prediction.user_id,
                        error,
                    });
                }
            }
        }
        report
    }

    /// Apply one prediction's result to its owner. Returns
    /// `(was_correct, points_paid, xp_awarded)`.
    async fn settle_prediction(
        &self,
        prediction: &Prediction,
        outcome: Outcome,
        payout: f64,
        now: DateTime<Utc>,
    ) -> MarketResult<(bool, f64, u64)> {
        let config = self.ctx.config();
        let handle = self.ctx.users.get(prediction.user_id)?;
        let mut user = handle.lock().await;
        let mut draft = user.clone();

        let correct = prediction.outcome == outcome;
        let mut entries = Vec::with_capacity(2);
        let (points, xp) = if correct {
            let stake_xp = prediction.stake.floor() as u64;
            draft.points += payout;
            draft.xp = draft.xp.saturating_add(stake_xp);
            let update = apply_outcome(&mut draft, true, &config);
            let xp = stake_xp.saturating_add(update.xp_awarded);
            entries.push(
                LedgerEntry::new(
                    prediction.user_id,
                    payout,
                    TransactionType::Resolution,
                    format!("Prediction {} won ({})", prediction.id, outcome),
                    now,
                )
                .for_market(prediction.market_id),
            );
            entries.push(
                LedgerEntry::new(
                    prediction.user_id,
                    xp as f64,
                    TransactionType::Xp,
                    format!("Correct prediction {}", prediction.id),
                    now,
                )
                .for_market(prediction.market_id),
            );
            (payout, xp)
        } else {
            apply_outcome(&mut draft, false, &config);
            entries.push(
                LedgerEntry::new(
                    prediction.user_id,
                    0.0,
                    TransactionType::Resolution,
                    format!("Prediction {} lost ({})", prediction.id, outcome),
                    now,
                )
                .for_market(prediction.market_id),
            );
            (0.0, 0)
        };

        self.ctx.write_ledger(&entries).await?;
        *user = draft;
        Ok((correct, points, xp))
    }
}
