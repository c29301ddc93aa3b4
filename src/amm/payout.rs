//! Resolution payouts.
//!
//! A winning position is paid `shares * total / winning_reserve`, read from the
//! frozen pool. If the raw payouts of all winners together exceed the pool's
//! total liquidity, every payout is scaled down by the same factor so the sum
//! never exceeds what the pool holds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::amm::PoolState;
use crate::error::{MarketError, MarketResult};
use crate::models::{Outcome, PredictionId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WinningPosition {
    pub prediction_id: PredictionId,
    pub shares: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutPlan {
    pub outcome: Outcome,
    /// Pro-rata factor applied to raw payouts, 1.0 when the pool covers them.
    pub scale: f64,
    pub raw_total: f64,
    pub total: f64,
    pub payouts: HashMap<PredictionId, f64>,
}

impl PayoutPlan {
    pub fn payout_for(&self, prediction_id: PredictionId) -> f64 {
        self.payouts.get(&prediction_id).copied().unwrap_or(0.0)
    }
}

/// Unscaled payout for a single winning position.
pub fn proportional_payout(pool: PoolState, outcome: Outcome, shares: f64) -> MarketResult<f64> {
    let winning_reserve = pool.reserve(outcome);
    if !(winning_reserve.is_finite() && winning_reserve > 0.0) {
        return Err(MarketError::InvalidLiquidity {
            yes_liquidity: pool.yes_liquidity,
            no_liquidity: pool.no_liquidity,
        });
    }
    Ok(shares * (pool.total() / winning_reserve))
}

/// Build the payout plan for every winner of a market resolved to `outcome`.
///
/// Positions must already be validated (finite, positive shares).
pub fn settlement_payouts(
    pool: PoolState,
    outcome: Outcome,
    winners: &[WinningPosition],
) -> MarketResult<PayoutPlan> {
    pool.validate()?;

    let mut raw = HashMap::with_capacity(winners.len());
    let mut raw_total = 0.0;
    for w in winners {
        let p = proportional_payout(pool, outcome, w.shares)?;
        raw_total += p;
        raw.insert(w.prediction_id, p);
    }

    let available = pool.total();
    let scale = if raw_total > available && raw_total > 0.0 {
        available / raw_total
    } else {
        1.0
    };

    let payouts: HashMap<PredictionId, f64> =
        raw.into_iter().map(|(id, p)| (id, p * scale)).collect();
    let total = payouts.values().sum();

    Ok(PayoutPlan {
        outcome,
        scale,
        raw_total,
        total,
        payouts,
    })
}
