//! Constant-Product Pool
//!
//! Two-sided YES/NO reservoir priced by the invariant `k = yes * no`.
//!
//! ```text
//! buy YES with net stake s:
//!   new_yes = yes + s
//!   new_no  = k / new_yes
//!   shares  = no - new_no
//!   price   = s / shares
//! ```
//!
//! Odds are quoted from the opposite reserve: `yes_odds = no / (yes + no)`.
//! As one side approaches depletion the price of the next share grows without
//! bound, so a pool can never be drained by a finite stake.

use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};
use crate::models::Outcome;

/// Relative tolerance used when checking `k` across trades.
pub const K_RELATIVE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    pub yes_liquidity: f64,
    pub no_liquidity: f64,
}

impl PoolState {
    pub fn new(yes_liquidity: f64, no_liquidity: f64) -> Self {
        Self {
            yes_liquidity,
            no_liquidity,
        }
    }

    pub fn total(&self) -> f64 {
        self.yes_liquidity + self.no_liquidity
    }

    /// The constant product.
    pub fn k(&self) -> f64 {
        self.yes_liquidity * self.no_liquidity
    }

    pub fn reserve(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Yes => self.yes_liquidity,
            Outcome::No => self.no_liquidity,
        }
    }

    /// Both reserves finite and strictly positive.
    pub fn validate(&self) -> MarketResult<()> {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        if ok(self.yes_liquidity) && ok(self.no_liquidity) {
            Ok(())
        } else {
            Err(MarketError::InvalidLiquidity {
                yes_liquidity: self.yes_liquidity,
                no_liquidity: self.no_liquidity,
            })
        }
    }

    pub fn odds(&self) -> MarketResult<Odds> {
        get_current_odds(self.yes_liquidity, self.no_liquidity)
    }

    pub fn allocate(&self, stake: f64, outcome: Outcome) -> MarketResult<Allocation> {
        allocate_shares(self.yes_liquidity, self.no_liquidity, stake, outcome)
    }

    /// `k` of `other` equals ours within [`K_RELATIVE_TOLERANCE`].
    pub fn same_k(&self, other: &PoolState) -> bool {
        let k = self.k();
        let scale = k.abs().max(f64::MIN_POSITIVE);
        ((other.k() - k) / scale).abs() <= K_RELATIVE_TOLERANCE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Odds {
    pub yes: f64,
    pub no: f64,
}

impl Odds {
    pub fn for_outcome(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Yes => self.yes,
            Outcome::No => self.no,
        }
    }
}

/// Current odds for each side.
///
/// Fails with `DivisionByZero` when the pool is empty and with
/// `InvalidLiquidity` when either reserve is negative or non-finite.
pub fn get_current_odds(yes_liquidity: f64, no_liquidity: f64) -> MarketResult<Odds> {
    if !(yes_liquidity.is_finite() && no_liquidity.is_finite())
        || yes_liquidity < 0.0
        || no_liquidity < 0.0
    {
        return Err(MarketError::InvalidLiquidity {
            yes_liquidity,
            no_liquidity,
        });
    }
    let total = yes_liquidity + no_liquidity;
    if total <= 0.0 {
        return Err(MarketError::DivisionByZero("total pool liquidity is zero"));
    }
    Ok(Odds {
        yes: no_liquidity / total,
        no: yes_liquidity / total,
    })
}

/// Result of pushing a net stake through the pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub new_yes_liquidity: f64,
    pub new_no_liquidity: f64,
    pub shares_purchased: f64,
    /// Average price per share (stake / shares).
    pub price: f64,
    /// Relative move of the traded side's odds.
    pub slippage: f64,
    pub odds_before: Odds,
    pub odds_after: Odds,
}

impl Allocation {
    pub fn pool_after(&self) -> PoolState {
        PoolState::new(self.new_yes_liquidity, self.new_no_liquidity)
    }
}

/// Allocate shares for `stake` (already net of fees) on `outcome`.
pub fn allocate_shares(
    yes_liquidity: f64,
    no_liquidity: f64,
    stake: f64,
    outcome: Outcome,
) -> MarketResult<Allocation> {
    if !(stake.is_finite() && stake > 0.0) {
        return Err(MarketError::InvalidAmount { amount: stake });
    }
    let odds_before = get_current_odds(yes_liquidity, no_liquidity)?;
    let pool = PoolState::new(yes_liquidity, no_liquidity);
    pool.validate()?;

    let k = pool.k();
    let (new_yes, new_no, shares) = match outcome {
        Outcome::Yes => {
            let new_yes = yes_liquidity + stake;
            let new_no = k / new_yes;
            (new_yes, new_no, no_liquidity - new_no)
        }
        Outcome::No => {
            let new_no = no_liquidity + stake;
            let new_yes = k / new_no;
            (new_yes, new_no, yes_liquidity - new_yes)
        }
    };

    // Stake too small relative to the pool to move it in f64.
    if !(shares.is_finite() && shares > 0.0) {
        return Err(MarketError::DivisionByZero("allocation yields zero shares"));
    }

    let odds_after = get_current_odds(new_yes, new_no)?;
    let before = odds_before.for_outcome(outcome);
    let after = odds_after.for_outcome(outcome);
    if before <= 0.0 {
        return Err(MarketError::DivisionByZero("pre-trade odds are zero"));
    }

    Ok(Allocation {
        new_yes_liquidity: new_yes,
        new_no_liquidity: new_no,
        shares_purchased: shares,
        price: stake / shares,
        slippage: ((after - before) / before).abs(),
        odds_before,
        odds_after,
    })
}

/// Preview of a placement: fee split plus the allocation of the net stake.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub gross_stake: f64,
    pub fee: f64,
    pub net_stake: f64,
    pub allocation: Allocation,
}

/// Price a gross stake without mutating anything.
pub fn quote(
    pool: PoolState,
    gross_stake: f64,
    outcome: Outcome,
    fee_rate: f64,
) -> MarketResult<Quote> {
    if !(gross_stake.is_finite() && gross_stake > 0.0) {
        return Err(MarketError::InvalidAmount {
            amount: gross_stake,
        });
    }
    let fee = gross_stake * fee_rate.clamp(0.0, 1.0);
    let net_stake = gross_stake - fee;
    let allocation = pool.allocate(net_stake, outcome)?;
    Ok(Quote {
        gross_stake,
        fee,
        net_stake,
        allocation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_balanced_odds() {
        let odds = get_current_odds(100.0, 100.0).unwrap();
        assert!(approx(odds.yes, 0.5, 1e-12));
        assert!(approx(odds.no, 0.5, 1e-12));
    }

    #[test]
    fn test_odds_quote_opposite_reserve() {
        let odds = get_current_odds(100.0, 300.0).unwrap();
        assert!(approx(odds.yes, 0.75, 1e-12));
        assert!(approx(odds.no, 0.25, 1e-12));
    }

    #[test]
    fn test_odds_sum_to_one() {
        for (y, n) in [(1.0, 1.0), (1e-6, 5e3), (913.24, 1095.0), (7.5, 0.25), (1e9, 3.0)] {
            let odds = get_current_odds(y, n).unwrap();
            assert!(approx(odds.yes + odds.no, 1.0, 1e-12), "({}, {})", y, n);
        }
    }

    #[test]
    fn test_zero_liquidity_division_by_zero() {
        let err = get_current_odds(0.0, 0.0).unwrap_err();
        assert!(matches!(err, MarketError::DivisionByZero(_)));
        let err = allocate_shares(0.0, 0.0, 10.0, Outcome::Yes).unwrap_err();
        assert!(matches!(err, MarketError::DivisionByZero(_)));
    }

    #[test]
    fn test_one_sided_pool_rejected() {
        let err = allocate_shares(0.0, 100.0, 10.0, Outcome::Yes).unwrap_err();
        assert!(matches!(err, MarketError::InvalidLiquidity { .. }));
        let err = get_current_odds(-1.0, 100.0).unwrap_err();
        assert!(matches!(err, MarketError::InvalidLiquidity { .. }));
    }

    #[test]
    fn test_invalid_stake_rejected() {
        for stake in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let err = allocate_shares(100.0, 100.0, stake, Outcome::No).unwrap_err();
            assert!(matches!(err, MarketError::InvalidAmount { .. }));
        }
    }

    #[test]
    fn test_small_yes_allocation() {
        let alloc = allocate_shares(100.0, 100.0, 10.0, Outcome::Yes).unwrap();
        assert!(approx(alloc.new_yes_liquidity, 110.0, 1e-9));
        assert!(approx(alloc.new_no_liquidity, 90.909_090_909_090_9, 1e-9));
        assert!(approx(alloc.shares_purchased, 9.090_909_090_909_1, 1e-9));
    }

    #[test]
    fn test_large_no_allocation() {
        let alloc = allocate_shares(100.0, 100.0, 500.0, Outcome::No).unwrap();
        assert!(approx(alloc.new_no_liquidity, 600.0, 1e-9));
        assert!(approx(alloc.new_yes_liquidity, 16.666_666_666_666_668, 1e-9));
        assert!(approx(alloc.shares_purchased, 83.333_333_333_333_33, 1e-9));
    }

    #[test]
    fn test_scenario_fee_then_allocation() {
        // 100 gross at 5% fee against a 1000/1000 pool
        let q = quote(PoolState::new(1000.0, 1000.0), 100.0, Outcome::Yes, 0.05).unwrap();
        assert!(approx(q.fee, 5.0, 1e-12));
        assert!(approx(q.net_stake, 95.0, 1e-12));
        let a = q.allocation;
        assert!(approx(a.new_yes_liquidity, 1095.0, 1e-9));
        assert!(approx(a.new_no_liquidity, 913.24, 0.01));
        assert!(approx(a.shares_purchased, 86.76, 0.01));
        assert!(approx(a.price, 1.095, 1e-3));
    }

    #[test]
    fn test_constant_product_across_sequence() {
        let start = PoolState::new(1000.0, 1000.0);
        let mut pool = start;
        let trades = [
            (10.0, Outcome::Yes),
            (250.0, Outcome::No),
            (3.5, Outcome::Yes),
            (999.0, Outcome::Yes),
            (42.0, Outcome::No),
        ];
        for (stake, outcome) in trades {
            pool = pool.allocate(stake, outcome).unwrap().pool_after();
            assert!(start.same_k(&pool), "k drifted: {} vs {}", start.k(), pool.k());
        }
    }

    #[test]
    fn test_odds_after_trade() {
        let alloc = allocate_shares(100.0, 100.0, 100.0, Outcome::Yes).unwrap();
        let odds = alloc.pool_after().odds().unwrap();
        assert!(approx(odds.yes, 0.2, 1e-12));
        assert!(approx(odds.no, 0.8, 1e-12));
        // YES odds fell from 0.5 to 0.2
        assert!(approx(alloc.slippage, 0.6, 1e-12));
    }

    #[test]
    fn test_price_grows_near_depletion() {
        let small = allocate_shares(100.0, 100.0, 10.0, Outcome::Yes).unwrap();
        let huge = allocate_shares(100.0, 100.0, 10_000.0, Outcome::Yes).unwrap();
        assert!(huge.price > small.price * 50.0);
        assert!(huge.new_no_liquidity > 0.0);
        assert!(huge.shares_purchased < 100.0);
    }

    #[test]
    fn test_tiny_pool() {
        let alloc = allocate_shares(1e-6, 1e-6, 1e-7, Outcome::Yes).unwrap();
        assert!(approx(alloc.new_yes_liquidity, 1.1e-6, 1e-15));
        assert!(approx(alloc.new_no_liquidity, 9.090_909_090_909_091e-7, 1e-15));
    }
}
