use tracing::{debug, error, info, warn};

use super::PredictionEngine;
use crate::amm::{self, Quote};
use crate::buffer::accrue_into;
use crate::error::{ErrorKind, MarketError, MarketResult};
use crate::ledger::PlatformWallet;
use crate::models::{
    LedgerEntry, MarketEventKind, MarketId, Outcome, Prediction, TransactionType, UserId,
};
use crate::store::MarketBook;

fn ensure_open(book: &MarketBook, now: chrono::DateTime<chrono::Utc>) -> MarketResult<()> {
    let market = &book.market;
    if market.accepts_predictions(now) {
        return Ok(());
    }
    let reason = if market.resolved {
        "market is resolved"
    } else {
        "prediction deadline has passed"
    };
    Err(MarketError::MarketClosed {
        market_id: market.id,
        reason,
    })
}

impl PredictionEngine {
    /// Preview a placement at current pool state. Mutates nothing.
    pub async fn quote(
        &self,
        market_id: MarketId,
        stake: f64,
        outcome: Outcome,
    ) -> MarketResult<Quote> {
        let config = self.ctx.config();
        let handle = self.ctx.markets.get(market_id)?;
        let book = handle.lock().await;
        ensure_open(&book, self.ctx.clock.now())?;
        let q = amm::quote(book.market.pool(), stake, outcome, config.entry_fee_rate)?;
        debug!(
            market_id,
            stake,
            outcome = %outcome,
            shares = q.allocation.shares_purchased,
            price = q.allocation.price,
            "quote"
        );
        Ok(q)
    }

    /// Stake `stake` points (gross, fee included) on `outcome`.
    ///
    /// The balance debit, pool update, prediction record and ledger entry
    /// land together or not at all.
    pub async fn place(
        &self,
        user_id: UserId,
        market_id: MarketId,
        stake: f64,
        outcome: Outcome,
        use_liquidity_buffer: bool,
    ) -> MarketResult<Prediction> {
        let config = self.ctx.config();
        if !(stake.is_finite()
            && stake > 0.0
            && stake >= config.min_trade_size
            && stake <= config.max_trade_size)
        {
            return Err(MarketError::InvalidStakeAmount {
                stake,
                min: config.min_trade_size,
                max: config.max_trade_size,
            });
        }

        let market_handle = self.ctx.markets.get(market_id)?;
        let user_handle = self.ctx.users.get(user_id)?;

        let mut book = market_handle.lock().await;
        let now = self.ctx.clock.now();
        if let Err(e) = ensure_open(&book, now) {
            warn!(user_id, market_id, error = %e, "placement rejected");
            return Err(e);
        }
        if book.open_position(user_id).is_some() {
            return Err(MarketError::DuplicatePosition { user_id, market_id });
        }

        let pool = book.market.pool();
        let q = amm::quote(pool, stake, outcome, config.entry_fee_rate).map_err(|e| {
            if e.kind() == ErrorKind::InvariantViolation {
                error!(
                    market_id,
                    yes_pool = pool.yes_liquidity,
                    no_pool = pool.no_liquidity,
                    error = %e,
                    "pool rejected allocation"
                );
            }
            e
        })?;
        let pool_total_after = q.allocation.pool_after().total();
        if pool_total_after > config.pool_cap {
            return Err(MarketError::PoolCapExceeded {
                market_id,
                pool_total: pool_total_after,
                cap: config.pool_cap,
            });
        }

        let mut user = user_handle.lock().await;
        let mut draft = user.clone();
        let mut entries = Vec::with_capacity(2);

        let available = if use_liquidity_buffer {
            let open_markets = self.ctx.markets.open_market_count();
            entries.extend(accrue_into(&mut draft, now, open_markets, &config));
            draft.liquidity_buffer_deposit
        } else {
            draft.points
        };
        if available < stake {
            return Err(MarketError::InsufficientBalance {
                user_id,
                required: stake,
                available,
            });
        }
        if use_liquidity_buffer {
            draft.liquidity_buffer_deposit -= stake;
        } else {
            draft.points -= stake;
        }

        let prediction = Prediction {
            id: self.allocate_prediction_id(),
            user_id,
            market_id,
            stake,
            outcome,
            platform_fee: q.fee,
            shares_purchased: q.allocation.shares_purchased,
            price_paid: q.allocation.price,
            slippage: q.allocation.slippage,
            used_liquidity_buffer: use_liquidity_buffer,
            placed_at: now,
            xp_awarded: false,
            was_correct: None,
            resolved_at: None,
            awarded_points: 0.0,
            awarded_xp: 0,
        };

        let (tx_type, source) = if use_liquidity_buffer {
            (TransactionType::LiquidityStake, "buffer")
        } else {
            (TransactionType::Trade, "points")
        };
        entries.push(
            LedgerEntry::new(
                user_id,
                -stake,
                tx_type,
                format!(
                    "Stake {} on {} from {} ({:.4} shares @ {:.4})",
                    stake, outcome, source, prediction.shares_purchased, prediction.price_paid
                ),
                now,
            )
            .for_market(market_id),
        );

        self.ctx.write_ledger(&entries).await?;

        *user = draft;
        drop(user);
        book.market.apply_pool(q.allocation.pool_after());
        book.record_event(
            MarketEventKind::PredictionPlaced,
            Some(user_id),
            format!("prediction {} {} stake {}", prediction.id, outcome, stake),
            now,
        );
        book.predictions.push(prediction.clone());
        self.ctx
            .wallet
            .record_fee(PlatformWallet::split_fee(q.fee, config.buffer_fee_share));

        info!(
            user_id,
            market_id,
            prediction_id = prediction.id,
            stake,
            outcome = %outcome,
            shares = prediction.shares_purchased,
            fee = prediction.platform_fee,
            "prediction placed"
        );
        Ok(prediction)
    }
}
