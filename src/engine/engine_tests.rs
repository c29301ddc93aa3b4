use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::*;
use crate::clock::ManualClock;
use crate::config::MarketConfig;
use crate::error::{ErrorKind, MarketError};
use crate::ledger::{InMemoryLedger, LedgerStore};
use crate::models::{Market, MarketEventKind, Outcome, TransactionType, UserAccount};

struct Harness {
    engine: Arc<PredictionEngine>,
    clock: Arc<ManualClock>,
    ledger: Arc<InMemoryLedger>,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 15, 0, 0).unwrap()
}

fn harness_with(config: MarketConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(start()));
    let ledger = Arc::new(InMemoryLedger::new());
    let ctx = CoreContext::new(ledger.clone(), config, clock.clone());
    for (id, name, points) in [(1, "ada", 1000.0), (2, "lin", 1000.0), (3, "kai", 50.0)] {
        ctx.users
            .register(UserAccount::new(id, name, points, 50.0, start()))
            .unwrap();
    }
    add_market(&ctx, 1, 1000.0, 1000.0);
    Harness {
        engine: Arc::new(PredictionEngine::new(ctx)),
        clock,
        ledger,
    }
}

fn harness() -> Harness {
    harness_with(MarketConfig::default())
}

fn add_market(ctx: &CoreContext, id: u64, yes: f64, no: f64) {
    ctx.markets
        .insert(Market::new(
            id,
            "Will the transit levy pass?",
            yes,
            no,
            start() + Duration::days(7),
            start() + Duration::days(14),
            start(),
        ))
        .unwrap();
}

fn approx(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

// =============================================================================
// PLACEMENT
// =============================================================================

#[tokio::test]
async fn test_place_applies_fee_and_moves_pool() {
    let h = harness();
    let p = h.engine.place(1, 1, 100.0, Outcome::Yes, false).await.unwrap();

    assert!(approx(p.platform_fee, 5.0, 1e-12));
    assert!(approx(p.net_stake(), 95.0, 1e-12));
    assert!(approx(p.shares_purchased, 86.76, 0.01));
    assert!(approx(p.price_paid, 1.095, 1e-3));
    assert!(!p.xp_awarded);

    let ctx = h.engine.context();
    let market = ctx.markets.snapshot(1).await.unwrap();
    assert!(approx(market.yes_pool, 1095.0, 1e-9));
    assert!(approx(market.no_pool, 913.24, 0.01));
    assert!(approx(market.liquidity_pool, market.yes_pool + market.no_pool, 1e-9));

    assert_eq!(ctx.users.snapshot(1).await.unwrap().points, 900.0);
    assert!(approx(ctx.wallet.total_fees(), 5.0, 1e-12));
    assert!(approx(ctx.wallet.buffer_fee_pool(), 0.05, 1e-12));

    let entries = h.ledger.entries_for_user(1).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].transaction_type, TransactionType::Trade);
    assert_eq!(entries[0].amount, -100.0);
    assert_eq!(entries[0].market_id, Some(1));
}

#[tokio::test]
async fn test_quote_does_not_mutate() {
    let h = harness();
    let q = h.engine.quote(1, 100.0, Outcome::No).await.unwrap();
    assert!(approx(q.net_stake, 95.0, 1e-12));
    let market = h.engine.context().markets.snapshot(1).await.unwrap();
    assert_eq!((market.yes_pool, market.no_pool), (1000.0, 1000.0));
    assert_eq!(h.ledger.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_place_rejections() {
    let h = harness();
    let e = &h.engine;

    for stake in [5.0, 20_000.0, f64::NAN, -10.0] {
        assert!(matches!(
            e.place(1, 1, stake, Outcome::Yes, false).await,
            Err(MarketError::InvalidStakeAmount { .. })
        ));
    }
    assert!(matches!(
        e.place(3, 1, 100.0, Outcome::Yes, false).await,
        Err(MarketError::InsufficientBalance { user_id: 3, .. })
    ));
    assert!(matches!(
        e.place(1, 99, 100.0, Outcome::Yes, false).await,
        Err(MarketError::MarketNotFound(99))
    ));
    assert!(matches!(
        e.place(42, 1, 100.0, Outcome::Yes, false).await,
        Err(MarketError::UserNotFound(42))
    ));

    e.place(1, 1, 100.0, Outcome::Yes, false).await.unwrap();
    let err = e.place(1, 1, 50.0, Outcome::No, false).await.unwrap_err();
    assert!(matches!(
        err,
        MarketError::DuplicatePosition {
            user_id: 1,
            market_id: 1
        }
    ));
    assert_eq!(err.kind(), ErrorKind::StateConflict);

    // rejected calls left no trace
    assert_eq!(h.ledger.len().await.unwrap(), 1);
    assert_eq!(e.context().users.snapshot(3).await.unwrap().points, 50.0);
}

#[tokio::test]
async fn test_place_after_deadline_is_closed() {
    let h = harness();
    h.clock.advance_days(7);
    h.engine.place(1, 1, 10.0, Outcome::Yes, false).await.unwrap();

    h.clock.advance(Duration::seconds(1));
    assert!(matches!(
        h.engine.place(2, 1, 10.0, Outcome::Yes, false).await,
        Err(MarketError::MarketClosed { market_id: 1, .. })
    ));
}

#[tokio::test]
async fn test_pool_cap() {
    let mut config = MarketConfig::default();
    config.pool_cap = 2050.0;
    let h = harness_with(config);

    // 950 net on YES: (1950, 512.82) totals 2462.82
    let err = h.engine.place(1, 1, 1000.0, Outcome::Yes, false).await.unwrap_err();
    match err {
        MarketError::PoolCapExceeded {
            market_id,
            pool_total,
            cap,
        } => {
            assert_eq!(market_id, 1);
            assert!(approx(pool_total, 1950.0 + 1_000_000.0 / 1950.0, 1e-6));
            assert_eq!(cap, 2050.0);
        }
        other => panic!("expected PoolCapExceeded, got {:?}", other),
    }
    assert_eq!(h.ledger.len().await.unwrap(), 0);

    // 95 net on YES: (1095, 913.24) totals 2008.24, under the cap
    h.engine.place(1, 1, 100.0, Outcome::Yes, false).await.unwrap();
    let market = h.engine.context().markets.snapshot(1).await.unwrap();
    assert!(market.liquidity_pool <= 2050.0);
    assert!(approx(market.liquidity_pool, 2008.24, 0.01));
}

#[tokio::test]
async fn test_ledger_failure_rolls_back_placement() {
    let h = harness();
    h.ledger.set_fail_appends(true);
    let err = h.engine.place(1, 1, 100.0, Outcome::Yes, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let ctx = h.engine.context();
    assert_eq!(ctx.users.snapshot(1).await.unwrap().points, 1000.0);
    let market = ctx.markets.snapshot(1).await.unwrap();
    assert_eq!((market.yes_pool, market.no_pool), (1000.0, 1000.0));
    assert!(ctx.markets.predictions(1).await.unwrap().is_empty());
    assert_eq!(ctx.wallet.total_fees(), 0.0);

    h.ledger.set_fail_appends(false);
    h.engine.place(1, 1, 100.0, Outcome::Yes, false).await.unwrap();
}

#[tokio::test]
async fn test_place_from_buffer() {
    let h = harness();
    for _ in 0..3 {
        h.engine.buffer().deposit(2, 100.0, true).await.unwrap();
    }

    let p = h.engine.place(2, 1, 200.0, Outcome::No, true).await.unwrap();
    assert!(p.used_liquidity_buffer);
    let user = h.engine.context().users.snapshot(2).await.unwrap();
    assert_eq!(user.points, 700.0);
    assert_eq!(user.liquidity_buffer_deposit, 100.0);

    let last = h.ledger.entries_for_user(2).await.unwrap().pop().unwrap();
    assert_eq!(last.transaction_type, TransactionType::LiquidityStake);
    assert_eq!(last.amount, -200.0);

    add_market(h.engine.context(), 2, 500.0, 500.0);
    assert!(matches!(
        h.engine.place(2, 2, 150.0, Outcome::Yes, true).await,
        Err(MarketError::InsufficientBalance { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_placement() {
    let h = harness();
    let a = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.place(1, 1, 100.0, Outcome::Yes, false).await })
    };
    let b = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.place(1, 1, 100.0, Outcome::No, false).await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(MarketError::DuplicatePosition { .. }))));
    assert_eq!(h.engine.context().users.snapshot(1).await.unwrap().points, 900.0);
    assert_eq!(h.engine.context().markets.predictions(1).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_placements_keep_k() {
    let h = harness();
    let ctx = h.engine.context().clone();
    for id in 10..40u64 {
        ctx.users
            .register(UserAccount::new(id, format!("u{}", id), 500.0, 50.0, start()))
            .unwrap();
    }

    let mut tasks = Vec::new();
    for id in 10..40u64 {
        let engine = h.engine.clone();
        let outcome = Outcome::from_bool(id % 3 != 0);
        tasks.push(tokio::spawn(async move {
            engine.place(id, 1, 10.0 + id as f64, outcome, false).await
        }));
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let market = ctx.markets.snapshot(1).await.unwrap();
    let k = market.yes_pool * market.no_pool;
    assert!(((k - 1_000_000.0) / 1_000_000.0).abs() < 1e-6);
    assert_eq!(ctx.markets.predictions(1).await.unwrap().len(), 30);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_place_racing_resolve_is_settled_or_rejected() {
    for _ in 0..20 {
        let h = harness();
        let ctx = h.engine.context().clone();
        h.engine.place(1, 1, 100.0, Outcome::Yes, false).await.unwrap();

        let late = {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.place(2, 1, 100.0, Outcome::No, false).await })
        };
        let resolve = {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.resolve(1, Outcome::Yes).await })
        };
        let placed = late.await.unwrap();
        let report = resolve.await.unwrap().unwrap();
        assert!(report.is_complete());

        let predictions = ctx.markets.predictions(1).await.unwrap();
        assert!(predictions.iter().all(|p| p.xp_awarded));
        match placed {
            Ok(p) => {
                assert_eq!(report.settled, 2);
                assert!(predictions.iter().any(|q| q.id == p.id));
            }
            Err(e) => {
                assert!(matches!(e, MarketError::MarketClosed { market_id: 1, .. }));
                assert_eq!(report.settled, 1);
                assert_eq!(predictions.len(), 1);
                assert!(h.ledger.entries_for_user(2).await.unwrap().is_empty());
                assert_eq!(ctx.users.snapshot(2).await.unwrap().points, 1000.0);
            }
        }
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

#[tokio::test]
async fn test_resolution_pays_winner_from_losing_side() {
    let h = harness();
    let ctx = h.engine.context().clone();
    let yes = h.engine.place(1, 1, 100.0, Outcome::Yes, false).await.unwrap();
    h.engine.place(2, 1, 100.0, Outcome::No, false).await.unwrap();
    let pool_total = ctx.markets.snapshot(1).await.unwrap().liquidity_pool;

    let report = h.engine.resolve(1, Outcome::Yes).await.unwrap();
    assert_eq!(report.settled, 2);
    assert_eq!((report.winners, report.losers), (1, 1));
    assert!(report.is_complete());
    assert_eq!(report.payout_scale, 1.0);

    let predictions = ctx.markets.predictions(1).await.unwrap();
    let won = predictions.iter().find(|p| p.id == yes.id).unwrap();
    let lost = predictions.iter().find(|p| p.id != yes.id).unwrap();
    assert!(won.xp_awarded && lost.xp_awarded);
    assert_eq!(lost.awarded_points, 0.0);
    assert_eq!(lost.was_correct, Some(false));
    // winner recovers more than their net stake
    assert!(won.awarded_points > won.net_stake());
    assert_eq!(won.awarded_xp, 100 + 10);
    assert!(report.total_paid <= pool_total);

    let winner = ctx.users.snapshot(1).await.unwrap();
    assert!(approx(winner.points, 900.0 + won.awarded_points, 1e-9));
    assert_eq!(winner.xp, 110);
    assert_eq!(winner.badges, vec![100]);
    assert!(approx(winner.reliability_index, 70.0, 1e-12));

    let loser = ctx.users.snapshot(2).await.unwrap();
    assert_eq!(loser.points, 900.0);
    assert!(approx(loser.reliability_index, 40.0, 1e-12));

    let kinds: Vec<_> = ctx
        .markets
        .events(1)
        .await
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            MarketEventKind::Created,
            MarketEventKind::PredictionPlaced,
            MarketEventKind::PredictionPlaced,
            MarketEventKind::Resolved
        ]
    );
    assert_eq!(ctx.markets.open_market_count(), 0);
}

#[tokio::test]
async fn test_resolution_is_exactly_once() {
    let h = harness();
    let ctx = h.engine.context().clone();
    h.engine.place(1, 1, 100.0, Outcome::Yes, false).await.unwrap();
    h.engine.resolve(1, Outcome::Yes).await.unwrap();

    let before = ctx.users.snapshot(1).await.unwrap();
    let entries_before = h.ledger.len().await.unwrap();

    let err = h.engine.resolve(1, Outcome::No).await.unwrap_err();
    assert!(matches!(err, MarketError::AlreadyResolved { market_id: 1 }));

    let pending = h.engine.settle_pending(1).await.unwrap();
    assert_eq!(pending.settled, 0);

    let after = ctx.users.snapshot(1).await.unwrap();
    assert_eq!(after.points, before.points);
    assert_eq!(after.xp, before.xp);
    assert_eq!(after.reliability_index, before.reliability_index);
    assert_eq!(h.ledger.len().await.unwrap(), entries_before);

    assert!(matches!(
        h.engine.place(2, 1, 100.0, Outcome::No, false).await,
        Err(MarketError::MarketClosed { .. })
    ));
}

#[tokio::test]
async fn test_settle_pending_requires_resolution() {
    let h = harness();
    assert!(matches!(
        h.engine.settle_pending(1).await,
        Err(MarketError::MarketNotResolved { market_id: 1 })
    ));
}

#[tokio::test]
async fn test_payouts_clamped_to_pool() {
    let h = harness();
    let ctx = h.engine.context().clone();
    add_market(&ctx, 2, 10.0, 1000.0);
    h.engine.place(1, 2, 10.0, Outcome::Yes, false).await.unwrap();
    let pool_total = ctx.markets.snapshot(2).await.unwrap().liquidity_pool;

    let report = h.engine.resolve(2, Outcome::Yes).await.unwrap();
    assert!(report.payout_scale < 1.0);
    assert!(approx(report.total_paid, pool_total, 1e-6));
    assert!(report.total_paid <= pool_total + 1e-9);
}

#[tokio::test]
async fn test_malformed_prediction_is_isolated() {
    let h = harness();
    let ctx = h.engine.context().clone();
    let bad = h.engine.place(1, 1, 100.0, Outcome::Yes, false).await.unwrap();
    h.engine.place(2, 1, 100.0, Outcome::Yes, false).await.unwrap();
    {
        let handle = ctx.markets.get(1).unwrap();
        let mut book = handle.lock().await;
        book.predictions[0].shares_purchased = f64::NAN;
    }

    let report = h.engine.resolve(1, Outcome::Yes).await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].prediction_id, bad.id);
    assert!(ctx.markets.snapshot(1).await.unwrap().resolved);

    let predictions = ctx.markets.predictions(1).await.unwrap();
    assert!(!predictions[0].xp_awarded);
    assert!(predictions[1].xp_awarded);
    assert_eq!(ctx.users.snapshot(1).await.unwrap().points, 900.0);

    // still malformed on retry
    let retry = h.engine.settle_pending(1).await.unwrap();
    assert_eq!(retry.settled, 0);
    assert_eq!(retry.failures.len(), 1);
}

#[tokio::test]
async fn test_settle_pending_recovers_ledger_outage() {
    let h = harness();
    let ctx = h.engine.context().clone();
    h.engine.place(1, 1, 100.0, Outcome::Yes, false).await.unwrap();
    h.engine.place(2, 1, 100.0, Outcome::No, false).await.unwrap();

    h.ledger.set_fail_appends(true);
    let report = h.engine.resolve(1, Outcome::No).await.unwrap();
    assert_eq!(report.settled, 0);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(ctx.users.snapshot(2).await.unwrap().points, 900.0);

    h.ledger.set_fail_appends(false);
    let retry = h.engine.settle_pending(1).await.unwrap();
    assert_eq!(retry.settled, 2);
    assert_eq!(retry.winners, 1);
    assert!(ctx.users.snapshot(2).await.unwrap().points > 900.0);

    let again = h.engine.settle_pending(1).await.unwrap();
    assert_eq!(again.settled, 0);
    assert!(again.is_complete());
}

// =============================================================================
// ADMIN
// =============================================================================

#[tokio::test]
async fn test_admin_adjustments() {
    let h = harness();
    assert_eq!(h.engine.admin_credit_points(3, 25.0, "event prize").await.unwrap(), 75.0);
    assert_eq!(h.engine.admin_debit_points(3, 70.0, "correction").await.unwrap(), 5.0);
    assert!(matches!(
        h.engine.admin_debit_points(3, 10.0, "correction").await,
        Err(MarketError::InsufficientBalance { .. })
    ));
    assert!(matches!(
        h.engine.admin_credit_points(3, 10.0, "   ").await,
        Err(MarketError::EmptyReason)
    ));
    assert_eq!(h.engine.admin_award_xp(3, 120, "moderation").await.unwrap(), 120);

    let user = h.engine.context().users.snapshot(3).await.unwrap();
    assert_eq!(user.badges, vec![100]);

    assert!(matches!(
        h.engine.admin_award_xp(3, u64::MAX, "moderation").await,
        Err(MarketError::InvalidAmount { .. })
    ));
    assert_eq!(h.engine.context().users.snapshot(3).await.unwrap().xp, 120);
    let entries = h.ledger.entries_for_user(3).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries
        .iter()
        .all(|e| e.transaction_type == TransactionType::AdminManual));
}
