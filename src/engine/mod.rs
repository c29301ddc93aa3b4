//! Prediction Engine
//!
//! Places stakes against a market's pool and settles them when the market
//! resolves.
//!
//! # Locking
//! Placement and resolution hold the market lock for their whole
//! read-compute-write sequence and take user locks inside it (market before
//! user). Each operation mutates a draft of the user account and publishes
//! the draft, the pool and the prediction only after its ledger batch has
//! been written, so a ledger failure leaves no trace.

mod admin;
mod placement;
mod settlement;

#[cfg(test)]
mod engine_tests;

pub use settlement::{ResolutionReport, SettlementFailure};

use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::LiquidityBuffer;
use crate::context::CoreContext;
use crate::models::PredictionId;
use crate::reliability::ReliabilityService;

pub struct PredictionEngine {
    ctx: CoreContext,
    buffer: LiquidityBuffer,
    reliability: ReliabilityService,
    next_prediction_id: AtomicU64,
}

impl PredictionEngine {
    pub fn new(ctx: CoreContext) -> Self {
        Self {
            buffer: LiquidityBuffer::new(ctx.clone()),
            reliability: ReliabilityService::new(ctx.clone()),
            ctx,
            next_prediction_id: AtomicU64::new(1),
        }
    }

    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    pub fn buffer(&self) -> &LiquidityBuffer {
        &self.buffer
    }

    pub fn reliability(&self) -> &ReliabilityService {
        &self.reliability
    }

    fn allocate_prediction_id(&self) -> PredictionId {
        self.next_prediction_id.fetch_add(1, Ordering::Relaxed)
    }
}
