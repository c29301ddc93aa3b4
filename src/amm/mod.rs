//! AMM Module - Constant-Product Market Maker
//!
//! This module handles:
//! 1. Odds quoting from pool reserves
//! 2. Share allocation for net stakes (k = yes * no)
//! 3. Resolution payout planning against the frozen pool

pub mod payout;
pub mod pool;

pub use payout::*;
pub use pool::*;
