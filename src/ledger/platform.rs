use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// How one platform fee was divided.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub platform: f64,
    pub buffer: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletSnapshot {
    /// Fees retained by the platform.
    pub platform_fees: f64,
    /// Fee share waiting to be paid to buffer holders.
    pub buffer_fee_pool: f64,
    /// Total ever paid out of the buffer fee pool.
    pub buffer_fees_distributed: f64,
    pub fee_count: u64,
}

/// Platform-side fee accounting. Fees never touch a market pool.
#[derive(Debug, Default)]
pub struct PlatformWallet {
    state: Mutex<WalletSnapshot>,
}

impl PlatformWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn split_fee(fee: f64, buffer_share: f64) -> FeeSplit {
        let buffer = fee * buffer_share.clamp(0.0, 1.0);
        FeeSplit {
            platform: fee - buffer,
            buffer,
        }
    }

    pub fn record_fee(&self, split: FeeSplit) {
        let mut s = self.state.lock();
        s.platform_fees += split.platform;
        s.buffer_fee_pool += split.buffer;
        s.fee_count += 1;
    }

    pub fn total_fees(&self) -> f64 {
        let s = self.state.lock();
        s.platform_fees + s.buffer_fee_pool + s.buffer_fees_distributed
    }

    pub fn platform_fees(&self) -> f64 {
        self.state.lock().platform_fees
    }

    pub fn buffer_fee_pool(&self) -> f64 {
        self.state.lock().buffer_fee_pool
    }

    /// Drain the buffer fee pool for distribution.
    pub fn take_buffer_fee_pool(&self) -> f64 {
        std::mem::take(&mut self.state.lock().buffer_fee_pool)
    }

    /// Settle a distribution: `paid` left the wallet, the rest goes back.
    pub fn finish_distribution(&self, taken: f64, paid: f64) {
        let mut s = self.state.lock();
        s.buffer_fees_distributed += paid;
        s.buffer_fee_pool += (taken - paid).max(0.0);
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        self.state.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_split_and_accounting() {
        let wallet = PlatformWallet::new();
        let split = PlatformWallet::split_fee(5.0, 0.01);
        assert!((split.buffer - 0.05).abs() < 1e-12);
        assert!((split.platform - 4.95).abs() < 1e-12);

        wallet.record_fee(split);
        wallet.record_fee(split);
        assert!((wallet.total_fees() - 10.0).abs() < 1e-12);
        assert!((wallet.buffer_fee_pool() - 0.1).abs() < 1e-12);

        let taken = wallet.take_buffer_fee_pool();
        assert_eq!(wallet.buffer_fee_pool(), 0.0);
        wallet.finish_distribution(taken, taken * 0.5);
        assert!((wallet.buffer_fee_pool() - 0.05).abs() < 1e-12);
        assert!((wallet.total_fees() - 10.0).abs() < 1e-12);
        assert_eq!(wallet.snapshot().fee_count, 2);
    }
}
