//! Per-device transfer statistics.

use core::sync::atomic::{AtomicU64, Ordering};

/// Counters for transfers through one device.
#[derive(Debug, Default)]
pub struct TransferStats {
    /// Successful read calls.
    pub read_count: AtomicU64,
    /// Successful write calls.
    pub write_count: AtomicU64,
    /// Calls that returned an error.
    pub error_count: AtomicU64,
    /// Calls completed by the DMA engine.
    pub dma_count: AtomicU64,
    /// DMA attempts abandoned in favour of the synchronous copy.
    pub fallback_count: AtomicU64,
}

impl TransferStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful read.
    #[inline]
    pub fn record_read(&self) {
        self.read_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful write.
    #[inline]
    pub fn record_write(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed call.
    #[inline]
    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a transfer completed by DMA.
    #[inline]
    pub fn record_dma(&self) {
        self.dma_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a DMA attempt that fell back to copying.
    #[inline]
    pub fn record_fallback(&self) {
        self.fallback_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets the number of successful reads.
    #[inline]
    pub fn reads(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Gets the number of successful writes.
    #[inline]
    pub fn writes(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Gets the number of failed calls.
    #[inline]
    pub fn errors(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Gets the number of DMA-completed transfers.
    #[inline]
    pub fn dma_transfers(&self) -> u64 {
        self.dma_count.load(Ordering::Relaxed)
    }

    /// Gets the number of DMA fallbacks.
    #[inline]
    pub fn dma_fallbacks(&self) -> u64 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    /// Total number of transfer calls (reads + writes).
    #[inline]
    pub fn total_operations(&self) -> u64 {
        self.reads() + self.writes()
    }
}
