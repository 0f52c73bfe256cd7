use super::lifecycle::PoolState;

/// Point-in-time snapshot of a pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub state: PoolState,
    pub workers: usize,
    pub active_items: usize,
    pub queued_items: usize,
    pub processed_items: usize,
    pub failed_items: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.workers == 0 {
            return 0.0;
        }
        self.active_items as f64 / self.workers as f64
    }

    pub fn queue_pressure(&self) -> f64 {
        self.queued_items as f64
    }

    /// Share of finished items that did not fail. `processed_items` counts
    /// failures too.
    pub fn success_rate(&self) -> f64 {
        if self.processed_items == 0 {
            return 1.0;
        }
        (self.processed_items - self.failed_items) as f64 / self.processed_items as f64
    }
}
