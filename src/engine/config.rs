use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::orderbook::types::Quantity;

/// Engine configuration. Defaults match a mid-size deployment; everything
/// here is safe to tune per instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker pool size; forced to 1 when `enable_multi_threading` is off
    pub max_worker_threads: usize,
    /// Bounded admission: submissions beyond this fail with `QueueFull`
    pub max_queue_size: usize,
    /// Run the risk pre-check before any order touches a book
    pub enable_risk_management: bool,
    /// Publish market-data updates to subscribers after each order
    pub enable_market_data_broadcast: bool,
    /// Per-order quantity ceiling for the default risk check
    pub max_order_size: Quantity,
    /// Per-order notional ceiling (price x quantity, in ticks) for the
    /// default risk check
    pub max_position_size: u64,
    /// Resting orders older than this are cancelled by the periodic cleanup
    pub order_timeout_seconds: u64,
    /// Reject STOP_LOSS submissions when false
    pub enable_stop_loss_orders: bool,
    /// When false the engine runs a single worker regardless of
    /// `max_worker_threads`
    pub enable_multi_threading: bool,
    /// Finish enqueued work on `stop()`; discard it when false
    pub drain_queue_on_shutdown: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_worker_threads: 4,
            max_queue_size: 10_000,
            enable_risk_management: true,
            enable_market_data_broadcast: true,
            max_order_size: 1_000_000,
            max_position_size: 5_000_000,
            order_timeout_seconds: 86_400,
            enable_stop_loss_orders: true,
            enable_multi_threading: true,
            drain_queue_on_shutdown: true,
        }
    }
}

impl EngineConfig {
    /// Effective worker pool size.
    pub fn worker_count(&self) -> usize {
        if self.enable_multi_threading {
            self.max_worker_threads.max(1)
        } else {
            1
        }
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_seconds)
    }

    /// Cleanup cadence: a tenth of the timeout, clamped to [1s, 60s].
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs((self.order_timeout_seconds / 10).clamp(1, 60))
    }
}
