use metrics::{counter, describe_counter, describe_gauge, gauge};
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine-level counters, mirrored to the `metrics` facade.
///
/// The atomics back `statistics()`; the facade calls feed whatever exporter
/// the embedding application installs. Values are individually consistent
/// but not snapshot-consistent across fields.
#[derive(Debug)]
pub struct EngineMetrics {
    orders_processed: AtomicU64,
    orders_rejected: AtomicU64,
    trades_executed: AtomicU64,
    volume_traded: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        describe_counter!("engine_orders_total", "Orders handled by the worker pool");
        describe_counter!("engine_trades_total", "Trades executed");
        describe_counter!("engine_volume_total", "Quantity traded");
        describe_gauge!("engine_queue_depth", "Requests waiting in the priority queue");
        describe_gauge!("engine_active_symbols", "Registered symbols");

        Self {
            orders_processed: AtomicU64::new(0),
            orders_rejected: AtomicU64::new(0),
            trades_executed: AtomicU64::new(0),
            volume_traded: AtomicU64::new(0),
        }
    }

    pub fn record_order_processed(&self) {
        self.orders_processed.fetch_add(1, Ordering::Relaxed);
        counter!("engine_orders_total", "outcome" => "processed").increment(1);
    }

    pub fn record_order_rejected(&self) {
        self.orders_rejected.fetch_add(1, Ordering::Relaxed);
        counter!("engine_orders_total", "outcome" => "rejected").increment(1);
    }

    pub fn record_trade(&self, quantity: u64) {
        self.trades_executed.fetch_add(1, Ordering::Relaxed);
        self.volume_traded.fetch_add(quantity, Ordering::Relaxed);
        counter!("engine_trades_total").increment(1);
        counter!("engine_volume_total").increment(quantity);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        gauge!("engine_queue_depth").set(depth as f64);
    }

    pub fn set_active_symbols(&self, count: usize) {
        gauge!("engine_active_symbols").set(count as f64);
    }

    pub fn orders_processed(&self) -> u64 {
        self.orders_processed.load(Ordering::Relaxed)
    }

    pub fn orders_rejected(&self) -> u64 {
        self.orders_rejected.load(Ordering::Relaxed)
    }

    pub fn trades_executed(&self) -> u64 {
        self.trades_executed.load(Ordering::Relaxed)
    }

    pub fn volume_traded(&self) -> u64 {
        self.volume_traded.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.orders_processed.store(0, Ordering::Relaxed);
        self.orders_rejected.store(0, Ordering::Relaxed);
        self.trades_executed.store(0, Ordering::Relaxed);
        self.volume_traded.store(0, Ordering::Relaxed);
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = EngineMetrics::new();
        metrics.record_order_processed();
        metrics.record_order_processed();
        metrics.record_order_rejected();
        metrics.record_trade(25);
        metrics.record_trade(75);

        assert_eq!(metrics.orders_processed(), 2);
        assert_eq!(metrics.orders_rejected(), 1);
        assert_eq!(metrics.trades_executed(), 2);
        assert_eq!(metrics.volume_traded(), 100);
    }

    #[test]
    fn test_reset() {
        let metrics = EngineMetrics::new();
        metrics.record_order_processed();
        metrics.record_trade(10);
        metrics.reset();

        assert_eq!(metrics.orders_processed(), 0);
        assert_eq!(metrics.trades_executed(), 0);
        assert_eq!(metrics.volume_traded(), 0);
    }
}
