//! Per-symbol order book: data structures and matching.
//!
//! This module contains the book-side half of the system -- price levels,
//! the bid/ask and stop indices, and the matching algorithm with its
//! stop-trigger cascade. The engine dispatcher in [`crate::engine`] routes
//! requests here.

pub mod book;
pub mod error;
pub mod matching;
pub mod operations;
pub mod price_level;
pub mod side_book;
pub mod stop_book;
pub mod types;

// Re-export main types for convenience
pub use book::OrderBook;
pub use error::{EngineError, EngineResult};
pub use price_level::PriceLevel;
pub use side_book::SideBook;
pub use stop_book::StopBook;
pub use types::{
    BookSnapshot, BookStats, EngineSnapshot, MarketData, MarketDataUpdate, Order, OrderId,
    OrderStatus, OrderType, Price, Quantity, RestingOrder, Side, Timestamp, Trade, TradeId, UserId,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::MonotonicClock;
    use std::sync::Arc;

    #[test]
    fn test_module_exports() {
        let clock = Arc::new(MonotonicClock::starting_at(1 << 60));
        let _book = OrderBook::new("TEST", Arc::clone(&clock));
        let _order = Order::limit("user", "TEST", Side::Buy, 10000, 100, &clock).unwrap();
        let _error = EngineError::NotRunning;
    }
}
