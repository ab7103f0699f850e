//! Multi-Symbol Order Matching Engine
//!
//! A central limit order book engine for electronic trading systems: strict
//! price-time priority matching, limit/market/stop-loss orders, and a
//! multi-threaded dispatcher serving many symbols at once.
//!
//! # Features
//!
//! - **Price-Time Priority**: FIFO ordering within each price level, best
//!   price first across levels
//! - **Three Order Types**: limit, market (never rests), and stop-loss with
//!   a cascading trigger scan
//! - **Per-Symbol Isolation**: each book is independently serialized;
//!   different symbols match concurrently
//! - **Bounded Admission**: submissions flow through a bounded priority
//!   queue drained by a configurable worker pool
//! - **Observers**: synchronous trade and market-data callbacks with panic
//!   isolation and re-entrancy detection
//! - **Logical Snapshots**: serde-serializable export/import of every book
//!   with full invariant validation
//!
//! # Quick Start
//!
//! ```rust
//! use order_matching_engine::orderbook::{OrderBook, types::*};
//! use order_matching_engine::utils::time::MonotonicClock;
//! use std::sync::Arc;
//!
//! let clock = Arc::new(MonotonicClock::new());
//! let book = OrderBook::new("AAPL", Arc::clone(&clock));
//!
//! book.add_order(Order::limit("maker", "AAPL", Side::Sell, 15_000, 100, &clock)?)?;
//! let trades = book.add_order(Order::limit("taker", "AAPL", Side::Buy, 15_000, 40, &clock)?)?;
//!
//! assert_eq!(trades.len(), 1);
//! assert_eq!(trades[0].price, 15_000);
//! assert_eq!(book.best_ask(), Some(15_000));
//! # Ok::<(), order_matching_engine::EngineError>(())
//! ```
//!
//! Driving the full engine instead of a single book:
//!
//! ```rust
//! use order_matching_engine::engine::{EngineConfig, MatchingEngine};
//! use order_matching_engine::orderbook::types::{Order, Side};
//! use std::time::Duration;
//!
//! let engine = MatchingEngine::new(EngineConfig::default());
//! engine.add_symbol("AAPL")?;
//! engine.start();
//!
//! let order = Order::limit("alice", "AAPL", Side::Buy, 15_000, 100, engine.clock())?;
//! let order_id = engine.submit(order)?;
//! engine.wait_until_idle(Duration::from_secs(1));
//!
//! assert!(engine.get_order(&order_id).is_some());
//! engine.stop();
//! # Ok::<(), order_matching_engine::EngineError>(())
//! ```
//!
//! # Architecture
//!
//! Two layers with one narrow seam:
//!
//! 1. **[`orderbook`]** -- per-symbol state: `BTreeMap`-indexed price levels
//!    (FIFO queues with aggregate quantities), stop books keyed by trigger
//!    price, and the matching loop. One mutex per book is the unit of
//!    atomicity.
//! 2. **[`engine`]** -- the dispatcher: a read-biased symbol registry, a
//!    global order-id index, a bounded priority queue, and worker threads
//!    that apply requests to books and fan results out to observers.
//!
//! Timestamps and trade ids come from explicit, injectable sources
//! ([`utils::time::MonotonicClock`], per-book sequences) so behavior is
//! deterministic under test.

pub mod engine;
pub mod metrics;
pub mod orderbook;
pub mod utils;

// Re-export commonly used types
pub use engine::{EngineConfig, EngineStatistics, MatchingEngine, RiskValidator, SizeLimitValidator};
pub use metrics::EngineMetrics;
pub use orderbook::{
    error::{EngineError, EngineResult},
    types::{
        BookSnapshot, BookStats, EngineSnapshot, MarketData, MarketDataUpdate, Order, OrderId,
        OrderStatus, OrderType, Price, Quantity, Side, Timestamp, Trade, TradeId, UserId,
    },
    OrderBook,
};
pub use utils::time::MonotonicClock;
