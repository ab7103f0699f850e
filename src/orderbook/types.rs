use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::orderbook::error::{EngineError, EngineResult};
use crate::utils::format_price;
use crate::utils::time::MonotonicClock;

pub type OrderId = String;
pub type UserId = String;
pub type Price = u64; // Price in ticks (e.g., 1 tick = 1 cent)
pub type Quantity = u64;
pub type TradeId = u64; // Monotonic per symbol, starting at 1
pub type Timestamp = u64; // Microseconds from the injected MonotonicClock

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Execute at the given price or better, rest otherwise
    Limit,
    /// Execute immediately at the best available price, never rest
    Market,
    /// Rest untriggered, convert to a market order when the trigger fires
    StopLoss,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Market => write!(f, "MARKET"),
            OrderType::StopLoss => write!(f, "STOP_LOSS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    PartialFill,
    Filled,
    Cancelled,
    Rejected,
    /// Transient state of a stop-loss between its trigger firing and the
    /// synthesized market order completing; never observable on a resting order
    Triggered,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::PartialFill => write!(f, "PARTIAL_FILL"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
            OrderStatus::Triggered => write!(f, "TRIGGERED"),
        }
    }
}

/// A trading order: immutable identity plus mutable execution state.
///
/// Construction validates every field invariant; the book only mutates
/// `remaining_quantity` and `status` through [`Order::fill`] and the
/// cancel/modify paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    /// Limit price in ticks; always 0 for market and stop-loss orders
    pub price: Price,
    pub original_quantity: Quantity,
    pub remaining_quantity: Quantity,
    pub status: OrderStatus,
    /// Strictly monotonic microsecond timestamp assigned at construction
    pub timestamp: Timestamp,
    /// Trigger price for stop-loss orders; 0 otherwise
    pub trigger_price: Price,
}

impl Order {
    /// Create a validated order with a caller-supplied id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: impl Into<OrderId>,
        user_id: impl Into<UserId>,
        symbol: impl Into<String>,
        order_type: OrderType,
        side: Side,
        price: Price,
        quantity: Quantity,
        trigger_price: Price,
        clock: &MonotonicClock,
    ) -> EngineResult<Self> {
        let order = Self {
            order_id: order_id.into(),
            user_id: user_id.into(),
            symbol: symbol.into(),
            order_type,
            side,
            price,
            original_quantity: quantity,
            remaining_quantity: quantity,
            status: OrderStatus::Pending,
            timestamp: clock.now_micros(),
            trigger_price,
        };
        order.validate()?;
        Ok(order)
    }

    /// Limit order with a minted UUID order id.
    pub fn limit(
        user_id: impl Into<UserId>,
        symbol: impl Into<String>,
        side: Side,
        price: Price,
        quantity: Quantity,
        clock: &MonotonicClock,
    ) -> EngineResult<Self> {
        Self::new(
            Uuid::new_v4().to_string(),
            user_id,
            symbol,
            OrderType::Limit,
            side,
            price,
            quantity,
            0,
            clock,
        )
    }

    /// Market order with a minted UUID order id.
    pub fn market(
        user_id: impl Into<UserId>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Quantity,
        clock: &MonotonicClock,
    ) -> EngineResult<Self> {
        Self::new(
            Uuid::new_v4().to_string(),
            user_id,
            symbol,
            OrderType::Market,
            side,
            0,
            quantity,
            0,
            clock,
        )
    }

    /// Stop-loss order with a minted UUID order id.
    pub fn stop_loss(
        user_id: impl Into<UserId>,
        symbol: impl Into<String>,
        side: Side,
        trigger_price: Price,
        quantity: Quantity,
        clock: &MonotonicClock,
    ) -> EngineResult<Self> {
        Self::new(
            Uuid::new_v4().to_string(),
            user_id,
            symbol,
            OrderType::StopLoss,
            side,
            0,
            quantity,
            trigger_price,
            clock,
        )
    }

    /// Check the field invariants without consuming the order.
    pub fn validate(&self) -> EngineResult<()> {
        if self.order_id.is_empty() {
            return Err(EngineError::InvalidOrder("order id must not be empty".into()));
        }
        if self.user_id.is_empty() {
            return Err(EngineError::InvalidOrder("user id must not be empty".into()));
        }
        if self.symbol.is_empty() {
            return Err(EngineError::InvalidOrder("symbol must not be empty".into()));
        }
        if self.original_quantity == 0 {
            return Err(EngineError::InvalidOrder("quantity must be positive".into()));
        }
        if self.remaining_quantity > self.original_quantity {
            return Err(EngineError::InvalidOrder(
                "remaining quantity exceeds original quantity".into(),
            ));
        }
        match self.order_type {
            OrderType::Limit => {
                if self.price == 0 {
                    return Err(EngineError::InvalidOrder(
                        "limit orders require a positive price".into(),
                    ));
                }
            }
            OrderType::Market => {
                if self.price != 0 {
                    return Err(EngineError::InvalidOrder(
                        "market orders carry price 0".into(),
                    ));
                }
            }
            OrderType::StopLoss => {
                if self.trigger_price == 0 {
                    return Err(EngineError::InvalidOrder(
                        "stop-loss orders require a positive trigger price".into(),
                    ));
                }
                if self.price != 0 {
                    return Err(EngineError::InvalidOrder(
                        "stop-loss orders carry price 0; the trigger sets the stop".into(),
                    ));
                }
            }
        }
        if self.order_type != OrderType::StopLoss && self.trigger_price != 0 {
            return Err(EngineError::InvalidOrder(
                "only stop-loss orders carry a trigger price".into(),
            ));
        }
        Ok(())
    }

    /// Reduce remaining quantity by `quantity` and update the status.
    pub fn fill(&mut self, quantity: Quantity) -> EngineResult<()> {
        if quantity == 0 || quantity > self.remaining_quantity {
            return Err(EngineError::InvalidFill {
                requested: quantity,
                remaining: self.remaining_quantity,
            });
        }

        self.remaining_quantity -= quantity;
        self.status = if self.remaining_quantity == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartialFill
        };

        Ok(())
    }

    /// Quantity already executed.
    pub fn filled_quantity(&self) -> Quantity {
        self.original_quantity - self.remaining_quantity
    }

    /// True iff the two orders could trade against each other: same symbol,
    /// opposite sides, both live with quantity, and either one is a market
    /// order or the limit prices cross.
    pub fn is_compatible_with(&self, other: &Order) -> bool {
        if self.symbol != other.symbol || self.side == other.side {
            return false;
        }
        if self.remaining_quantity == 0 || other.remaining_quantity == 0 {
            return false;
        }
        if self.status.is_terminal() || other.status.is_terminal() {
            return false;
        }
        if self.order_type == OrderType::Market || other.order_type == OrderType::Market {
            return true;
        }
        let (buy, sell) = match self.side {
            Side::Buy => (self, other),
            Side::Sell => (other, self),
        };
        buy.price >= sell.price
    }

    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.side == Side::Sell
    }

    pub fn is_market(&self) -> bool {
        self.order_type == OrderType::Market
    }

    pub fn is_stop_loss(&self) -> bool {
        self.order_type == OrderType::StopLoss
    }

    /// Convert a fired stop into its market phase, retaining the order id.
    pub(crate) fn into_triggered_market(self, timestamp: Timestamp) -> Order {
        Order {
            order_type: OrderType::Market,
            price: 0,
            trigger_price: 0,
            status: OrderStatus::Pending,
            timestamp,
            ..self
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} x{} @{} ({}/{} remaining, {})",
            self.order_id,
            self.order_type,
            self.side,
            self.symbol,
            self.original_quantity,
            self.price,
            self.remaining_quantity,
            self.original_quantity,
            self.status
        )
    }
}

/// An executed trade. Immutable once emitted; observers receive copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Unique and monotonic within the symbol
    pub trade_id: TradeId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub symbol: String,
    pub price: Price,
    pub quantity: Quantity,
    pub timestamp: Timestamp,
}

/// Per-symbol market data summary served by `get_market_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub last_price: Option<Price>,
    pub last_trade_time: Option<Timestamp>,
    pub total_volume: u64,
    pub total_trades: u64,
    pub spread: Option<Price>,
}

impl fmt::Display for MarketData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_opt = |p: Option<Price>| match p {
            Some(p) => format_price(p, 0.01),
            None => "-".to_string(),
        };
        write!(
            f,
            "{} bid={} ask={} last={} vol={} trades={}",
            self.symbol,
            fmt_opt(self.best_bid),
            fmt_opt(self.best_ask),
            fmt_opt(self.last_price),
            self.total_volume,
            self.total_trades
        )
    }
}

/// Payload delivered to market-data observers after each order application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDataUpdate {
    pub symbol: String,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub last_price: Option<Price>,
    pub timestamp: Timestamp,
}

/// Aggregate statistics for one order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookStats {
    pub symbol: String,
    pub resting_orders: usize,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub stop_orders: usize,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub spread: Option<Price>,
    pub last_trade_price: Option<Price>,
    pub total_trades: u64,
    pub total_volume: u64,
}

/// One resting order in a logical snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestingOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub order_type: OrderType,
    pub side: Side,
    pub price: Price,
    pub remaining_quantity: Quantity,
    pub timestamp: Timestamp,
    pub trigger_price: Price,
}

impl RestingOrder {
    pub(crate) fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            order_type: order.order_type,
            side: order.side,
            price: order.price,
            remaining_quantity: order.remaining_quantity,
            timestamp: order.timestamp,
            trigger_price: order.trigger_price,
        }
    }

    /// Rebuild a resting order for snapshot import. The restored order keeps
    /// only its unfilled remainder, so original and remaining coincide.
    pub(crate) fn to_order(&self, symbol: &str) -> EngineResult<Order> {
        let order = Order {
            order_id: self.order_id.clone(),
            user_id: self.user_id.clone(),
            symbol: symbol.to_string(),
            order_type: self.order_type,
            side: self.side,
            price: self.price,
            original_quantity: self.remaining_quantity,
            remaining_quantity: self.remaining_quantity,
            status: OrderStatus::Pending,
            timestamp: self.timestamp,
            trigger_price: self.trigger_price,
        };
        order.validate()?;
        Ok(order)
    }
}

/// Logical snapshot of one book: ordered resting lists plus counters.
///
/// Lists are priority-ordered (bids best-first descending, asks ascending,
/// buy stops ascending by trigger, sell stops descending) with FIFO order
/// preserved within a price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: String,
    pub bids: Vec<RestingOrder>,
    pub asks: Vec<RestingOrder>,
    pub buy_stops: Vec<RestingOrder>,
    pub sell_stops: Vec<RestingOrder>,
    pub last_trade_price: Option<Price>,
    pub last_trade_time: Option<Timestamp>,
    pub total_trades: u64,
    pub total_volume: u64,
    pub trade_seq: TradeId,
}

/// Whole-engine snapshot. The concrete encoding is the caller's choice;
/// every type here is serde-serializable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub books: Vec<BookSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> MonotonicClock {
        MonotonicClock::starting_at(1 << 60)
    }

    #[test]
    fn test_order_creation() {
        let clock = clock();
        let order = Order::limit("alice", "AAPL", Side::Buy, 15000, 100, &clock).unwrap();

        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.price, 15000);
        assert_eq!(order.original_quantity, 100);
        assert_eq!(order.remaining_quantity, 100);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.timestamp > 1 << 60);
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let clock = clock();
        let a = Order::limit("u", "AAPL", Side::Buy, 100, 1, &clock).unwrap();
        let b = Order::limit("u", "AAPL", Side::Buy, 100, 1, &clock).unwrap();
        assert!(b.timestamp > a.timestamp);
    }

    #[test]
    fn test_validation_failures() {
        let clock = clock();
        // empty identifiers
        assert!(Order::new("", "u", "AAPL", OrderType::Limit, Side::Buy, 1, 1, 0, &clock).is_err());
        assert!(Order::new("o", "", "AAPL", OrderType::Limit, Side::Buy, 1, 1, 0, &clock).is_err());
        assert!(Order::new("o", "u", "", OrderType::Limit, Side::Buy, 1, 1, 0, &clock).is_err());
        // zero quantity
        assert!(Order::limit("u", "AAPL", Side::Buy, 100, 0, &clock).is_err());
        // limit without price
        assert!(Order::new("o", "u", "AAPL", OrderType::Limit, Side::Buy, 0, 1, 0, &clock).is_err());
        // market with price
        assert!(
            Order::new("o", "u", "AAPL", OrderType::Market, Side::Buy, 10, 1, 0, &clock).is_err()
        );
        // stop without trigger
        assert!(
            Order::new("o", "u", "AAPL", OrderType::StopLoss, Side::Buy, 0, 1, 0, &clock).is_err()
        );
        // trigger on a non-stop
        assert!(
            Order::new("o", "u", "AAPL", OrderType::Limit, Side::Buy, 10, 1, 5, &clock).is_err()
        );
    }

    #[test]
    fn test_order_fill() {
        let clock = clock();
        let mut order = Order::limit("alice", "AAPL", Side::Buy, 15000, 100, &clock).unwrap();

        order.fill(30).unwrap();
        assert_eq!(order.filled_quantity(), 30);
        assert_eq!(order.remaining_quantity, 70);
        assert_eq!(order.status, OrderStatus::PartialFill);

        order.fill(70).unwrap();
        assert_eq!(order.remaining_quantity, 0);
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[test]
    fn test_overfill_and_zero_fill_errors() {
        let clock = clock();
        let mut order = Order::limit("alice", "AAPL", Side::Buy, 15000, 100, &clock).unwrap();
        assert_eq!(
            order.fill(150),
            Err(EngineError::InvalidFill {
                requested: 150,
                remaining: 100
            })
        );
        assert!(order.fill(0).is_err());
    }

    #[test]
    fn test_compatibility() {
        let clock = clock();
        let buy = Order::limit("a", "AAPL", Side::Buy, 100, 10, &clock).unwrap();
        let sell_at = Order::limit("b", "AAPL", Side::Sell, 100, 10, &clock).unwrap();
        let sell_above = Order::limit("b", "AAPL", Side::Sell, 101, 10, &clock).unwrap();
        let sell_other = Order::limit("b", "MSFT", Side::Sell, 100, 10, &clock).unwrap();
        let market_sell = Order::market("b", "AAPL", Side::Sell, 10, &clock).unwrap();

        assert!(buy.is_compatible_with(&sell_at));
        assert!(!buy.is_compatible_with(&sell_above));
        assert!(!buy.is_compatible_with(&sell_other));
        assert!(buy.is_compatible_with(&market_sell));
        // same side never matches
        let buy2 = Order::limit("c", "AAPL", Side::Buy, 200, 10, &clock).unwrap();
        assert!(!buy.is_compatible_with(&buy2));
    }

    #[test]
    fn test_terminal_orders_never_compatible() {
        let clock = clock();
        let buy = Order::limit("a", "AAPL", Side::Buy, 100, 10, &clock).unwrap();
        let mut sell = Order::limit("b", "AAPL", Side::Sell, 100, 10, &clock).unwrap();
        sell.status = OrderStatus::Cancelled;
        assert!(!buy.is_compatible_with(&sell));
    }

    #[test]
    fn test_triggered_market_conversion() {
        let clock = clock();
        let mut stop = Order::stop_loss("a", "AAPL", Side::Buy, 100, 10, &clock).unwrap();
        stop.status = OrderStatus::Triggered;
        let id = stop.order_id.clone();
        let market = stop.into_triggered_market(clock.now_micros());
        assert_eq!(market.order_id, id);
        assert_eq!(market.order_type, OrderType::Market);
        assert_eq!(market.price, 0);
        assert_eq!(market.trigger_price, 0);
        assert_eq!(market.status, OrderStatus::Pending);
    }

    #[test]
    fn test_order_serde_round_trip() {
        let clock = clock();
        let order = Order::stop_loss("alice", "AAPL", Side::Sell, 9500, 40, &clock).unwrap();
        let json = serde_json::to_string(&order).unwrap();
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(order, back);
    }
}
