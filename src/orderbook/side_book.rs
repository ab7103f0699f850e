use std::collections::BTreeMap;

use crate::orderbook::price_level::PriceLevel;
use crate::orderbook::types::{Order, Price, Quantity, Side};

/// Ordered index of price levels for one side of one symbol.
///
/// Backed by a `BTreeMap` so cancellation is O(log levels + level depth) and
/// depth queries are an in-order walk. "Best" is the highest price for bids
/// and the lowest for asks. Empty levels are removed the moment their queue
/// drains.
#[derive(Debug, Clone)]
pub struct SideBook {
    side: Side,
    levels: BTreeMap<Price, PriceLevel>,
}

impl SideBook {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn best_price(&self) -> Option<Price> {
        match self.side {
            Side::Buy => self.levels.keys().next_back().copied(),
            Side::Sell => self.levels.keys().next().copied(),
        }
    }

    pub fn best_level(&self) -> Option<&PriceLevel> {
        self.levels.get(&self.best_price()?)
    }

    pub fn best_level_mut(&mut self) -> Option<&mut PriceLevel> {
        let best = self.best_price()?;
        self.levels.get_mut(&best)
    }

    pub fn level(&self, price: Price) -> Option<&PriceLevel> {
        self.levels.get(&price)
    }

    pub fn level_mut(&mut self, price: Price) -> Option<&mut PriceLevel> {
        self.levels.get_mut(&price)
    }

    /// Rest an order at its price, creating the level on first use.
    pub fn enqueue(&mut self, order: Order) {
        debug_assert_eq!(order.side, self.side);
        self.levels
            .entry(order.price)
            .or_insert_with(|| PriceLevel::new(order.price))
            .enqueue(order);
    }

    /// Remove an order from its level, destroying the level if it drains.
    pub fn remove(&mut self, price: Price, order_id: &str) -> Option<Order> {
        let level = self.levels.get_mut(&price)?;
        let order = level.remove(order_id)?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(order)
    }

    pub fn remove_level_if_empty(&mut self, price: Price) {
        if self.levels.get(&price).is_some_and(|l| l.is_empty()) {
            self.levels.remove(&price);
        }
    }

    pub fn find(&self, price: Price, order_id: &str) -> Option<&Order> {
        self.levels.get(&price)?.find(order_id)
    }

    /// Levels best-first.
    pub fn levels_in_priority(&self) -> Vec<&PriceLevel> {
        match self.side {
            Side::Buy => self.levels.values().rev().collect(),
            Side::Sell => self.levels.values().collect(),
        }
    }

    /// Aggregate depth, best-first, truncated to `levels` price levels.
    pub fn depth(&self, levels: usize) -> Vec<(Price, Quantity)> {
        self.levels_in_priority()
            .into_iter()
            .take(levels)
            .map(|l| (l.price(), l.aggregate_quantity()))
            .collect()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn order_count(&self) -> usize {
        self.levels.values().map(PriceLevel::order_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::MonotonicClock;

    fn order(clock: &MonotonicClock, side: Side, price: Price, quantity: Quantity) -> Order {
        Order::limit("user", "TEST", side, price, quantity, clock).unwrap()
    }

    #[test]
    fn test_best_bid_is_highest() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let mut bids = SideBook::new(Side::Buy);
        bids.enqueue(order(&clock, Side::Buy, 9900, 10));
        bids.enqueue(order(&clock, Side::Buy, 10000, 10));
        bids.enqueue(order(&clock, Side::Buy, 9800, 10));

        assert_eq!(bids.best_price(), Some(10000));
    }

    #[test]
    fn test_best_ask_is_lowest() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let mut asks = SideBook::new(Side::Sell);
        asks.enqueue(order(&clock, Side::Sell, 10100, 10));
        asks.enqueue(order(&clock, Side::Sell, 10050, 10));
        asks.enqueue(order(&clock, Side::Sell, 10200, 10));

        assert_eq!(asks.best_price(), Some(10050));
    }

    #[test]
    fn test_depth_is_best_first() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let mut bids = SideBook::new(Side::Buy);
        bids.enqueue(order(&clock, Side::Buy, 9900, 10));
        bids.enqueue(order(&clock, Side::Buy, 10000, 20));
        bids.enqueue(order(&clock, Side::Buy, 10000, 5));
        bids.enqueue(order(&clock, Side::Buy, 9800, 30));

        assert_eq!(bids.depth(2), vec![(10000, 25), (9900, 10)]);
        assert_eq!(bids.depth(10).len(), 3);
    }

    #[test]
    fn test_remove_destroys_empty_level() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let mut asks = SideBook::new(Side::Sell);
        let o = order(&clock, Side::Sell, 10100, 10);
        let id = o.order_id.clone();
        asks.enqueue(o);

        assert_eq!(asks.level_count(), 1);
        assert!(asks.remove(10100, &id).is_some());
        assert_eq!(asks.level_count(), 0);
        assert_eq!(asks.best_price(), None);
    }

    #[test]
    fn test_order_count_spans_levels() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let mut bids = SideBook::new(Side::Buy);
        bids.enqueue(order(&clock, Side::Buy, 9900, 10));
        bids.enqueue(order(&clock, Side::Buy, 9900, 10));
        bids.enqueue(order(&clock, Side::Buy, 9800, 10));

        assert_eq!(bids.order_count(), 3);
        assert_eq!(bids.level_count(), 2);
    }
}
