use std::collections::{BTreeMap, VecDeque};

use crate::orderbook::types::{Order, Price, Side};

/// Ordered index of untriggered stop-loss orders keyed by trigger price.
///
/// Buy stops fire in ascending trigger order (a buy stop triggers once the
/// last trade reaches or exceeds its trigger), sell stops in descending
/// order. Stops sharing a trigger price keep FIFO arrival order.
#[derive(Debug, Clone)]
pub struct StopBook {
    side: Side,
    levels: BTreeMap<Price, VecDeque<Order>>,
    count: usize,
}

impl StopBook {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            count: 0,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn insert(&mut self, order: Order) {
        debug_assert_eq!(order.side, self.side);
        debug_assert!(order.trigger_price > 0);
        self.levels
            .entry(order.trigger_price)
            .or_default()
            .push_back(order);
        self.count += 1;
    }

    /// Trigger price of the next stop to fire: lowest for buys, highest for
    /// sells.
    pub fn next_trigger(&self) -> Option<Price> {
        match self.side {
            Side::Buy => self.levels.keys().next().copied(),
            Side::Sell => self.levels.keys().next_back().copied(),
        }
    }

    /// Pop the next stop in firing order.
    pub fn pop_next(&mut self) -> Option<Order> {
        let trigger = self.next_trigger()?;
        let queue = self.levels.get_mut(&trigger)?;
        let order = queue.pop_front();
        if queue.is_empty() {
            self.levels.remove(&trigger);
        }
        if order.is_some() {
            self.count -= 1;
        }
        order
    }

    /// Remove a specific stop by trigger price and id.
    pub fn remove(&mut self, trigger_price: Price, order_id: &str) -> Option<Order> {
        let queue = self.levels.get_mut(&trigger_price)?;
        let pos = queue.iter().position(|o| o.order_id == order_id)?;
        let order = queue.remove(pos);
        if queue.is_empty() {
            self.levels.remove(&trigger_price);
        }
        if order.is_some() {
            self.count -= 1;
        }
        order
    }

    pub fn find(&self, trigger_price: Price, order_id: &str) -> Option<&Order> {
        self.levels
            .get(&trigger_price)?
            .iter()
            .find(|o| o.order_id == order_id)
    }

    /// Stops in firing order.
    pub fn orders_in_priority(&self) -> Vec<&Order> {
        let queues: Vec<&VecDeque<Order>> = match self.side {
            Side::Buy => self.levels.values().collect(),
            Side::Sell => self.levels.values().rev().collect(),
        };
        queues.into_iter().flatten().collect()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::MonotonicClock;

    fn stop(clock: &MonotonicClock, side: Side, trigger: Price) -> Order {
        Order::stop_loss("user", "TEST", side, trigger, 10, clock).unwrap()
    }

    #[test]
    fn test_buy_stops_fire_lowest_first() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let mut stops = StopBook::new(Side::Buy);
        stops.insert(stop(&clock, Side::Buy, 10200));
        stops.insert(stop(&clock, Side::Buy, 10000));
        stops.insert(stop(&clock, Side::Buy, 10100));

        assert_eq!(stops.next_trigger(), Some(10000));
        assert_eq!(stops.pop_next().unwrap().trigger_price, 10000);
        assert_eq!(stops.pop_next().unwrap().trigger_price, 10100);
        assert_eq!(stops.pop_next().unwrap().trigger_price, 10200);
        assert!(stops.pop_next().is_none());
    }

    #[test]
    fn test_sell_stops_fire_highest_first() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let mut stops = StopBook::new(Side::Sell);
        stops.insert(stop(&clock, Side::Sell, 9800));
        stops.insert(stop(&clock, Side::Sell, 9900));

        assert_eq!(stops.next_trigger(), Some(9900));
        assert_eq!(stops.pop_next().unwrap().trigger_price, 9900);
        assert_eq!(stops.pop_next().unwrap().trigger_price, 9800);
    }

    #[test]
    fn test_fifo_within_trigger() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let mut stops = StopBook::new(Side::Buy);
        let first = stop(&clock, Side::Buy, 10000);
        let first_id = first.order_id.clone();
        stops.insert(first);
        stops.insert(stop(&clock, Side::Buy, 10000));

        assert_eq!(stops.pop_next().unwrap().order_id, first_id);
        assert_eq!(stops.len(), 1);
    }

    #[test]
    fn test_remove_by_id() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let mut stops = StopBook::new(Side::Sell);
        let s = stop(&clock, Side::Sell, 9900);
        let id = s.order_id.clone();
        stops.insert(s);
        stops.insert(stop(&clock, Side::Sell, 9800));

        assert!(stops.remove(9900, &id).is_some());
        assert!(stops.remove(9900, &id).is_none());
        assert_eq!(stops.len(), 1);
        assert_eq!(stops.next_trigger(), Some(9800));
    }

    #[test]
    fn test_priority_listing() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let mut stops = StopBook::new(Side::Sell);
        stops.insert(stop(&clock, Side::Sell, 9700));
        stops.insert(stop(&clock, Side::Sell, 9900));
        stops.insert(stop(&clock, Side::Sell, 9800));

        let triggers: Vec<Price> = stops
            .orders_in_priority()
            .iter()
            .map(|o| o.trigger_price)
            .collect();
        assert_eq!(triggers, vec![9900, 9800, 9700]);
    }
}
