use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::orderbook::error::{EngineError, EngineResult};
use crate::orderbook::price_level::PriceLevel;
use crate::orderbook::side_book::SideBook;
use crate::orderbook::stop_book::StopBook;
use crate::orderbook::types::{
    BookSnapshot, BookStats, Order, OrderId, OrderStatus, OrderType, Price, Quantity, RestingOrder,
    Side, Timestamp, Trade, TradeId, UserId,
};
use crate::utils::time::MonotonicClock;

/// Where a resting order lives inside the book, keyed by its sort price.
///
/// `by_id` maps every resting order to exactly one slot; the FIFO queue
/// behind the slot is the single owner of the `Order` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RestingSlot {
    Bid(Price),
    Ask(Price),
    BuyStop(Price),
    SellStop(Price),
}

/// Book state behind the per-symbol mutex.
///
/// An `add_order` call -- matching loop and stop cascade included -- runs to
/// completion while this struct is locked, which is the book's unit of
/// atomicity.
#[derive(Debug)]
pub(crate) struct BookInner {
    pub(crate) symbol: String,
    pub(crate) bids: SideBook,
    pub(crate) asks: SideBook,
    pub(crate) buy_stops: StopBook,
    pub(crate) sell_stops: StopBook,
    pub(crate) by_id: HashMap<OrderId, RestingSlot>,
    pub(crate) by_user: HashMap<UserId, HashSet<OrderId>>,
    /// Terminal outcomes of orders this book has finished with, kept so
    /// cancel/modify can answer `AlreadyTerminal` instead of `NotFound`;
    /// pruned by the periodic cleanup
    pub(crate) completed: HashMap<OrderId, (OrderStatus, Timestamp)>,
    pub(crate) last_trade_price: Price,
    pub(crate) last_trade_time: Timestamp,
    pub(crate) total_trades: u64,
    pub(crate) total_volume: u64,
    pub(crate) trade_seq: TradeId,
}

impl BookInner {
    fn new(symbol: String) -> Self {
        Self {
            symbol,
            bids: SideBook::new(Side::Buy),
            asks: SideBook::new(Side::Sell),
            buy_stops: StopBook::new(Side::Buy),
            sell_stops: StopBook::new(Side::Sell),
            by_id: HashMap::new(),
            by_user: HashMap::new(),
            completed: HashMap::new(),
            last_trade_price: 0,
            last_trade_time: 0,
            total_trades: 0,
            total_volume: 0,
            trade_seq: 0,
        }
    }

    pub(crate) fn register(&mut self, order: &Order, slot: RestingSlot) {
        self.by_id.insert(order.order_id.clone(), slot);
        self.by_user
            .entry(order.user_id.clone())
            .or_default()
            .insert(order.order_id.clone());
    }

    pub(crate) fn evict_indices(&mut self, order_id: &str, user_id: &str) {
        self.by_id.remove(order_id);
        if let Some(ids) = self.by_user.get_mut(user_id) {
            ids.remove(order_id);
            if ids.is_empty() {
                self.by_user.remove(user_id);
            }
        }
    }

    pub(crate) fn record_completed(&mut self, order_id: OrderId, status: OrderStatus, ts: Timestamp) {
        debug_assert!(status.is_terminal());
        self.completed.insert(order_id, (status, ts));
    }

    pub(crate) fn find_resting(&self, order_id: &str) -> Option<&Order> {
        match *self.by_id.get(order_id)? {
            RestingSlot::Bid(price) => self.bids.find(price, order_id),
            RestingSlot::Ask(price) => self.asks.find(price, order_id),
            RestingSlot::BuyStop(trigger) => self.buy_stops.find(trigger, order_id),
            RestingSlot::SellStop(trigger) => self.sell_stops.find(trigger, order_id),
        }
    }

    /// Pull a resting order out of its slot and the id/user indices.
    pub(crate) fn remove_resting(&mut self, order_id: &str) -> Option<Order> {
        let slot = *self.by_id.get(order_id)?;
        let order = match slot {
            RestingSlot::Bid(price) => self.bids.remove(price, order_id),
            RestingSlot::Ask(price) => self.asks.remove(price, order_id),
            RestingSlot::BuyStop(trigger) => self.buy_stops.remove(trigger, order_id),
            RestingSlot::SellStop(trigger) => self.sell_stops.remove(trigger, order_id),
        }?;
        self.evict_indices(&order.order_id, &order.user_id);
        Some(order)
    }

    pub(crate) fn resting_count(&self) -> usize {
        self.bids.order_count()
            + self.asks.order_count()
            + self.buy_stops.len()
            + self.sell_stops.len()
    }

    fn snapshot(&self) -> BookSnapshot {
        let side_entries = |book: &SideBook| -> Vec<RestingOrder> {
            book.levels_in_priority()
                .into_iter()
                .flat_map(PriceLevel::iter)
                .map(RestingOrder::from_order)
                .collect()
        };
        let stop_entries = |stops: &StopBook| -> Vec<RestingOrder> {
            stops
                .orders_in_priority()
                .into_iter()
                .map(RestingOrder::from_order)
                .collect()
        };

        BookSnapshot {
            symbol: self.symbol.clone(),
            bids: side_entries(&self.bids),
            asks: side_entries(&self.asks),
            buy_stops: stop_entries(&self.buy_stops),
            sell_stops: stop_entries(&self.sell_stops),
            last_trade_price: (self.last_trade_price > 0).then_some(self.last_trade_price),
            last_trade_time: (self.last_trade_time > 0).then_some(self.last_trade_time),
            total_trades: self.total_trades,
            total_volume: self.total_volume,
            trade_seq: self.trade_seq,
        }
    }

    fn restore(snapshot: &BookSnapshot) -> EngineResult<Self> {
        fn invalid(msg: String) -> EngineError {
            EngineError::SnapshotInvalid(msg)
        }

        /// Validate one priority-ordered resting list and load it. Bids and
        /// sell stops descend by key, asks and buy stops ascend; within a
        /// key, timestamps strictly ascend (FIFO).
        #[allow(clippy::too_many_arguments)]
        fn restore_list(
            entries: &[RestingOrder],
            symbol: &str,
            inner: &mut BookInner,
            seen: &mut HashSet<OrderId>,
            side: Side,
            order_type: OrderType,
            list: &str,
            descending: bool,
        ) -> EngineResult<()> {
            let mut prev_key: Option<Price> = None;
            let mut prev_ts_at_key: Option<Timestamp> = None;
            for entry in entries {
                if entry.side != side {
                    return Err(invalid(format!("{list}: wrong side on {}", entry.order_id)));
                }
                if entry.order_type != order_type {
                    return Err(invalid(format!(
                        "{list}: unexpected {} order {}",
                        entry.order_type, entry.order_id
                    )));
                }
                let key = if order_type == OrderType::StopLoss {
                    entry.trigger_price
                } else {
                    entry.price
                };
                match prev_key {
                    Some(prev) if prev == key => {
                        if prev_ts_at_key.is_some_and(|ts| entry.timestamp <= ts) {
                            return Err(invalid(format!(
                                "{list}: time priority violated at price {key}"
                            )));
                        }
                    }
                    Some(prev) => {
                        let ordered = if descending { key < prev } else { key > prev };
                        if !ordered {
                            return Err(invalid(format!("{list}: price order violated at {key}")));
                        }
                        prev_ts_at_key = None;
                    }
                    None => {}
                }
                prev_key = Some(key);
                prev_ts_at_key = Some(entry.timestamp);

                if !seen.insert(entry.order_id.clone()) {
                    return Err(invalid(format!("duplicate order id {}", entry.order_id)));
                }
                let order = entry
                    .to_order(symbol)
                    .map_err(|e| invalid(format!("{list}: {e}")))?;
                let slot = match (order_type, side) {
                    (OrderType::StopLoss, Side::Buy) => RestingSlot::BuyStop(key),
                    (OrderType::StopLoss, Side::Sell) => RestingSlot::SellStop(key),
                    (_, Side::Buy) => RestingSlot::Bid(key),
                    (_, Side::Sell) => RestingSlot::Ask(key),
                };
                inner.register(&order, slot);
                match slot {
                    RestingSlot::Bid(_) => inner.bids.enqueue(order),
                    RestingSlot::Ask(_) => inner.asks.enqueue(order),
                    RestingSlot::BuyStop(_) => inner.buy_stops.insert(order),
                    RestingSlot::SellStop(_) => inner.sell_stops.insert(order),
                }
            }
            Ok(())
        }

        if snapshot.symbol.is_empty() {
            return Err(invalid("empty symbol".into()));
        }

        let symbol = snapshot.symbol.as_str();
        let mut inner = BookInner::new(snapshot.symbol.clone());
        let mut seen: HashSet<OrderId> = HashSet::new();

        restore_list(
            &snapshot.bids,
            symbol,
            &mut inner,
            &mut seen,
            Side::Buy,
            OrderType::Limit,
            "bids",
            true,
        )?;
        restore_list(
            &snapshot.asks,
            symbol,
            &mut inner,
            &mut seen,
            Side::Sell,
            OrderType::Limit,
            "asks",
            false,
        )?;
        restore_list(
            &snapshot.buy_stops,
            symbol,
            &mut inner,
            &mut seen,
            Side::Buy,
            OrderType::StopLoss,
            "buy_stops",
            false,
        )?;
        restore_list(
            &snapshot.sell_stops,
            symbol,
            &mut inner,
            &mut seen,
            Side::Sell,
            OrderType::StopLoss,
            "sell_stops",
            true,
        )?;

        inner.last_trade_price = snapshot.last_trade_price.unwrap_or(0);
        inner.last_trade_time = snapshot.last_trade_time.unwrap_or(0);
        inner.total_trades = snapshot.total_trades;
        inner.total_volume = snapshot.total_volume;
        inner.trade_seq = snapshot.trade_seq;

        inner.verify_integrity().map_err(invalid)?;
        Ok(inner)
    }

    /// Structural self-check: index bijection, aggregate sums, user index
    /// consistency, no crossed book. Used by snapshot import and tests.
    pub(crate) fn verify_integrity(&self) -> Result<(), String> {
        for (id, slot) in &self.by_id {
            let order = self
                .find_resting(id)
                .ok_or_else(|| format!("by_id slot for {id} resolves to nothing"))?;
            if &order.order_id != id {
                return Err(format!("slot for {id} holds {}", order.order_id));
            }
            if order.remaining_quantity == 0 || order.status.is_terminal() {
                return Err(format!("resting order {id} is dead ({})", order.status));
            }
            let user_ok = self
                .by_user
                .get(&order.user_id)
                .is_some_and(|ids| ids.contains(id));
            if !user_ok {
                return Err(format!("by_user missing {id}"));
            }
            let side_ok = match slot {
                RestingSlot::Bid(_) | RestingSlot::BuyStop(_) => order.side == Side::Buy,
                RestingSlot::Ask(_) | RestingSlot::SellStop(_) => order.side == Side::Sell,
            };
            if !side_ok {
                return Err(format!("order {id} rests on the wrong side"));
            }
        }

        for ids in self.by_user.values() {
            for id in ids {
                if !self.by_id.contains_key(id) {
                    return Err(format!("by_user entry {id} missing from by_id"));
                }
            }
        }

        if self.by_id.len() != self.resting_count() {
            return Err(format!(
                "by_id has {} entries but books hold {} orders",
                self.by_id.len(),
                self.resting_count()
            ));
        }

        for book in [&self.bids, &self.asks] {
            for level in book.levels_in_priority() {
                let sum: Quantity = level.iter().map(|o| o.remaining_quantity).sum();
                if sum != level.aggregate_quantity() {
                    return Err(format!(
                        "aggregate mismatch at price {}: {} vs {}",
                        level.price(),
                        level.aggregate_quantity(),
                        sum
                    ));
                }
            }
        }

        if let (Some(bid), Some(ask)) = (self.bids.best_price(), self.asks.best_price()) {
            if bid >= ask {
                return Err(format!("crossed book: bid {bid} >= ask {ask}"));
            }
        }

        Ok(())
    }
}

/// Per-symbol limit order book with price-time priority matching.
///
/// The public handle serializes all access through one mutex; different
/// symbols' books therefore run concurrently while a single book's
/// operations are strictly ordered.
#[derive(Debug)]
pub struct OrderBook {
    symbol: String,
    clock: Arc<MonotonicClock>,
    inner: Mutex<BookInner>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>, clock: Arc<MonotonicClock>) -> Self {
        let symbol = symbol.into();
        info!(%symbol, "creating order book");
        Self {
            inner: Mutex::new(BookInner::new(symbol.clone())),
            symbol,
            clock,
        }
    }

    /// Restore a book from a logical snapshot, validating every invariant.
    ///
    /// Also raises the clock floor past the newest restored timestamp so new
    /// orders keep strictly increasing timestamps.
    pub fn from_snapshot(snapshot: &BookSnapshot, clock: Arc<MonotonicClock>) -> EngineResult<Self> {
        let inner = BookInner::restore(snapshot)?;
        let newest = snapshot
            .bids
            .iter()
            .chain(&snapshot.asks)
            .chain(&snapshot.buy_stops)
            .chain(&snapshot.sell_stops)
            .map(|e| e.timestamp)
            .max();
        if let Some(ts) = newest {
            clock.observe(ts);
        }
        clock.observe(snapshot.last_trade_time.unwrap_or(0));
        info!(symbol = %snapshot.symbol, orders = inner.resting_count(), "restored order book from snapshot");
        Ok(Self {
            symbol: snapshot.symbol.clone(),
            clock,
            inner: Mutex::new(inner),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Apply an incoming order: match, rest the remainder (limit), discard
    /// it (market), or park it (stop-loss). Returns trades earliest-first,
    /// including any produced by the stop-trigger cascade.
    pub fn add_order(&self, order: Order) -> EngineResult<Vec<Trade>> {
        self.inner.lock().apply(order, &self.clock)
    }

    /// Cancel a resting order. Terminal orders answer `AlreadyTerminal`.
    pub fn cancel(&self, order_id: &str) -> EngineResult<Order> {
        self.inner.lock().cancel(order_id, self.clock.now_micros())
    }

    /// Cancel-and-replace. A real change loses time priority and may trade;
    /// `new_price`/`new_quantity` of 0 keep the current values.
    pub fn modify(
        &self,
        order_id: &str,
        new_price: Price,
        new_quantity: Quantity,
    ) -> EngineResult<Vec<Trade>> {
        self.inner.lock().modify(order_id, new_price, new_quantity, &self.clock)
    }

    /// Snapshot of a resting order, if the id is currently resting.
    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        self.inner.lock().find_resting(order_id).cloned()
    }

    /// Final status of an order this book has finished with.
    pub fn completed_status(&self, order_id: &str) -> Option<OrderStatus> {
        self.inner.lock().completed.get(order_id).map(|&(s, _)| s)
    }

    /// Whether the id is resting here or remembered as completed.
    pub fn knows(&self, order_id: &str) -> bool {
        let inner = self.inner.lock();
        inner.by_id.contains_key(order_id) || inner.completed.contains_key(order_id)
    }

    /// Resting orders for one user, oldest first.
    pub fn get_user_orders(&self, user_id: &str) -> Vec<Order> {
        let inner = self.inner.lock();
        let mut orders: Vec<Order> = inner
            .by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.find_resting(id).cloned())
            .collect();
        orders.sort_by_key(|o| o.timestamp);
        orders
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.inner.lock().bids.best_price()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.inner.lock().asks.best_price()
    }

    pub fn spread(&self) -> Option<Price> {
        let inner = self.inner.lock();
        match (inner.asks.best_price(), inner.bids.best_price()) {
            (Some(ask), Some(bid)) if ask > bid => Some(ask - bid),
            _ => None,
        }
    }

    pub fn last_trade_price(&self) -> Option<Price> {
        let price = self.inner.lock().last_trade_price;
        (price > 0).then_some(price)
    }

    pub fn last_trade_time(&self) -> Option<Timestamp> {
        let ts = self.inner.lock().last_trade_time;
        (ts > 0).then_some(ts)
    }

    /// Aggregate depth for one side, best-first, up to `levels` price levels.
    pub fn depth(&self, side: Side, levels: usize) -> Vec<(Price, Quantity)> {
        let inner = self.inner.lock();
        match side {
            Side::Buy => inner.bids.depth(levels),
            Side::Sell => inner.asks.depth(levels),
        }
    }

    pub fn stats(&self) -> BookStats {
        let inner = self.inner.lock();
        let (best_bid, best_ask) = (inner.bids.best_price(), inner.asks.best_price());
        BookStats {
            symbol: self.symbol.clone(),
            resting_orders: inner.by_id.len(),
            bid_levels: inner.bids.level_count(),
            ask_levels: inner.asks.level_count(),
            stop_orders: inner.buy_stops.len() + inner.sell_stops.len(),
            best_bid,
            best_ask,
            spread: match (best_bid, best_ask) {
                (Some(b), Some(a)) if a > b => Some(a - b),
                _ => None,
            },
            last_trade_price: (inner.last_trade_price > 0).then_some(inner.last_trade_price),
            total_trades: inner.total_trades,
            total_volume: inner.total_volume,
        }
    }

    /// Number of resting orders, stops included.
    pub fn order_count(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    /// True when nothing rests here, stops included.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_id.is_empty()
    }

    /// Cancel every resting order older than `cutoff`; returns the cancelled
    /// orders. Used by the engine's periodic timeout sweep.
    pub fn expire_older_than(&self, cutoff: Timestamp) -> Vec<Order> {
        self.inner.lock().expire_older_than(cutoff, self.clock.now_micros())
    }

    /// Drop completed-order records older than `cutoff`.
    pub fn prune_completed(&self, cutoff: Timestamp) {
        self.inner.lock().completed.retain(|_, &mut (_, ts)| ts >= cutoff);
    }

    /// Structural self-check; see [`BookInner::verify_integrity`].
    pub fn verify_integrity(&self) -> Result<(), String> {
        self.inner.lock().verify_integrity()
    }

    pub fn snapshot(&self) -> BookSnapshot {
        self.inner.lock().snapshot()
    }

    /// Resting order ids, for index rebuilds.
    pub fn resting_ids(&self) -> Vec<OrderId> {
        self.inner.lock().by_id.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::types::Side;

    fn book() -> OrderBook {
        OrderBook::new("TEST", Arc::new(MonotonicClock::starting_at(1 << 60)))
    }

    fn clock_of(book: &OrderBook) -> Arc<MonotonicClock> {
        Arc::clone(&book.clock)
    }

    fn limit(book: &OrderBook, side: Side, price: Price, quantity: Quantity) -> Order {
        Order::limit("user", "TEST", side, price, quantity, &clock_of(book)).unwrap()
    }

    #[test]
    fn test_empty_book() {
        let book = book();
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.spread(), None);
        assert_eq!(book.order_count(), 0);
        assert!(book.is_empty());
    }

    #[test]
    fn test_add_limit_orders_rest() {
        let book = book();

        book.add_order(limit(&book, Side::Buy, 10000, 100)).unwrap();
        book.add_order(limit(&book, Side::Sell, 10100, 100)).unwrap();

        assert_eq!(book.best_bid(), Some(10000));
        assert_eq!(book.best_ask(), Some(10100));
        assert_eq!(book.spread(), Some(100));
        assert_eq!(book.order_count(), 2);
        book.verify_integrity().unwrap();
    }

    #[test]
    fn test_symbol_mismatch_rejected() {
        let book = book();
        let clock = clock_of(&book);
        let foreign = Order::limit("user", "OTHER", Side::Buy, 100, 10, &clock).unwrap();
        assert!(matches!(
            book.add_order(foreign),
            Err(EngineError::SymbolMismatch { .. })
        ));
    }

    #[test]
    fn test_matching_updates_stats() {
        let book = book();
        book.add_order(limit(&book, Side::Sell, 10000, 100)).unwrap();
        let trades = book.add_order(limit(&book, Side::Buy, 10000, 50)).unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, 10000);
        assert_eq!(trades[0].quantity, 50);
        assert_eq!(trades[0].trade_id, 1);

        let stats = book.stats();
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.total_volume, 50);
        assert_eq!(stats.last_trade_price, Some(10000));
        assert_eq!(book.last_trade_price(), Some(10000));
        assert_eq!(book.order_count(), 1);
        book.verify_integrity().unwrap();
    }

    #[test]
    fn test_get_order_and_user_orders() {
        let book = book();
        let order = limit(&book, Side::Buy, 9900, 10);
        let id = order.order_id.clone();
        book.add_order(order).unwrap();

        let fetched = book.get_order(&id).unwrap();
        assert_eq!(fetched.order_id, id);
        assert_eq!(fetched.status, OrderStatus::Pending);

        let user_orders = book.get_user_orders("user");
        assert_eq!(user_orders.len(), 1);
        assert!(book.get_user_orders("nobody").is_empty());
    }

    #[test]
    fn test_depth_both_sides() {
        let book = book();
        book.add_order(limit(&book, Side::Buy, 9900, 10)).unwrap();
        book.add_order(limit(&book, Side::Buy, 9950, 20)).unwrap();
        book.add_order(limit(&book, Side::Sell, 10050, 5)).unwrap();
        book.add_order(limit(&book, Side::Sell, 10100, 15)).unwrap();

        assert_eq!(book.depth(Side::Buy, 10), vec![(9950, 20), (9900, 10)]);
        assert_eq!(book.depth(Side::Sell, 1), vec![(10050, 5)]);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let book = book();
        let clock = clock_of(&book);
        book.add_order(limit(&book, Side::Buy, 9900, 10)).unwrap();
        book.add_order(limit(&book, Side::Buy, 9900, 20)).unwrap();
        book.add_order(limit(&book, Side::Sell, 10100, 5)).unwrap();
        book.add_order(Order::stop_loss("user", "TEST", Side::Sell, 9800, 7, &clock).unwrap())
            .unwrap();
        // one trade so counters are non-trivial
        book.add_order(limit(&book, Side::Buy, 10100, 5)).unwrap();

        let snapshot = book.snapshot();
        assert_eq!(snapshot.bids.len(), 2);
        assert_eq!(snapshot.asks.len(), 0);
        assert_eq!(snapshot.sell_stops.len(), 1);
        assert_eq!(snapshot.total_trades, 1);

        let restored = OrderBook::from_snapshot(&snapshot, clock).unwrap();
        restored.verify_integrity().unwrap();
        assert_eq!(restored.best_bid(), Some(9900));
        assert_eq!(restored.last_trade_price(), Some(10100));
        assert_eq!(restored.order_count(), 3);
        assert_eq!(restored.snapshot(), snapshot);
    }

    #[test]
    fn test_snapshot_rejects_duplicate_ids() {
        let book = book();
        book.add_order(limit(&book, Side::Buy, 9900, 10)).unwrap();
        let mut snapshot = book.snapshot();
        snapshot.bids.push(snapshot.bids[0].clone());

        let err = OrderBook::from_snapshot(&snapshot, clock_of(&book)).unwrap_err();
        assert!(matches!(err, EngineError::SnapshotInvalid(_)));
    }

    #[test]
    fn test_snapshot_rejects_crossed_book() {
        let book = book();
        book.add_order(limit(&book, Side::Buy, 9900, 10)).unwrap();
        book.add_order(limit(&book, Side::Sell, 10000, 10)).unwrap();
        let mut snapshot = book.snapshot();
        snapshot.asks[0].price = 9800; // crosses the 9900 bid

        let err = OrderBook::from_snapshot(&snapshot, clock_of(&book)).unwrap_err();
        assert!(matches!(err, EngineError::SnapshotInvalid(_)));
    }

    #[test]
    fn test_snapshot_rejects_resting_market_order() {
        let book = book();
        book.add_order(limit(&book, Side::Buy, 9900, 10)).unwrap();
        let mut snapshot = book.snapshot();
        snapshot.bids[0].order_type = OrderType::Market;
        snapshot.bids[0].price = 0;

        let err = OrderBook::from_snapshot(&snapshot, clock_of(&book)).unwrap_err();
        assert!(matches!(err, EngineError::SnapshotInvalid(_)));
    }

    #[test]
    fn test_restored_clock_stays_monotonic() {
        let book = book();
        book.add_order(limit(&book, Side::Buy, 9900, 10)).unwrap();
        let snapshot = book.snapshot();
        let restored_ts = snapshot.bids[0].timestamp;

        let fresh_clock = Arc::new(MonotonicClock::starting_at(0));
        let restored = OrderBook::from_snapshot(&snapshot, Arc::clone(&fresh_clock)).unwrap();
        let order =
            Order::limit("user", "TEST", Side::Buy, 9800, 1, &fresh_clock).unwrap();
        assert!(order.timestamp > restored_ts);
        restored.add_order(order).unwrap();
        restored.verify_integrity().unwrap();
    }
}
