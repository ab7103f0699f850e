//! The engine dispatcher: symbol registry, bounded priority queue, worker
//! pool, observers, and the periodic timeout sweep.
//!
//! Submission is admission-only: `submit` validates and enqueues, workers
//! apply requests to the per-symbol book. Within a symbol the effective
//! execution order is priority-then-admission-time; across symbols nothing
//! is guaranteed.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::engine::config::EngineConfig;
use crate::engine::queue::{OrderRequest, RequestQueue};
use crate::engine::risk::{RiskValidator, SizeLimitValidator};
use crate::metrics::EngineMetrics;
use crate::orderbook::book::OrderBook;
use crate::orderbook::error::{EngineError, EngineResult};
use crate::orderbook::types::{
    BookSnapshot, EngineSnapshot, MarketData, MarketDataUpdate, Order, OrderId, Price, Quantity,
    Side, Trade,
};
use crate::utils::time::MonotonicClock;

type TradeObserver = Box<dyn Fn(&Trade) + Send + Sync>;
type MarketDataObserver = Box<dyn Fn(&MarketDataUpdate) + Send + Sync>;

thread_local! {
    /// Set while observer callbacks run on this thread; submit/cancel/modify
    /// refuse re-entry instead of deadlocking on the book they came from.
    static IN_OBSERVER: Cell<bool> = const { Cell::new(false) };
}

fn in_observer() -> bool {
    IN_OBSERVER.with(Cell::get)
}

struct ObserverScope;

impl ObserverScope {
    fn enter() -> Self {
        IN_OBSERVER.with(|flag| flag.set(true));
        ObserverScope
    }
}

impl Drop for ObserverScope {
    fn drop(&mut self) {
        IN_OBSERVER.with(|flag| flag.set(false));
    }
}

/// State shared between the public handle and the worker threads.
struct EngineShared {
    config: EngineConfig,
    clock: Arc<MonotonicClock>,
    /// Symbol registry; read-biased, written only by add/remove/import/reset
    books: RwLock<HashMap<String, Arc<OrderBook>>>,
    /// Global order-id -> symbol index for cancel/modify/get_order routing.
    /// Entries outlive their orders until the cleanup sweep drops ids the
    /// owning book no longer remembers.
    order_index: DashMap<OrderId, String>,
    queue: RequestQueue,
    running: AtomicBool,
    in_flight: AtomicUsize,
    risk: Option<Box<dyn RiskValidator>>,
    trade_observers: RwLock<Vec<TradeObserver>>,
    market_observers: RwLock<Vec<MarketDataObserver>>,
    metrics: EngineMetrics,
    started_at: Mutex<Option<Instant>>,
    shutdown_lock: Mutex<()>,
    shutdown_cv: Condvar,
}

impl EngineShared {
    fn process(&self, request: OrderRequest) {
        let OrderRequest {
            order,
            priority,
            sequence,
            ..
        } = request;
        let order_id = order.order_id.clone();
        let symbol = order.symbol.clone();
        debug!(%order_id, %symbol, priority, sequence, "processing order request");

        // Re-check field invariants on the worker: the queue accepts orders
        // constructed elsewhere, and rejected orders must never touch a book.
        if let Err(e) = order.validate() {
            warn!(%order_id, error = %e, "order failed validation");
            self.metrics.record_order_rejected();
            self.order_index.remove(&order_id);
            return;
        }
        if let Some(risk) = &self.risk {
            if let Err(e) = risk.validate(&order) {
                warn!(%order_id, error = %e, "order failed risk check");
                self.metrics.record_order_rejected();
                self.order_index.remove(&order_id);
                return;
            }
        }

        // The read guard is held across the book call so remove_symbol
        // serializes behind in-flight work.
        let books = self.books.read();
        let Some(book) = books.get(&symbol) else {
            warn!(%order_id, %symbol, "symbol no longer registered");
            self.metrics.record_order_rejected();
            self.order_index.remove(&order_id);
            return;
        };

        match book.add_order(order) {
            Ok(trades) => {
                self.metrics.record_order_processed();
                self.order_index.insert(order_id, symbol);
                self.publish_execution(book, &trades);
            }
            Err(e) => {
                warn!(%order_id, error = %e, "book rejected order");
                self.metrics.record_order_rejected();
                // the book may remember the order as completed (an unfilled
                // market order, say); keep the index entry while it does
                if !book.knows(&order_id) {
                    self.order_index.remove(&order_id);
                }
            }
        }
    }

    /// Trade counters, trade observers, then one market-data update for the
    /// symbol. Observer panics are caught and logged; a committed trade is
    /// never rolled back.
    fn publish_execution(&self, book: &OrderBook, trades: &[Trade]) {
        for trade in trades {
            self.metrics.record_trade(trade.quantity);
        }

        if !trades.is_empty() {
            let observers = self.trade_observers.read();
            if !observers.is_empty() {
                let _scope = ObserverScope::enter();
                for trade in trades {
                    for observer in observers.iter() {
                        if catch_unwind(AssertUnwindSafe(|| observer(trade))).is_err() {
                            error!(
                                trade_id = trade.trade_id,
                                symbol = %trade.symbol,
                                "trade observer panicked"
                            );
                        }
                    }
                }
            }
        }

        if self.config.enable_market_data_broadcast {
            let update = MarketDataUpdate {
                symbol: book.symbol().to_string(),
                best_bid: book.best_bid(),
                best_ask: book.best_ask(),
                last_price: book.last_trade_price(),
                timestamp: self.clock.now_micros(),
            };
            let observers = self.market_observers.read();
            if !observers.is_empty() {
                let _scope = ObserverScope::enter();
                for observer in observers.iter() {
                    if catch_unwind(AssertUnwindSafe(|| observer(&update))).is_err() {
                        error!(symbol = %update.symbol, "market data observer panicked");
                    }
                }
            }
        }
    }

    /// Cancel timed-out orders, drop expired completed-order records, and
    /// prune index entries no book remembers.
    fn run_cleanup(&self) {
        let timeout_micros = self.config.order_timeout_seconds.saturating_mul(1_000_000);
        let cutoff = self.clock.now_micros().saturating_sub(timeout_micros);

        let books = self.books.read();
        for book in books.values() {
            let expired = book.expire_older_than(cutoff);
            if !expired.is_empty() {
                info!(
                    symbol = book.symbol(),
                    count = expired.len(),
                    "cancelled timed-out orders"
                );
            }
            book.prune_completed(cutoff);
        }
        self.order_index
            .retain(|id, symbol| books.get(symbol).is_some_and(|book| book.knows(id)));
    }
}

fn worker_loop(shared: Arc<EngineShared>) {
    debug!("worker started");
    while let Some(request) = shared.queue.pop(&shared.running) {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        shared.process(request);
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        shared.metrics.set_queue_depth(shared.queue.len());
    }
    debug!("worker exiting");
}

fn cleanup_loop(shared: Arc<EngineShared>) {
    let interval = shared.config.cleanup_interval();
    let mut guard = shared.shutdown_lock.lock();
    while shared.running.load(Ordering::Acquire) {
        shared.shutdown_cv.wait_for(&mut guard, interval);
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        shared.run_cleanup();
    }
    debug!("cleanup thread exiting");
}

/// Multi-symbol matching engine.
///
/// Owns one [`OrderBook`] per registered symbol and a worker pool draining a
/// bounded priority queue. All mutating calls are rejected while stopped;
/// dropping the engine stops it and joins every thread.
pub struct MatchingEngine {
    shared: Arc<EngineShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl MatchingEngine {
    pub fn new(config: EngineConfig) -> Self {
        let clock = Arc::new(MonotonicClock::new());
        let risk: Option<Box<dyn RiskValidator>> = if config.enable_risk_management {
            Some(Box::new(SizeLimitValidator::from_config(&config)))
        } else {
            None
        };
        Self::with_parts(config, clock, risk)
    }

    /// Build an engine with an injected clock and risk validator; the plain
    /// constructor wires the defaults. Tests seed the clock here.
    pub fn with_parts(
        config: EngineConfig,
        clock: Arc<MonotonicClock>,
        risk: Option<Box<dyn RiskValidator>>,
    ) -> Self {
        info!(
            workers = config.worker_count(),
            queue_capacity = config.max_queue_size,
            "creating matching engine"
        );
        Self {
            shared: Arc::new(EngineShared {
                queue: RequestQueue::new(config.max_queue_size),
                config,
                clock,
                books: RwLock::new(HashMap::new()),
                order_index: DashMap::new(),
                running: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                risk,
                trade_observers: RwLock::new(Vec::new()),
                market_observers: RwLock::new(Vec::new()),
                metrics: EngineMetrics::new(),
                started_at: Mutex::new(None),
                shutdown_lock: Mutex::new(()),
                shutdown_cv: Condvar::new(),
            }),
            workers: Mutex::new(Vec::new()),
            cleanup: Mutex::new(None),
        }
    }

    /// Spawn the worker pool and the cleanup thread. Idempotent.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.shared.started_at.lock() = Some(Instant::now());

        let worker_count = self.shared.config.worker_count();
        info!(workers = worker_count, "starting matching engine");

        let mut workers = self.workers.lock();
        for i in 0..worker_count {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("matching-worker-{i}"))
                .spawn(move || worker_loop(shared))
                .expect("spawn matching worker");
            workers.push(handle);
        }

        let shared = Arc::clone(&self.shared);
        *self.cleanup.lock() = Some(
            thread::Builder::new()
                .name("book-cleanup".to_string())
                .spawn(move || cleanup_loop(shared))
                .expect("spawn cleanup thread"),
        );
    }

    /// Stop the engine: drain (default) or discard the queue, wake and join
    /// every thread. Idempotent.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("stopping matching engine");

        if !self.shared.config.drain_queue_on_shutdown {
            self.shared.queue.clear();
        }
        self.shared.queue.notify_all();
        // Taking the lock first means the cleanup thread is either parked in
        // wait_for (the notify wakes it) or will re-check `running` before
        // its next wait; either way it exits promptly.
        {
            let _guard = self.shared.shutdown_lock.lock();
            self.shared.shutdown_cv.notify_all();
        }

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
        if let Some(handle) = self.cleanup.lock().take() {
            let _ = handle.join();
        }
        info!("matching engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Admit an order at default priority. Returns the order id; execution
    /// is asynchronous.
    pub fn submit(&self, order: Order) -> EngineResult<OrderId> {
        self.submit_with_priority(order, 0)
    }

    /// Admit an order. Higher priority executes first; ties run in
    /// admission order.
    pub fn submit_with_priority(&self, order: Order, priority: i32) -> EngineResult<OrderId> {
        if in_observer() {
            return Err(EngineError::ReentrantCall);
        }
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(EngineError::NotRunning);
        }
        if !self.shared.books.read().contains_key(&order.symbol) {
            return Err(EngineError::UnknownSymbol(order.symbol.clone()));
        }
        if order.is_stop_loss() && !self.shared.config.enable_stop_loss_orders {
            return Err(EngineError::StopLossDisabled);
        }
        order.validate()?;

        let order_id = order.order_id.clone();
        let symbol = order.symbol.clone();
        self.shared
            .queue
            .push(order, priority, self.shared.clock.now_micros())?;
        self.shared.order_index.insert(order_id.clone(), symbol);
        self.shared.metrics.set_queue_depth(self.shared.queue.len());
        debug!(%order_id, priority, "order admitted");
        Ok(order_id)
    }

    /// Admit a batch; admission is atomic per order, not per batch.
    pub fn submit_batch(&self, orders: Vec<Order>) -> Vec<EngineResult<OrderId>> {
        orders.into_iter().map(|order| self.submit(order)).collect()
    }

    /// Cancel a resting order on behalf of its owner.
    pub fn cancel(&self, order_id: &str, user_id: &str) -> EngineResult<()> {
        if in_observer() {
            return Err(EngineError::ReentrantCall);
        }
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(EngineError::NotRunning);
        }

        let book = self.lookup_book(order_id)?;
        self.check_ownership(&book, order_id, user_id)?;
        let cancelled = book.cancel(order_id)?;
        info!(
            order_id,
            user_id,
            symbol = book.symbol(),
            remaining = cancelled.remaining_quantity,
            "order cancelled"
        );
        Ok(())
    }

    /// Modify a resting order on behalf of its owner (cancel-and-replace;
    /// the order loses time priority and may trade immediately).
    pub fn modify(
        &self,
        order_id: &str,
        user_id: &str,
        new_price: Price,
        new_quantity: Quantity,
    ) -> EngineResult<()> {
        if in_observer() {
            return Err(EngineError::ReentrantCall);
        }
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(EngineError::NotRunning);
        }

        let book = self.lookup_book(order_id)?;
        self.check_ownership(&book, order_id, user_id)?;
        let trades = book.modify(order_id, new_price, new_quantity)?;
        info!(
            order_id,
            user_id,
            symbol = book.symbol(),
            trades = trades.len(),
            "order modified"
        );
        self.shared.publish_execution(&book, &trades);
        Ok(())
    }

    fn lookup_book(&self, order_id: &str) -> EngineResult<Arc<OrderBook>> {
        let symbol = self
            .shared
            .order_index
            .get(order_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::NotFound(order_id.to_string()))?;
        let books = self.shared.books.read();
        match books.get(&symbol) {
            Some(book) => Ok(Arc::clone(book)),
            None => {
                drop(books);
                self.shared.order_index.remove(order_id);
                Err(EngineError::NotFound(order_id.to_string()))
            }
        }
    }

    /// Ownership lives at the engine boundary; the book never sees users.
    fn check_ownership(&self, book: &OrderBook, order_id: &str, user_id: &str) -> EngineResult<()> {
        match book.get_order(order_id) {
            Some(order) if order.user_id != user_id => {
                Err(EngineError::NotOwner(order_id.to_string()))
            }
            Some(_) => Ok(()),
            None if book.completed_status(order_id).is_some() => {
                Err(EngineError::AlreadyTerminal(order_id.to_string()))
            }
            None => Err(EngineError::NotFound(order_id.to_string())),
        }
    }

    /// Snapshot of a resting order anywhere in the engine.
    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        let book = self.lookup_book(order_id).ok()?;
        book.get_order(order_id)
    }

    /// Every resting order for a user across all symbols, oldest first.
    pub fn get_user_orders(&self, user_id: &str) -> Vec<Order> {
        let books = self.shared.books.read();
        let mut orders: Vec<Order> = books
            .values()
            .flat_map(|book| book.get_user_orders(user_id))
            .collect();
        orders.sort_by_key(|o| o.timestamp);
        orders
    }

    pub fn get_market_data(&self, symbol: &str) -> EngineResult<MarketData> {
        let books = self.shared.books.read();
        let book = books
            .get(symbol)
            .ok_or_else(|| EngineError::UnknownSymbol(symbol.to_string()))?;
        Ok(market_data_of(book))
    }

    /// Market data for every registered symbol, sorted by symbol.
    pub fn all_market_data(&self) -> Vec<MarketData> {
        let books = self.shared.books.read();
        let mut data: Vec<MarketData> = books.values().map(|b| market_data_of(b)).collect();
        data.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        data
    }

    /// Aggregate depth per symbol for one side, best-first, `levels` deep.
    /// Unknown symbols are omitted.
    pub fn get_depth(
        &self,
        symbols: &[&str],
        levels: usize,
        side: Side,
    ) -> HashMap<String, Vec<(Price, Quantity)>> {
        let books = self.shared.books.read();
        symbols
            .iter()
            .filter_map(|&symbol| {
                books
                    .get(symbol)
                    .map(|book| (symbol.to_string(), book.depth(side, levels)))
            })
            .collect()
    }

    /// Register a new symbol with an empty book.
    pub fn add_symbol(&self, symbol: &str) -> EngineResult<()> {
        if symbol.is_empty() {
            return Err(EngineError::InvalidOrder("symbol must not be empty".into()));
        }
        let mut books = self.shared.books.write();
        if books.contains_key(symbol) {
            return Err(EngineError::SymbolExists(symbol.to_string()));
        }
        books.insert(
            symbol.to_string(),
            Arc::new(OrderBook::new(symbol, Arc::clone(&self.shared.clock))),
        );
        self.shared.metrics.set_active_symbols(books.len());
        info!(symbol, "symbol registered");
        Ok(())
    }

    /// Unregister a symbol; refused while any order rests on its book.
    pub fn remove_symbol(&self, symbol: &str) -> EngineResult<()> {
        let mut books = self.shared.books.write();
        let Some(book) = books.get(symbol) else {
            return Err(EngineError::UnknownSymbol(symbol.to_string()));
        };
        if !book.is_empty() {
            return Err(EngineError::SymbolNotEmpty(symbol.to_string()));
        }
        books.remove(symbol);
        self.shared.order_index.retain(|_, s| s.as_str() != symbol);
        self.shared.metrics.set_active_symbols(books.len());
        info!(symbol, "symbol removed");
        Ok(())
    }

    /// Registered symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.shared.books.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn statistics(&self) -> EngineStatistics {
        let uptime = (*self.shared.started_at.lock())
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let uptime_secs = uptime.as_secs_f64();
        let orders = self.shared.metrics.orders_processed();
        let trades = self.shared.metrics.trades_executed();
        let per_second = |count: u64| {
            if uptime_secs > 0.0 {
                count as f64 / uptime_secs
            } else {
                0.0
            }
        };

        EngineStatistics {
            total_orders_processed: orders,
            total_orders_rejected: self.shared.metrics.orders_rejected(),
            total_trades_executed: trades,
            total_volume_traded: self.shared.metrics.volume_traded(),
            uptime_seconds: uptime.as_secs(),
            active_symbols: self.shared.books.read().len(),
            queue_depth: self.shared.queue.len(),
            orders_per_second: per_second(orders),
            trades_per_second: per_second(trades),
        }
    }

    /// Block until the queue is empty and no worker holds a request, or the
    /// timeout elapses. Returns whether the engine went idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.queue.is_empty() && self.shared.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Subscribe to every executed trade, in emission order. Registrations
    /// are not revocable.
    pub fn subscribe_trades<F>(&self, observer: F)
    where
        F: Fn(&Trade) + Send + Sync + 'static,
    {
        self.shared.trade_observers.write().push(Box::new(observer));
    }

    /// Subscribe to per-symbol market-data updates.
    pub fn subscribe_market_data<F>(&self, observer: F)
    where
        F: Fn(&MarketDataUpdate) + Send + Sync + 'static,
    {
        self.shared
            .market_observers
            .write()
            .push(Box::new(observer));
    }

    /// Clear every book, index, and counter, keeping registered symbols.
    pub fn reset(&self) {
        let mut books = self.shared.books.write();
        for (symbol, book) in books.iter_mut() {
            *book = Arc::new(OrderBook::new(
                symbol.clone(),
                Arc::clone(&self.shared.clock),
            ));
        }
        self.shared.order_index.clear();
        self.shared.metrics.reset();
        info!("engine state reset");
    }

    /// Logical snapshot of every book, sorted by symbol.
    pub fn export_snapshot(&self) -> EngineSnapshot {
        let books = self.shared.books.read();
        let mut snapshots: Vec<BookSnapshot> = books.values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        EngineSnapshot {
            taken_at: Utc::now(),
            books: snapshots,
        }
    }

    /// Validate and load a snapshot, replacing all current books. Nothing
    /// changes unless every book snapshot passes validation.
    pub fn import_snapshot(&self, snapshot: &EngineSnapshot) -> EngineResult<()> {
        let mut restored: HashMap<String, Arc<OrderBook>> = HashMap::new();
        for book_snapshot in &snapshot.books {
            let book = OrderBook::from_snapshot(book_snapshot, Arc::clone(&self.shared.clock))?;
            if restored
                .insert(book_snapshot.symbol.clone(), Arc::new(book))
                .is_some()
            {
                return Err(EngineError::SnapshotInvalid(format!(
                    "duplicate symbol {}",
                    book_snapshot.symbol
                )));
            }
        }

        let mut books = self.shared.books.write();
        self.shared.order_index.clear();
        for (symbol, book) in &restored {
            for id in book.resting_ids() {
                self.shared.order_index.insert(id, symbol.clone());
            }
        }
        *books = restored;
        self.shared.metrics.set_active_symbols(books.len());
        info!(books = books.len(), "snapshot imported");
        Ok(())
    }

    /// The engine's timestamp source; orders submitted here should be
    /// constructed against it.
    pub fn clock(&self) -> &Arc<MonotonicClock> {
        &self.shared.clock
    }
}

impl Drop for MatchingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn market_data_of(book: &OrderBook) -> MarketData {
    let stats = book.stats();
    MarketData {
        symbol: stats.symbol,
        best_bid: stats.best_bid,
        best_ask: stats.best_ask,
        last_price: stats.last_trade_price,
        last_trade_time: book.last_trade_time(),
        total_volume: stats.total_volume,
        total_trades: stats.total_trades,
        spread: stats.spread,
    }
}

/// Engine-wide statistics. Fields are atomically consistent individually,
/// not as a cross-field snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub total_orders_processed: u64,
    pub total_orders_rejected: u64,
    pub total_trades_executed: u64,
    pub total_volume_traded: u64,
    pub uptime_seconds: u64,
    pub active_symbols: usize,
    pub queue_depth: usize,
    pub orders_per_second: f64,
    pub trades_per_second: f64,
}

impl fmt::Display for EngineStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "orders={} rejected={} trades={} volume={} symbols={} queue={} uptime={}s",
            self.total_orders_processed,
            self.total_orders_rejected,
            self.total_trades_executed,
            self.total_volume_traded,
            self.active_symbols,
            self.queue_depth,
            self.uptime_seconds
        )
    }
}
