use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};

use crate::orderbook::error::{EngineError, EngineResult};
use crate::orderbook::types::{Order, Timestamp};

/// One queued submission. Higher priority pops first; equal priorities pop
/// in admission order.
#[derive(Debug)]
pub(crate) struct OrderRequest {
    pub order: Order,
    pub priority: i32,
    /// Admission sequence number; the FIFO tie-breaker
    pub sequence: u64,
    pub enqueued_at: Timestamp,
}

impl PartialEq for OrderRequest {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for OrderRequest {}

impl PartialOrd for OrderRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority first, then earlier admission
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Bounded priority queue feeding the worker pool.
///
/// Admission is non-blocking and fails fast with `QueueFull`; workers block
/// on the condvar when the queue is empty. During a draining shutdown,
/// `pop` keeps handing out requests until the heap is empty and only then
/// reports exhaustion.
#[derive(Debug)]
pub(crate) struct RequestQueue {
    heap: Mutex<BinaryHeap<OrderRequest>>,
    available: Condvar,
    capacity: usize,
    next_sequence: AtomicU64,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            available: Condvar::new(),
            capacity,
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn push(&self, order: Order, priority: i32, enqueued_at: Timestamp) -> EngineResult<()> {
        let mut heap = self.heap.lock();
        if heap.len() >= self.capacity {
            return Err(EngineError::QueueFull);
        }
        heap.push(OrderRequest {
            order,
            priority,
            sequence: self.next_sequence.fetch_add(1, AtomicOrdering::Relaxed),
            enqueued_at,
        });
        drop(heap);
        self.available.notify_one();
        Ok(())
    }

    /// Blocking pop. Returns `None` once `running` is cleared and the heap
    /// is empty (requests still queued at shutdown drain out first).
    pub fn pop(&self, running: &AtomicBool) -> Option<OrderRequest> {
        let mut heap = self.heap.lock();
        loop {
            if let Some(request) = heap.pop() {
                return Some(request);
            }
            if !running.load(AtomicOrdering::Acquire) {
                return None;
            }
            self.available.wait(&mut heap);
        }
    }

    /// Wake every blocked worker, e.g. at shutdown.
    pub fn notify_all(&self) {
        self.available.notify_all();
    }

    /// Drop all queued requests; used by discarding shutdowns.
    pub fn clear(&self) {
        self.heap.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::types::Side;
    use crate::utils::time::MonotonicClock;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn order(clock: &MonotonicClock) -> Order {
        Order::limit("user", "TEST", Side::Buy, 100, 10, clock).unwrap()
    }

    #[test]
    fn test_priority_then_fifo() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let queue = RequestQueue::new(16);
        let running = AtomicBool::new(true);

        let low = order(&clock);
        let first_normal = order(&clock);
        let second_normal = order(&clock);
        let high = order(&clock);
        let low_id = low.order_id.clone();
        let first_id = first_normal.order_id.clone();
        let second_id = second_normal.order_id.clone();
        let high_id = high.order_id.clone();

        queue.push(low, -1, clock.now_micros()).unwrap();
        queue.push(first_normal, 0, clock.now_micros()).unwrap();
        queue.push(second_normal, 0, clock.now_micros()).unwrap();
        queue.push(high, 5, clock.now_micros()).unwrap();

        let popped: Vec<String> = (0..4)
            .map(|_| queue.pop(&running).unwrap().order.order_id)
            .collect();
        assert_eq!(popped, vec![high_id, first_id, second_id, low_id]);
    }

    #[test]
    fn test_capacity_enforced() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let queue = RequestQueue::new(2);
        queue.push(order(&clock), 0, 1).unwrap();
        queue.push(order(&clock), 0, 2).unwrap();
        assert_eq!(
            queue.push(order(&clock), 0, 3),
            Err(EngineError::QueueFull)
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_pop_drains_after_shutdown() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let queue = RequestQueue::new(16);
        let running = AtomicBool::new(false);

        queue.push(order(&clock), 0, 1).unwrap();
        assert!(queue.pop(&running).is_some());
        assert!(queue.pop(&running).is_none());
    }

    #[test]
    fn test_blocked_pop_wakes_on_push() {
        let clock = MonotonicClock::starting_at(1 << 60);
        let queue = Arc::new(RequestQueue::new(16));
        let running = Arc::new(AtomicBool::new(true));

        let consumer = {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            thread::spawn(move || queue.pop(&running).map(|r| r.order.order_id))
        };

        thread::sleep(Duration::from_millis(20));
        let o = order(&clock);
        let id = o.order_id.clone();
        queue.push(o, 0, clock.now_micros()).unwrap();

        assert_eq!(consumer.join().unwrap(), Some(id));
    }

    #[test]
    fn test_blocked_pop_wakes_on_shutdown() {
        let queue = Arc::new(RequestQueue::new(16));
        let running = Arc::new(AtomicBool::new(true));

        let consumer = {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            thread::spawn(move || queue.pop(&running).is_none())
        };

        thread::sleep(Duration::from_millis(20));
        running.store(false, AtomicOrdering::Release);
        queue.notify_all();

        assert!(consumer.join().unwrap());
    }
}
