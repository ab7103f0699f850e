//! Cancel, modify, and timeout-expiry paths.
//!
//! Modification is cancel-and-replace: any real change forfeits time
//! priority and re-enters through the normal matching path, so it may trade.

use tracing::{debug, info};

use crate::orderbook::book::{BookInner, RestingSlot};
use crate::orderbook::error::{EngineError, EngineResult};
use crate::orderbook::types::{Order, OrderId, OrderStatus, Price, Quantity, Timestamp, Trade};
use crate::utils::time::MonotonicClock;

impl BookInner {
    fn lookup_error(&self, order_id: &str) -> EngineError {
        if self.completed.contains_key(order_id) {
            EngineError::AlreadyTerminal(order_id.to_string())
        } else {
            EngineError::NotFound(order_id.to_string())
        }
    }

    /// Remove a resting order and mark it cancelled.
    pub(crate) fn cancel(&mut self, order_id: &str, now: Timestamp) -> EngineResult<Order> {
        if !self.by_id.contains_key(order_id) {
            return Err(self.lookup_error(order_id));
        }
        let mut order = self
            .remove_resting(order_id)
            .ok_or_else(|| EngineError::NotFound(order_id.to_string()))?;
        order.status = OrderStatus::Cancelled;
        self.record_completed(order.order_id.clone(), OrderStatus::Cancelled, now);
        debug!(order_id, symbol = %self.symbol, remaining = order.remaining_quantity, "order cancelled");
        Ok(order)
    }

    /// Cancel-and-replace under the same order id.
    ///
    /// `new_price` re-prices a limit order (or re-keys a stop's trigger);
    /// `new_quantity` becomes the replacement's full quantity. Zero means
    /// "keep the current value"; if nothing changes the call is a no-op.
    pub(crate) fn modify(
        &mut self,
        order_id: &str,
        new_price: Price,
        new_quantity: Quantity,
        clock: &MonotonicClock,
    ) -> EngineResult<Vec<Trade>> {
        let Some(&slot) = self.by_id.get(order_id) else {
            return Err(self.lookup_error(order_id));
        };
        let current = self
            .find_resting(order_id)
            .ok_or_else(|| EngineError::NotFound(order_id.to_string()))?;

        let (current_key, is_stop) = match slot {
            RestingSlot::Bid(price) | RestingSlot::Ask(price) => (price, false),
            RestingSlot::BuyStop(trigger) | RestingSlot::SellStop(trigger) => (trigger, true),
        };
        let price_changed = new_price > 0 && new_price != current_key;
        let quantity_changed = new_quantity > 0 && new_quantity != current.remaining_quantity;
        if !price_changed && !quantity_changed {
            return Err(EngineError::NotModified);
        }
        if quantity_changed && new_quantity <= current.filled_quantity() {
            return Err(EngineError::InvalidModification(format!(
                "quantity {new_quantity} does not exceed the {} already filled",
                current.filled_quantity()
            )));
        }

        let old = self
            .remove_resting(order_id)
            .ok_or_else(|| EngineError::NotFound(order_id.to_string()))?;
        let quantity = if quantity_changed {
            new_quantity
        } else {
            old.remaining_quantity
        };
        let (price, trigger_price) = if is_stop {
            (0, if price_changed { new_price } else { old.trigger_price })
        } else {
            (if price_changed { new_price } else { old.price }, 0)
        };

        debug!(
            order_id,
            symbol = %self.symbol,
            price,
            trigger_price,
            quantity,
            "replacing order"
        );
        let replacement = Order::new(
            old.order_id,
            old.user_id,
            old.symbol,
            old.order_type,
            old.side,
            price,
            quantity,
            trigger_price,
            clock,
        )
        .map_err(|e| EngineError::InvalidModification(e.to_string()))?;

        self.apply(replacement, clock)
    }

    /// Cancel every resting order older than `cutoff`. The timeout sweep
    /// calls this periodically; stops age out like any other resting order.
    pub(crate) fn expire_older_than(&mut self, cutoff: Timestamp, now: Timestamp) -> Vec<Order> {
        let ids: Vec<OrderId> = self.by_id.keys().cloned().collect();
        let mut expired = Vec::new();
        for id in ids {
            let Some(timestamp) = self.find_resting(&id).map(|o| o.timestamp) else {
                continue;
            };
            if timestamp < cutoff {
                if let Ok(order) = self.cancel(&id, now) {
                    info!(order_id = %order.order_id, symbol = %self.symbol, "order cancelled by timeout");
                    expired.push(order);
                }
            }
        }
        expired
    }
}
