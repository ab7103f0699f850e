//! The matching loop and the stop-trigger cascade.
//!
//! Everything here runs inside the book mutex: one `apply` call -- matching,
//! resting, and any stop cascade it sets off -- is atomic per symbol.

use tracing::{debug, info, warn};

use crate::orderbook::book::{BookInner, RestingSlot};
use crate::orderbook::error::{EngineError, EngineResult};
use crate::orderbook::types::{Order, OrderStatus, OrderType, Price, Side, Trade};
use crate::utils::time::MonotonicClock;

/// Price a trade between the incoming taker and the resting maker.
///
/// The maker's posted price wins. A market maker defers to a limit taker's
/// price, and a market-against-market cross falls back to the last trade
/// price -- or is rejected outright when no trade has ever printed, rather
/// than silently pricing at 0.
fn trade_price(taker: &Order, maker: &Order, last_trade_price: Price) -> EngineResult<Price> {
    if maker.order_type != OrderType::Market {
        return Ok(maker.price);
    }
    if taker.order_type != OrderType::Market {
        return Ok(taker.price);
    }
    if last_trade_price > 0 {
        Ok(last_trade_price)
    } else {
        Err(EngineError::NoReferencePrice)
    }
}

impl BookInner {
    /// Entry point for every incoming order; the only path that mutates the
    /// books. Returns all trades produced, earliest first.
    pub(crate) fn apply(&mut self, order: Order, clock: &MonotonicClock) -> EngineResult<Vec<Trade>> {
        if order.symbol != self.symbol {
            return Err(EngineError::SymbolMismatch {
                order: order.symbol,
                book: self.symbol.clone(),
            });
        }
        if self.by_id.contains_key(&order.order_id) || self.completed.contains_key(&order.order_id)
        {
            return Err(EngineError::InvalidOrder(format!(
                "duplicate order id {}",
                order.order_id
            )));
        }

        // Stops rest untriggered; they never match on arrival.
        if order.order_type == OrderType::StopLoss {
            debug!(order = %order, trigger = order.trigger_price, "parking stop-loss order");
            let slot = match order.side {
                Side::Buy => RestingSlot::BuyStop(order.trigger_price),
                Side::Sell => RestingSlot::SellStop(order.trigger_price),
            };
            self.register(&order, slot);
            match order.side {
                Side::Buy => self.buy_stops.insert(order),
                Side::Sell => self.sell_stops.insert(order),
            }
            return Ok(Vec::new());
        }

        let mut order = order;
        let mut trades = match self.match_incoming(&mut order, clock) {
            Ok(trades) => trades,
            Err(e) => {
                // NoReferencePrice rejects the taker before any fill.
                self.record_completed(order.order_id, OrderStatus::Rejected, clock.now_micros());
                return Err(e);
            }
        };

        match order.order_type {
            OrderType::Limit => {
                if order.remaining_quantity > 0 {
                    debug!(order = %order, "resting limit remainder");
                    let slot = match order.side {
                        Side::Buy => RestingSlot::Bid(order.price),
                        Side::Sell => RestingSlot::Ask(order.price),
                    };
                    self.register(&order, slot);
                    match order.side {
                        Side::Buy => self.bids.enqueue(order),
                        Side::Sell => self.asks.enqueue(order),
                    }
                } else {
                    self.record_completed(order.order_id, OrderStatus::Filled, clock.now_micros());
                }
            }
            OrderType::Market => {
                if order.remaining_quantity > 0 && trades.is_empty() {
                    warn!(order = %order, "market order found no liquidity");
                    self.record_completed(order.order_id, OrderStatus::Rejected, clock.now_micros());
                    return Err(EngineError::UnfilledMarket);
                }
                if order.remaining_quantity > 0 {
                    // Market orders never rest; the unmatched tail is dropped.
                    debug!(
                        order_id = %order.order_id,
                        discarded = order.remaining_quantity,
                        "discarding unfilled market remainder"
                    );
                }
                self.record_completed(order.order_id, OrderStatus::Filled, clock.now_micros());
            }
            OrderType::StopLoss => unreachable!("stop orders are parked above"),
        }

        if !trades.is_empty() {
            self.trigger_stops(&mut trades, clock);
        }

        Ok(trades)
    }

    /// Match the taker against the opposite side's best level until the
    /// taker is filled, the book no longer crosses, or liquidity runs out.
    pub(crate) fn match_incoming(
        &mut self,
        taker: &mut Order,
        clock: &MonotonicClock,
    ) -> EngineResult<Vec<Trade>> {
        let mut trades = Vec::new();

        while taker.remaining_quantity > 0 {
            let BookInner {
                symbol,
                bids,
                asks,
                by_id,
                by_user,
                completed,
                last_trade_price,
                last_trade_time,
                total_trades,
                total_volume,
                trade_seq,
                ..
            } = self;
            let opposite = match taker.side {
                Side::Buy => &mut *asks,
                Side::Sell => &mut *bids,
            };

            let Some(best_price) = opposite.best_price() else {
                break;
            };
            let Some(level) = opposite.level_mut(best_price) else {
                break;
            };
            let Some(maker) = level.head_mut() else {
                break;
            };
            if !taker.is_compatible_with(maker) {
                break;
            }

            let price = trade_price(taker, maker, *last_trade_price)?;
            let quantity = taker.remaining_quantity.min(maker.remaining_quantity);
            maker.fill(quantity)?;
            taker.fill(quantity)?;
            let maker_order_id = maker.order_id.clone();
            level.note_fill(quantity);

            let (buy_order_id, sell_order_id) = match taker.side {
                Side::Buy => (taker.order_id.clone(), maker_order_id),
                Side::Sell => (maker_order_id, taker.order_id.clone()),
            };

            *trade_seq += 1;
            let timestamp = clock.now_micros();
            let trade = Trade {
                trade_id: *trade_seq,
                buy_order_id,
                sell_order_id,
                symbol: symbol.clone(),
                price,
                quantity,
                timestamp,
            };
            debug!(
                symbol = %trade.symbol,
                trade_id = trade.trade_id,
                price,
                quantity,
                "trade executed"
            );

            *last_trade_price = price;
            *last_trade_time = timestamp;
            *total_trades += 1;
            *total_volume += quantity;

            // A fully consumed maker leaves the book immediately; an emptied
            // level goes with it.
            if let Some(filled) = level.pop_head_if_filled() {
                by_id.remove(&filled.order_id);
                if let Some(ids) = by_user.get_mut(&filled.user_id) {
                    ids.remove(&filled.order_id);
                    if ids.is_empty() {
                        by_user.remove(&filled.user_id);
                    }
                }
                completed.insert(filled.order_id.clone(), (OrderStatus::Filled, timestamp));
            }
            opposite.remove_level_if_empty(best_price);

            trades.push(trade);
        }

        Ok(trades)
    }

    /// Fire every stop whose trigger condition the latest trade price
    /// satisfies, closest trigger first, buy stops winning ties. Each fired
    /// stop becomes a market order that may itself trade and move the
    /// reference price, so the scan loops until neither side fires.
    pub(crate) fn trigger_stops(&mut self, trades: &mut Vec<Trade>, clock: &MonotonicClock) {
        loop {
            let reference = self.last_trade_price;
            if reference == 0 {
                break;
            }

            let buy = self.buy_stops.next_trigger().filter(|&t| t <= reference);
            let sell = self.sell_stops.next_trigger().filter(|&t| t >= reference);
            let fire_buy = match (buy, sell) {
                (None, None) => break,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some(b), Some(s)) => reference - b <= s - reference,
            };

            let popped = if fire_buy {
                self.buy_stops.pop_next()
            } else {
                self.sell_stops.pop_next()
            };
            let Some(mut stop) = popped else {
                break;
            };

            self.evict_indices(&stop.order_id, &stop.user_id);
            stop.status = OrderStatus::Triggered;
            info!(
                order_id = %stop.order_id,
                symbol = %self.symbol,
                trigger = stop.trigger_price,
                reference,
                "stop-loss triggered"
            );

            let mut market = stop.into_triggered_market(clock.now_micros());
            match self.match_incoming(&mut market, clock) {
                Ok(fills) if fills.is_empty() => {
                    warn!(order_id = %market.order_id, "triggered stop found no liquidity");
                    self.record_completed(
                        market.order_id,
                        OrderStatus::Rejected,
                        clock.now_micros(),
                    );
                }
                Ok(mut fills) => {
                    if market.remaining_quantity > 0 {
                        debug!(
                            order_id = %market.order_id,
                            discarded = market.remaining_quantity,
                            "discarding unfilled remainder of triggered stop"
                        );
                    }
                    self.record_completed(market.order_id, OrderStatus::Filled, clock.now_micros());
                    trades.append(&mut fills);
                }
                Err(e) => {
                    // Unreachable in practice: the scan only runs with a
                    // positive reference price.
                    warn!(order_id = %market.order_id, error = %e, "triggered stop rejected");
                    self.record_completed(
                        market.order_id,
                        OrderStatus::Rejected,
                        clock.now_micros(),
                    );
                }
            }
        }
    }
}
