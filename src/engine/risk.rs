use crate::engine::config::EngineConfig;
use crate::orderbook::error::{EngineError, EngineResult};
use crate::orderbook::types::{Order, OrderType, Quantity};

/// Pre-submission risk check run by workers before an order touches a book.
///
/// Rejected orders never reach the book and publish no events. Implementors
/// are invoked from multiple worker threads concurrently.
pub trait RiskValidator: Send + Sync {
    fn validate(&self, order: &Order) -> EngineResult<()>;
}

/// Default validator: per-order quantity and notional ceilings.
///
/// Market orders have no price, so only their quantity is bounded; stops use
/// the trigger price as the notional reference.
#[derive(Debug, Clone)]
pub struct SizeLimitValidator {
    max_order_size: Quantity,
    max_notional: u64,
}

impl SizeLimitValidator {
    pub fn new(max_order_size: Quantity, max_notional: u64) -> Self {
        Self {
            max_order_size,
            max_notional,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_order_size, config.max_position_size)
    }
}

impl RiskValidator for SizeLimitValidator {
    fn validate(&self, order: &Order) -> EngineResult<()> {
        if order.original_quantity > self.max_order_size {
            return Err(EngineError::RiskRejected(format!(
                "quantity {} exceeds the {} per-order limit",
                order.original_quantity, self.max_order_size
            )));
        }

        let reference_price = match order.order_type {
            OrderType::Limit => order.price,
            OrderType::StopLoss => order.trigger_price,
            OrderType::Market => 0,
        };
        if reference_price > 0 {
            let notional = reference_price
                .checked_mul(order.original_quantity)
                .unwrap_or(u64::MAX);
            if notional > self.max_notional {
                return Err(EngineError::RiskRejected(format!(
                    "notional {notional} exceeds the {} limit",
                    self.max_notional
                )));
            }
        }

        Ok(())
    }
}
