use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orderbook::types::{OrderId, Quantity};

/// Error taxonomy for the order book and the engine dispatcher.
///
/// Every failure is reported to the caller; nothing is swallowed. Trades
/// emitted by the matching loop are final and have no rollback path, so no
/// variant here ever implies one.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum EngineError {
    /// Order construction or re-validation failed
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// A fill request exceeded the order's remaining quantity
    #[error("invalid fill: requested {requested} with {remaining} remaining")]
    InvalidFill {
        requested: Quantity,
        remaining: Quantity,
    },

    /// Symbol is not registered with the engine
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Symbol is already registered with the engine
    #[error("symbol already registered: {0}")]
    SymbolExists(String),

    /// Order was routed to a book for a different symbol
    #[error("order symbol {order} does not match book symbol {book}")]
    SymbolMismatch { order: String, book: String },

    /// Engine is stopped or shutting down
    #[error("engine is not running")]
    NotRunning,

    /// Request queue is at capacity
    #[error("order queue is full")]
    QueueFull,

    /// Stop-loss submissions are disabled by configuration
    #[error("stop-loss orders are disabled")]
    StopLossDisabled,

    /// Pre-submission risk check rejected the order
    #[error("risk check rejected order: {0}")]
    RiskRejected(String),

    /// Market-against-market cross with no prior trade to price it
    #[error("no reference price for market-to-market cross")]
    NoReferencePrice,

    /// Market order found no liquidity at all
    #[error("market order could not be filled")]
    UnfilledMarket,

    /// Order id is not known to any book
    #[error("order not found: {0}")]
    NotFound(OrderId),

    /// Order exists but belongs to a different user
    #[error("order {0} is not owned by the requesting user")]
    NotOwner(OrderId),

    /// Order already reached a terminal state
    #[error("order {0} is already in a terminal state")]
    AlreadyTerminal(OrderId),

    /// Modification parameters are unusable
    #[error("invalid modification: {0}")]
    InvalidModification(String),

    /// Modification changed nothing
    #[error("modification is a no-op")]
    NotModified,

    /// Symbol removal refused while orders are still resting
    #[error("symbol {0} still has resting orders")]
    SymbolNotEmpty(String),

    /// Snapshot import failed validation; no state was changed
    #[error("snapshot rejected: {0}")]
    SnapshotInvalid(String),

    /// Observer callback re-entered the engine
    #[error("re-entrant engine call from observer callback")]
    ReentrantCall,
}

/// Result type for order book and engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            EngineError::NotFound("O-1".to_string()).to_string(),
            "order not found: O-1"
        );
        assert_eq!(
            EngineError::UnknownSymbol("AAPL".to_string()).to_string(),
            "unknown symbol: AAPL"
        );
        assert_eq!(
            EngineError::InvalidFill {
                requested: 10,
                remaining: 3
            }
            .to_string(),
            "invalid fill: requested 10 with 3 remaining"
        );
    }

    #[test]
    fn test_error_serialization() {
        let error = EngineError::SymbolMismatch {
            order: "AAPL".to_string(),
            book: "MSFT".to_string(),
        };
        let serialized = serde_json::to_string(&error).unwrap();
        let deserialized: EngineError = serde_json::from_str(&serialized).unwrap();
        assert_eq!(error, deserialized);
    }
}
