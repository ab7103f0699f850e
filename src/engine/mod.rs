//! Engine dispatcher: symbol registry, request queue, worker pool.
//!
//! The engine is the concurrency boundary of the system. Books stay
//! single-symbol and lock-per-book; everything multi-symbol or multi-thread
//! lives here.

pub mod config;
pub mod dispatcher;
pub mod queue;
pub mod risk;

// Re-export main types for convenience
pub use config::EngineConfig;
pub use dispatcher::{EngineStatistics, MatchingEngine};
pub use risk::{RiskValidator, SizeLimitValidator};
