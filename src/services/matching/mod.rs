//! Order Matching Engine Module
//!
//! Single-instrument continuous limit-order matching with price-time priority.
//!
//! # Architecture
//!
//! ```text
//! API Handler
//!   ↓
//! OrderFlowOrchestrator
//!   ├→ MatchingEngine (single-mutex lane, in-memory matching)
//!   │    ├→ Orderbook (price-level + resting-order index)
//!   │    └→ HistoryManager (in-memory history cache)
//!   └→ Database (async write-through persistence)
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use crate::services::matching::{MatchingEngine, OrderFlowOrchestrator};
//!
//! let engine = MatchingEngine::new();
//! let orchestrator = OrderFlowOrchestrator::new(engine.clone(), pool);
//! orchestrator.start_persistence_worker();
//!
//! let result = orchestrator.engine().submit_order(
//!     order_id,
//!     Some("alice".to_string()),
//!     Side::Buy,
//!     dec!(1.0),
//!     dec!(100.0),
//! )?;
//! ```

mod engine;
mod history;
mod orderbook;
mod orchestrator;
mod types;

pub use engine::{EngineStats, MatchingEngine};
pub use history::{HistoryManager, HistoryStats};
pub use orderbook::Orderbook;
pub use orchestrator::OrderFlowOrchestrator;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_engine_basic() {
        let engine = MatchingEngine::new();
        let result = engine
            .submit_order(Uuid::new_v4(), Some("0x1234".to_string()), Side::Buy, dec!(1.0), dec!(100.0))
            .unwrap();

        assert_eq!(result.status, OrderStatus::Active);
    }
}
