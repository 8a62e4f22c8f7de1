//! Matching Engine Types
//!
//! Shared types and DTOs for the matching engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

// ============================================================================
// Price Level
// ============================================================================

/// Price level with cent precision (2 fractional digits) for exact comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceLevel(i64);

impl PriceLevel {
    /// Create a PriceLevel from a Decimal price
    pub fn from_decimal(price: Decimal) -> Self {
        let scaled = price * Decimal::from(100);
        let truncated = scaled.trunc();
        let value = truncated.mantissa() / 10i128.pow(truncated.scale() as u32);
        PriceLevel(value as i64)
    }

    /// Convert back to Decimal
    pub fn to_decimal(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(100)
    }

    /// Get raw value (cents)
    pub fn raw(&self) -> i64 {
        self.0
    }

    /// Construct directly from a raw cents value
    pub fn from_raw(raw: i64) -> Self {
        PriceLevel(raw)
    }
}

impl Ord for PriceLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PriceLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// Order Types
// ============================================================================

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

impl Side {
    /// The opposing book side matched against.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order lifecycle status.
///
/// PENDING -> {REJECTED, ACTIVE} -> {PARTIALLY_FILLED} -> {FILLED, CANCELLED}
/// CANCELLED is reachable from ACTIVE or PARTIALLY_FILLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Active,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Active => write!(f, "active"),
            OrderStatus::PartiallyFilled => write!(f, "partially_filled"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
            OrderStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl OrderStatus {
    /// Whether an order in this status still rests in the book.
    pub fn is_resting(&self) -> bool {
        matches!(self, OrderStatus::Active | OrderStatus::PartiallyFilled)
    }

    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

// ============================================================================
// Order Entry (in orderbook)
// ============================================================================

/// A resting order entry in the orderbook
#[derive(Debug, Clone, Serialize)]
pub struct OrderEntry {
    pub id: Uuid,
    pub owner_id: Option<String>,
    pub price: Decimal,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub side: Side,
    pub timestamp: i64,
}

// ============================================================================
// Trade Execution
// ============================================================================

/// A trade execution result
#[derive(Debug, Clone, Serialize)]
pub struct TradeExecution {
    pub trade_id: Uuid,
    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub maker_owner_id: Option<String>,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: i64,
}

/// A maker-side order touched by a match, for carrying the fill back into
/// that order's own history record (the maker is never the caller of
/// submit_order/modify_order, so nothing else reports this).
#[derive(Debug, Clone)]
pub struct MakerFill {
    pub order_id: Uuid,
    pub owner_id: Option<String>,
    pub side: Side,
    pub price: Decimal,
    pub trade_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub is_terminal: bool,
    pub timestamp: i64,
}

/// Trade event for broadcasting
#[derive(Debug, Clone, Serialize)]
pub struct TradeEvent {
    pub trade_id: Uuid,
    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub maker_owner_id: Option<String>,
    pub taker_owner_id: Option<String>,
    pub taker_side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: i64,
}

// ============================================================================
// Match Result
// ============================================================================

/// Result of order matching
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub average_price: Option<Decimal>,
    pub trades: Vec<TradeExecution>,
}

// ============================================================================
// Orderbook Snapshot
// ============================================================================

/// Orderbook snapshot for API response
#[derive(Debug, Clone, Serialize)]
pub struct OrderbookSnapshot {
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
    pub last_price: Option<Decimal>,
    pub sequence: u64,
    pub timestamp: i64,
}

/// Orderbook update event for broadcasting
#[derive(Debug, Clone, Serialize)]
pub struct OrderbookUpdate {
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
    pub sequence: u64,
    pub timestamp: i64,
}

/// Batch of trades emitted by a single snapshot tick
#[derive(Debug, Clone, Serialize)]
pub struct TradeSnapshot {
    pub trades: Vec<TradeRecord>,
    pub sequence: u64,
    pub timestamp: i64,
}

// ============================================================================
// Trade Record (for history)
// ============================================================================

/// Trade record for history storage
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub side: String,
    pub price: String,
    pub quantity: String,
    pub maker_order_id: String,
    pub taker_order_id: String,
    pub timestamp: i64,
}

impl From<&TradeEvent> for TradeRecord {
    fn from(event: &TradeEvent) -> Self {
        TradeRecord {
            trade_id: event.trade_id.to_string(),
            side: event.taker_side.to_string(),
            price: event.price.to_string(),
            quantity: event.quantity.to_string(),
            maker_order_id: event.maker_order_id.to_string(),
            taker_order_id: event.taker_order_id.to_string(),
            timestamp: event.timestamp,
        }
    }
}

// ============================================================================
// Order History Record
// ============================================================================

/// Order history record for storage
#[derive(Debug, Clone, Serialize)]
pub struct OrderHistoryRecord {
    pub order_id: String,
    pub owner_id: Option<String>,
    pub side: String,
    pub price: String,
    pub original_quantity: String,
    pub filled_quantity: String,
    pub remaining_quantity: String,
    pub fill_notional: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub avg_fill_price: Option<String>,
    pub trade_ids: Vec<String>,
}

// ============================================================================
// Query Types
// ============================================================================

/// Trade history query parameters
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TradeHistoryQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub before: Option<i64>,
    pub after: Option<i64>,
}

impl TradeHistoryQuery {
    pub fn get_page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn get_page_size(&self) -> usize {
        self.page_size.unwrap_or(50).clamp(1, 100)
    }

    pub fn matches_time(&self, timestamp: i64) -> bool {
        let matches_before = self.before.map_or(true, |ts| timestamp < ts);
        let matches_after = self.after.map_or(true, |ts| timestamp > ts);
        matches_before && matches_after
    }
}

/// Trade history response
#[derive(Debug, Clone, Serialize)]
pub struct TradeHistoryResponse {
    pub trades: Vec<TradeRecord>,
    pub total_count: usize,
    pub has_more: bool,
}

/// Order history query parameters
#[derive(Debug, Clone, Deserialize, Default)]
pub struct OrderHistoryQuery {
    pub status: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub before: Option<i64>,
    pub after: Option<i64>,
}

impl OrderHistoryQuery {
    pub fn get_page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn get_page_size(&self) -> usize {
        self.page_size.unwrap_or(50).clamp(1, 100)
    }

    pub fn matches_status(&self, status: &str) -> bool {
        match &self.status {
            None => true,
            Some(filter) => filter == "all" || status == filter,
        }
    }

    pub fn matches_time(&self, timestamp: i64) -> bool {
        let matches_before = self.before.map_or(true, |ts| timestamp < ts);
        let matches_after = self.after.map_or(true, |ts| timestamp > ts);
        matches_before && matches_after
    }
}

/// Order history response
#[derive(Debug, Clone, Serialize)]
pub struct OrderHistoryResponse {
    pub orders: Vec<OrderHistoryRecord>,
    pub total_count: usize,
    pub has_more: bool,
}

// ============================================================================
// Error Types
// ============================================================================

/// Matching engine errors, mapped onto the error kinds of the error handling design.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("order is not in a cancellable/modifiable state: {0}")]
    StateConflict(Uuid),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_level_conversion() {
        let price = dec!(97500.50);
        let level = PriceLevel::from_decimal(price);
        let back = level.to_decimal();
        assert_eq!(price, back);
    }

    #[test]
    fn test_price_level_ordering() {
        let p1 = PriceLevel::from_decimal(dec!(100.0));
        let p2 = PriceLevel::from_decimal(dec!(200.0));
        assert!(p1 < p2);
    }

    #[test]
    fn test_price_level_truncates_sub_cent() {
        let level = PriceLevel::from_decimal(dec!(10.019));
        assert_eq!(level.to_decimal(), dec!(10.01));
    }

    #[test]
    fn test_order_status_resting() {
        assert!(OrderStatus::Active.is_resting());
        assert!(OrderStatus::PartiallyFilled.is_resting());
        assert!(!OrderStatus::Filled.is_resting());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(!OrderStatus::Active.is_terminal());
    }

    #[test]
    fn test_order_history_query() {
        let query = OrderHistoryQuery {
            status: Some("filled".to_string()),
            page: Some(2),
            page_size: Some(10),
            before: None,
            after: None,
        };

        assert_eq!(query.get_page(), 2);
        assert_eq!(query.get_page_size(), 10);
        assert!(query.matches_status("filled"));
        assert!(!query.matches_status("active"));
    }
}
