//! In-memory bounded trade/order history
//!
//! Backs the list/query HTTP operations with a fast in-process index so a
//! read doesn't have to round-trip Postgres. Postgres remains the durable
//! source of truth; this is a bounded cache rebuilt from scratch on restart
//! (order history is additionally seeded from the persistence gateway during
//! boot recovery).

use super::types::*;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use uuid::Uuid;

const DEFAULT_TRADE_CAPACITY: usize = 50_000;

pub struct HistoryManager {
    trades: RwLock<VecDeque<TradeRecord>>,
    orders: DashMap<Uuid, OrderHistoryRecord>,
    trade_capacity: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct HistoryStats {
    pub trade_count: usize,
    pub order_count: usize,
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TRADE_CAPACITY)
    }

    pub fn with_capacity(trade_capacity: usize) -> Self {
        Self {
            trades: RwLock::new(VecDeque::new()),
            orders: DashMap::new(),
            trade_capacity,
        }
    }

    /// Record a trade, evicting the oldest entry once capacity is reached.
    pub fn record_trade(&self, record: TradeRecord) {
        let mut trades = self.trades.write();
        if trades.len() >= self.trade_capacity {
            trades.pop_front();
        }
        trades.push_back(record);
    }

    /// Insert or overwrite an order's history entry, reflecting its latest
    /// status/fill state.
    pub fn upsert_order(&self, record: OrderHistoryRecord) {
        let order_id = record
            .order_id
            .parse::<Uuid>()
            .expect("order history record id must be a valid uuid");
        self.orders.insert(order_id, record);
    }

    pub fn get_order(&self, order_id: &Uuid) -> Option<OrderHistoryRecord> {
        self.orders.get(order_id).map(|r| r.clone())
    }

    /// Merge a fill into an order's record without disturbing fills already
    /// accumulated on it. Used for resting maker orders hit by a later
    /// taker, and for carrying traded-to-date forward across a modify.
    ///
    /// If no record exists yet (the order was recovered from the database
    /// and never touched the in-memory cache), one is built from the fill
    /// itself so the order becomes queryable from here on.
    pub fn record_fill(&self, fill: &MakerFill, trade_price: Decimal, trade_id: Uuid) {
        let mut entry = self.orders.entry(fill.order_id).or_insert_with(|| {
            let total = fill.trade_quantity + fill.remaining_quantity;
            OrderHistoryRecord {
                order_id: fill.order_id.to_string(),
                owner_id: fill.owner_id.clone(),
                side: fill.side.to_string(),
                price: fill.price.to_string(),
                original_quantity: total.to_string(),
                filled_quantity: Decimal::ZERO.to_string(),
                remaining_quantity: total.to_string(),
                fill_notional: Decimal::ZERO.to_string(),
                status: OrderStatus::Active.to_string(),
                created_at: fill.timestamp,
                updated_at: fill.timestamp,
                avg_fill_price: None,
                trade_ids: vec![],
            }
        });

        let prior_filled: Decimal = entry.filled_quantity.parse().unwrap_or(Decimal::ZERO);
        let prior_notional: Decimal = entry.fill_notional.parse().unwrap_or(Decimal::ZERO);

        let filled = prior_filled + fill.trade_quantity;
        let notional = prior_notional + fill.trade_quantity * trade_price;

        entry.filled_quantity = filled.to_string();
        entry.remaining_quantity = fill.remaining_quantity.to_string();
        entry.fill_notional = notional.to_string();
        entry.avg_fill_price = if filled > Decimal::ZERO {
            Some((notional / filled).to_string())
        } else {
            None
        };
        entry.status = if fill.is_terminal {
            OrderStatus::Filled.to_string()
        } else {
            OrderStatus::PartiallyFilled.to_string()
        };
        entry.updated_at = fill.timestamp;
        entry.trade_ids.push(trade_id.to_string());
    }

    /// Flip an order's record to CANCELLED, leaving its accumulated fill
    /// state as-is. No-op if the order was never seen by the cache.
    pub fn mark_cancelled(&self, order_id: &Uuid, timestamp: i64) {
        if let Some(mut entry) = self.orders.get_mut(order_id) {
            entry.status = OrderStatus::Cancelled.to_string();
            entry.updated_at = timestamp;
        }
    }

    pub fn get_trades(&self, query: &TradeHistoryQuery) -> TradeHistoryResponse {
        let trades = self.trades.read();
        let matching: Vec<&TradeRecord> = trades
            .iter()
            .rev()
            .filter(|t| query.matches_time(t.timestamp))
            .collect();

        let total_count = matching.len();
        let page = query.get_page();
        let page_size = query.get_page_size();
        let start = (page - 1) * page_size;

        let page_items: Vec<TradeRecord> = matching
            .into_iter()
            .skip(start)
            .take(page_size)
            .cloned()
            .collect();

        let has_more = start + page_items.len() < total_count;

        TradeHistoryResponse {
            trades: page_items,
            total_count,
            has_more,
        }
    }

    pub fn get_orders(&self, owner_id: Option<&str>, query: &OrderHistoryQuery) -> OrderHistoryResponse {
        let mut matching: Vec<OrderHistoryRecord> = self
            .orders
            .iter()
            .filter(|entry| {
                let record = entry.value();
                let owner_matches = match owner_id {
                    None => true,
                    Some(owner) => record.owner_id.as_deref() == Some(owner),
                };
                owner_matches && query.matches_status(&record.status) && query.matches_time(record.created_at)
            })
            .map(|entry| entry.value().clone())
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total_count = matching.len();
        let page = query.get_page();
        let page_size = query.get_page_size();
        let start = (page - 1) * page_size;

        let page_items: Vec<OrderHistoryRecord> = matching.into_iter().skip(start).take(page_size).collect();
        let has_more = start + page_items.len() < total_count;

        OrderHistoryResponse {
            orders: page_items,
            total_count,
            has_more,
        }
    }

    pub fn stats(&self) -> HistoryStats {
        HistoryStats {
            trade_count: self.trades.read().len(),
            order_count: self.orders.len(),
        }
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_order(status: &str, owner: &str, created_at: i64) -> OrderHistoryRecord {
        OrderHistoryRecord {
            order_id: Uuid::new_v4().to_string(),
            owner_id: Some(owner.to_string()),
            side: "buy".to_string(),
            price: dec!(100.0).to_string(),
            original_quantity: dec!(1.0).to_string(),
            filled_quantity: dec!(0.0).to_string(),
            remaining_quantity: dec!(1.0).to_string(),
            fill_notional: dec!(0.0).to_string(),
            status: status.to_string(),
            created_at,
            updated_at: created_at,
            avg_fill_price: None,
            trade_ids: vec![],
        }
    }

    #[test]
    fn test_order_history_filters_by_owner_and_status() {
        let history = HistoryManager::new();
        history.upsert_order(sample_order("active", "alice", 1));
        history.upsert_order(sample_order("filled", "alice", 2));
        history.upsert_order(sample_order("active", "bob", 3));

        let query = OrderHistoryQuery {
            status: Some("active".to_string()),
            ..Default::default()
        };

        let response = history.get_orders(Some("alice"), &query);
        assert_eq!(response.total_count, 1);
        assert_eq!(response.orders[0].status, "active");
    }

    #[test]
    fn test_trade_history_capacity_eviction() {
        let history = HistoryManager::with_capacity(2);
        for i in 0..3 {
            history.record_trade(TradeRecord {
                trade_id: Uuid::new_v4().to_string(),
                side: "buy".to_string(),
                price: dec!(100.0).to_string(),
                quantity: dec!(1.0).to_string(),
                maker_order_id: Uuid::new_v4().to_string(),
                taker_order_id: Uuid::new_v4().to_string(),
                timestamp: i,
            });
        }

        let response = history.get_trades(&TradeHistoryQuery::default());
        assert_eq!(response.total_count, 2);
    }

    #[test]
    fn test_record_fill_accumulates_across_calls() {
        let history = HistoryManager::new();
        let order = sample_order("active", "alice", 1);
        let order_id: Uuid = order.order_id.parse().unwrap();
        history.upsert_order(order);

        history.record_fill(
            &MakerFill {
                order_id,
                owner_id: Some("alice".to_string()),
                side: Side::Buy,
                price: dec!(100.0),
                trade_quantity: dec!(0.4),
                remaining_quantity: dec!(0.6),
                is_terminal: false,
                timestamp: 2,
            },
            dec!(100.0),
            Uuid::new_v4(),
        );
        history.record_fill(
            &MakerFill {
                order_id,
                owner_id: Some("alice".to_string()),
                side: Side::Buy,
                price: dec!(100.0),
                trade_quantity: dec!(0.6),
                remaining_quantity: dec!(0.0),
                is_terminal: true,
                timestamp: 3,
            },
            dec!(100.0),
            Uuid::new_v4(),
        );

        let record = history.get_order(&order_id).unwrap();
        assert_eq!(record.status, "filled");
        assert_eq!(record.filled_quantity, dec!(1.0).to_string());
        assert_eq!(record.trade_ids.len(), 2);
    }

    #[test]
    fn test_record_fill_without_existing_record_creates_one() {
        let history = HistoryManager::new();
        let order_id = Uuid::new_v4();

        history.record_fill(
            &MakerFill {
                order_id,
                owner_id: Some("bob".to_string()),
                side: Side::Sell,
                price: dec!(50.0),
                trade_quantity: dec!(1.0),
                remaining_quantity: dec!(0.0),
                is_terminal: true,
                timestamp: 5,
            },
            dec!(50.0),
            Uuid::new_v4(),
        );

        let record = history.get_order(&order_id).unwrap();
        assert_eq!(record.status, "filled");
        assert_eq!(record.original_quantity, dec!(1.0).to_string());
    }

    #[test]
    fn test_mark_cancelled_updates_status() {
        let history = HistoryManager::new();
        let order = sample_order("partially_filled", "alice", 1);
        let order_id: Uuid = order.order_id.parse().unwrap();
        history.upsert_order(order);

        history.mark_cancelled(&order_id, 10);

        let record = history.get_order(&order_id).unwrap();
        assert_eq!(record.status, "cancelled");
        assert_eq!(record.updated_at, 10);
    }
}
