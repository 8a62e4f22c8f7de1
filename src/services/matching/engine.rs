//! Matching Engine (C5 — book controller)
//!
//! Owns the single instrument's book behind one `parking_lot::Mutex`. Every
//! mutating operation acquires it, runs to completion, and releases — this
//! is the logical lane: no operation interleaves with another, so clients
//! observe a single total order of accepted operations and reads taken under
//! the same mutex are linearizable with respect to it.

use super::history::{HistoryManager, HistoryStats};
use super::orderbook::Orderbook;
use super::types::*;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TRADE_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    pub order_count: i64,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub last_trade_price: Option<Decimal>,
}

pub struct MatchingEngine {
    book: Mutex<Orderbook>,
    history: HistoryManager,
    trade_tx: broadcast::Sender<TradeEvent>,
    snapshot_sequence: AtomicU64,
}

impl MatchingEngine {
    pub fn new() -> Arc<Self> {
        let (trade_tx, _) = broadcast::channel(TRADE_CHANNEL_CAPACITY);
        Arc::new(Self {
            book: Mutex::new(Orderbook::new()),
            history: HistoryManager::new(),
            trade_tx,
            snapshot_sequence: AtomicU64::new(0),
        })
    }

    pub fn subscribe_trades(&self) -> broadcast::Receiver<TradeEvent> {
        self.trade_tx.subscribe()
    }

    /// Place a new order. Validates, runs the matching kernel, and rests any
    /// unfilled residue — all inside one lane acquisition.
    pub fn submit_order(
        &self,
        order_id: Uuid,
        owner_id: Option<String>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<MatchResult, EngineError> {
        if price <= Decimal::ZERO {
            return Err(EngineError::InvalidPrice(format!("price must be positive, got {}", price)));
        }
        if quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidQuantity(format!(
                "quantity must be positive, got {}",
                quantity
            )));
        }

        let now = chrono::Utc::now().timestamp_millis();
        let timer = crate::metrics::Timer::new();
        let result = {
            let book = self.book.lock();
            let (trades, residue, maker_fills) =
                book.match_and_rest(order_id, owner_id.clone(), side, quantity, price, now);
            self.build_match_result(
                order_id,
                quantity,
                side,
                price,
                trades,
                residue,
                maker_fills,
                owner_id,
                now,
                now,
                Decimal::ZERO,
                Decimal::ZERO,
                Vec::new(),
            )
        };

        debug!(
            "order submitted: id={}, side={:?}, status={:?}, filled={}",
            order_id, side, result.status, result.filled_quantity
        );

        crate::metrics::record_order_submitted(&side.to_string());
        crate::metrics::record_order_match_duration(timer.elapsed_secs());

        Ok(result)
    }

    /// Modify a resting order: forfeits price-time priority. Implemented as
    /// cancel-then-reinsert-at-tail inside one mutex acquisition, so no other
    /// operation can observe the order absent from the book.
    ///
    /// `new_quantity` is the order's new TOTAL size, not the remaining size
    /// to rest — traded-to-date carries forward, so a resting order that has
    /// already filled 0.4 of a 1.0 and is modified to 2.0 rests 1.6, not 2.0.
    pub fn modify_order(
        &self,
        order_id: Uuid,
        owner_id: Option<&str>,
        new_price: Option<Decimal>,
        new_quantity: Option<Decimal>,
    ) -> Result<MatchResult, EngineError> {
        let now = chrono::Utc::now().timestamp_millis();

        let book = self.book.lock();

        let existing = book.get_order(&order_id).ok_or(EngineError::OrderNotFound(order_id))?;
        if let Some(owner) = owner_id {
            if existing.owner_id.as_deref() != Some(owner) {
                return Err(EngineError::StateConflict(order_id));
            }
        }

        let prior_record = self.history.get_order(&order_id);
        let prior_filled: Decimal = prior_record
            .as_ref()
            .and_then(|r| r.filled_quantity.parse().ok())
            .unwrap_or(Decimal::ZERO);
        let prior_notional: Decimal = prior_record
            .as_ref()
            .and_then(|r| r.fill_notional.parse().ok())
            .unwrap_or(Decimal::ZERO);
        let prior_trade_ids = prior_record.as_ref().map(|r| r.trade_ids.clone()).unwrap_or_default();
        let created_at = prior_record.as_ref().map(|r| r.created_at).unwrap_or(existing.timestamp);
        // The book's own OrderEntry.original_quantity is only the size of the
        // chunk currently resting (it resets on every re-rest), so the true
        // lifetime total quantity comes from the history record once one
        // exists.
        let existing_total: Decimal = prior_record
            .as_ref()
            .and_then(|r| r.original_quantity.parse().ok())
            .unwrap_or(existing.original_quantity);

        let price = new_price.unwrap_or(existing.price);
        let total_quantity = new_quantity.unwrap_or(existing_total);

        if price <= Decimal::ZERO {
            return Err(EngineError::InvalidPrice(format!("price must be positive, got {}", price)));
        }
        if total_quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidQuantity(format!(
                "quantity must be positive, got {}",
                total_quantity
            )));
        }
        if total_quantity < prior_filled {
            return Err(EngineError::InvalidQuantity(format!(
                "new quantity {} is below {} already filled",
                total_quantity, prior_filled
            )));
        }

        let remaining_to_work = total_quantity - prior_filled;

        book.cancel_order(order_id).ok_or(EngineError::StateConflict(order_id))?;

        let owner = existing.owner_id.clone();
        let (trades, residue, maker_fills) =
            book.match_and_rest(order_id, owner.clone(), existing.side, remaining_to_work, price, now);
        let result = self.build_match_result(
            order_id,
            total_quantity,
            existing.side,
            price,
            trades,
            residue,
            maker_fills,
            owner,
            created_at,
            now,
            prior_filled,
            prior_notional,
            prior_trade_ids,
        );

        info!("order modified: id={}, status={:?}", order_id, result.status);
        Ok(result)
    }

    /// Cancel a resting order.
    pub fn cancel_order(&self, order_id: Uuid, owner_id: Option<&str>) -> Result<(), EngineError> {
        let book = self.book.lock();

        let existing = book.get_order(&order_id).ok_or(EngineError::OrderNotFound(order_id))?;
        if let Some(owner) = owner_id {
            if existing.owner_id.as_deref() != Some(owner) {
                return Err(EngineError::StateConflict(order_id));
            }
        }

        book.cancel_order(order_id).ok_or(EngineError::StateConflict(order_id))?;
        self.history.mark_cancelled(&order_id, chrono::Utc::now().timestamp_millis());
        info!("order cancelled: id={}", order_id);
        crate::metrics::record_order_cancelled();
        Ok(())
    }

    pub fn get_order(&self, order_id: &Uuid) -> Option<OrderEntry> {
        self.book.lock().get_order(order_id)
    }

    /// Full history-backed view of an order, covering terminal orders (filled,
    /// cancelled) that are no longer resting in the book.
    pub fn get_order_record(&self, order_id: &Uuid) -> Option<OrderHistoryRecord> {
        self.history.get_order(order_id)
    }

    /// Linearizable snapshot of both sides of the book.
    pub fn get_orderbook(&self, depth: usize) -> OrderbookSnapshot {
        let book = self.book.lock();
        let sequence = self.snapshot_sequence.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        book.snapshot(depth, sequence)
    }

    pub fn get_trades(&self, query: &TradeHistoryQuery) -> TradeHistoryResponse {
        self.history.get_trades(query)
    }

    pub fn get_orders(&self, owner_id: Option<&str>, query: &OrderHistoryQuery) -> OrderHistoryResponse {
        self.history.get_orders(owner_id, query)
    }

    pub fn stats(&self) -> EngineStats {
        let book = self.book.lock();
        EngineStats {
            order_count: book.order_count(),
            best_bid: book.best_bid(),
            best_ask: book.best_ask(),
            last_trade_price: book.last_trade_price(),
        }
    }

    /// Boot-time recovery: re-rest every order the persistence gateway still
    /// has marked active/partially filled, in creation order, so time
    /// priority among recovered orders matches what it was before the crash.
    /// Orders are inserted directly — never re-run through the kernel —
    /// because they already reflect whatever fills happened before restart.
    pub async fn recover_orders_from_db(self: &Arc<Self>, pool: &PgPool) -> Result<usize, sqlx::Error> {
        #[derive(sqlx::FromRow)]
        struct RestingOrderRow {
            id: Uuid,
            owner_id: Option<String>,
            side: String,
            status: String,
            price: Decimal,
            original_quantity: Decimal,
            filled_quantity: Decimal,
            remaining_quantity: Decimal,
            fill_notional: Decimal,
            created_at: chrono::DateTime<chrono::Utc>,
            updated_at: chrono::DateTime<chrono::Utc>,
        }

        let rows: Vec<RestingOrderRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, side::text, status::text, price, original_quantity,
                   filled_quantity, remaining_quantity, fill_notional, created_at, updated_at
            FROM orders
            WHERE status IN ('active', 'partially_filled')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(pool)
        .await?;

        let count = rows.len();
        let book = self.book.lock();
        for row in rows {
            let side = if row.side == "buy" { Side::Buy } else { Side::Sell };
            book.add_order(OrderEntry {
                id: row.id,
                owner_id: row.owner_id.clone(),
                price: row.price,
                original_quantity: row.original_quantity,
                remaining_quantity: row.remaining_quantity,
                side,
                timestamp: row.created_at.timestamp_millis(),
            });

            // Seed the history cache too, otherwise a recovered order stays
            // invisible to get_order_record/list_orders until it is next
            // touched by a trade. Trade ids are not recoverable cheaply here
            // (would need a join against `trades`), so this record starts
            // with an empty trade_ids list.
            self.history.upsert_order(OrderHistoryRecord {
                order_id: row.id.to_string(),
                owner_id: row.owner_id,
                side: side.to_string(),
                price: row.price.to_string(),
                original_quantity: row.original_quantity.to_string(),
                filled_quantity: row.filled_quantity.to_string(),
                remaining_quantity: row.remaining_quantity.to_string(),
                fill_notional: row.fill_notional.to_string(),
                status: row.status,
                created_at: row.created_at.timestamp_millis(),
                updated_at: row.updated_at.timestamp_millis(),
                avg_fill_price: if row.filled_quantity > Decimal::ZERO {
                    Some((row.fill_notional / row.filled_quantity).to_string())
                } else {
                    None
                },
                trade_ids: Vec::new(),
            });
        }

        if count > 0 {
            info!("recovered {} resting orders from the persistence gateway", count);
        }

        Ok(count)
    }

    /// Assemble the result of one matching pass, upsert the submitted/
    /// modified order's own history record, and carry each touched maker's
    /// fill into *its* record independently.
    ///
    /// `prior_filled`/`prior_notional`/`prior_trade_ids` are the traded-to-
    /// date accumulators from before this call (zero/empty for a brand new
    /// order, carried forward from the existing record across a modify) —
    /// folding them in here is what keeps `traded + remaining = total`
    /// correct across a modify instead of resetting traded to just the
    /// fills from this one pass.
    #[allow(clippy::too_many_arguments)]
    fn build_match_result(
        &self,
        order_id: Uuid,
        total_quantity: Decimal,
        side: Side,
        price: Decimal,
        trades: Vec<TradeExecution>,
        residue: Option<OrderEntry>,
        maker_fills: Vec<MakerFill>,
        owner_id: Option<String>,
        created_at: i64,
        timestamp: i64,
        prior_filled: Decimal,
        prior_notional: Decimal,
        prior_trade_ids: Vec<String>,
    ) -> MatchResult {
        let new_filled: Decimal = trades.iter().map(|t| t.quantity).sum();
        let filled_quantity = prior_filled + new_filled;
        let remaining_quantity = total_quantity - filled_quantity;

        let status = if residue.is_none() {
            OrderStatus::Filled
        } else if filled_quantity > Decimal::ZERO {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Active
        };

        let new_notional: Decimal = trades.iter().map(|t| t.price * t.quantity).sum();
        let notional = prior_notional + new_notional;
        let average_price = if filled_quantity > Decimal::ZERO {
            Some(notional / filled_quantity)
        } else {
            None
        };

        if !trades.is_empty() {
            crate::metrics::record_order_matched(side.to_string().as_str());
        }

        for (trade, fill) in trades.iter().zip(maker_fills.iter()) {
            crate::metrics::record_trade_executed(trade.quantity.to_f64().unwrap_or(0.0));

            let event = TradeEvent {
                trade_id: trade.trade_id,
                maker_order_id: trade.maker_order_id,
                taker_order_id: trade.taker_order_id,
                maker_owner_id: trade.maker_owner_id.clone(),
                taker_owner_id: owner_id.clone(),
                taker_side: side,
                price: trade.price,
                quantity: trade.quantity,
                timestamp: trade.timestamp,
            };

            self.history.record_trade(TradeRecord::from(&event));
            self.history.record_fill(fill, trade.price, trade.trade_id);

            if self.trade_tx.send(event).is_err() {
                warn!("no subscribers for trade event {}", trade.trade_id);
            }
        }

        let mut trade_ids = prior_trade_ids;
        trade_ids.extend(trades.iter().map(|t| t.trade_id.to_string()));

        self.history.upsert_order(OrderHistoryRecord {
            order_id: order_id.to_string(),
            owner_id,
            side: side.to_string(),
            price: price.to_string(),
            original_quantity: total_quantity.to_string(),
            filled_quantity: filled_quantity.to_string(),
            remaining_quantity: remaining_quantity.to_string(),
            fill_notional: notional.to_string(),
            status: status.to_string(),
            created_at,
            updated_at: timestamp,
            avg_fill_price: average_price.map(|p| p.to_string()),
            trade_ids,
        });

        MatchResult {
            order_id,
            status,
            filled_quantity,
            remaining_quantity,
            average_price,
            trades,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_engine_basic_resting_order() {
        let engine = MatchingEngine::new();
        let result = engine
            .submit_order(Uuid::new_v4(), Some("alice".to_string()), Side::Buy, dec!(1.0), dec!(100.0))
            .unwrap();

        assert_eq!(result.status, OrderStatus::Active);
        assert_eq!(result.filled_quantity, dec!(0));
    }

    #[test]
    fn test_engine_crosses_and_fills() {
        let engine = MatchingEngine::new();
        engine
            .submit_order(Uuid::new_v4(), Some("alice".to_string()), Side::Sell, dec!(1.0), dec!(100.0))
            .unwrap();

        let result = engine
            .submit_order(Uuid::new_v4(), Some("bob".to_string()), Side::Buy, dec!(1.0), dec!(100.0))
            .unwrap();

        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.filled_quantity, dec!(1.0));
        assert_eq!(result.average_price, Some(dec!(100.0)));
    }

    #[test]
    fn test_engine_rejects_non_positive_quantity() {
        let engine = MatchingEngine::new();
        let err = engine
            .submit_order(Uuid::new_v4(), None, Side::Buy, dec!(0), dec!(100.0))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuantity(_)));
    }

    #[test]
    fn test_cancel_then_not_found() {
        let engine = MatchingEngine::new();
        let result = engine
            .submit_order(Uuid::new_v4(), None, Side::Buy, dec!(1.0), dec!(100.0))
            .unwrap();

        engine.cancel_order(result.order_id, None).unwrap();
        let err = engine.cancel_order(result.order_id, None).unwrap_err();
        assert!(matches!(err, EngineError::OrderNotFound(_)));
    }

    #[test]
    fn test_modify_forfeits_priority() {
        let engine = MatchingEngine::new();
        let first = engine
            .submit_order(Uuid::new_v4(), Some("alice".to_string()), Side::Buy, dec!(1.0), dec!(100.0))
            .unwrap();
        engine
            .submit_order(Uuid::new_v4(), Some("bob".to_string()), Side::Buy, dec!(1.0), dec!(100.0))
            .unwrap();

        // Bumping alice's quantity should push her behind bob at the same level.
        engine
            .modify_order(first.order_id, Some("alice"), None, Some(dec!(2.0)))
            .unwrap();

        let sell = engine
            .submit_order(Uuid::new_v4(), Some("carol".to_string()), Side::Sell, dec!(1.0), dec!(100.0))
            .unwrap();

        assert_eq!(sell.trades[0].maker_order_id.to_string(), sell.trades[0].maker_order_id.to_string());
        // bob should have been filled first since alice forfeited priority
        let bob_filled = sell.trades.iter().any(|t| t.maker_owner_id.as_deref() != Some("alice"));
        assert!(bob_filled);
    }

    #[test]
    fn test_maker_history_updated_when_filled_by_later_taker() {
        let engine = MatchingEngine::new();
        let maker = engine
            .submit_order(Uuid::new_v4(), Some("alice".to_string()), Side::Sell, dec!(1.0), dec!(100.0))
            .unwrap();

        engine
            .submit_order(Uuid::new_v4(), Some("bob".to_string()), Side::Buy, dec!(0.4), dec!(100.0))
            .unwrap();

        let record = engine.get_order_record(&maker.order_id).unwrap();
        assert_eq!(record.status, "partially_filled");
        assert_eq!(record.filled_quantity, dec!(0.4).to_string());
        assert!(engine.get_order(&maker.order_id).is_some()); // still resting

        engine
            .submit_order(Uuid::new_v4(), Some("carol".to_string()), Side::Buy, dec!(0.6), dec!(100.0))
            .unwrap();

        let record = engine.get_order_record(&maker.order_id).unwrap();
        assert_eq!(record.status, "filled");
        assert_eq!(record.filled_quantity, dec!(1.0).to_string());
        assert!(engine.get_order(&maker.order_id).is_none()); // gone from the book
    }

    #[test]
    fn test_cancel_updates_history_record() {
        let engine = MatchingEngine::new();
        let order = engine
            .submit_order(Uuid::new_v4(), Some("alice".to_string()), Side::Buy, dec!(1.0), dec!(100.0))
            .unwrap();

        engine.cancel_order(order.order_id, Some("alice")).unwrap();

        assert!(engine.get_order(&order.order_id).is_none());
        let record = engine.get_order_record(&order.order_id).unwrap();
        assert_eq!(record.status, "cancelled");
    }

    #[test]
    fn test_modify_preserves_traded_to_date() {
        let engine = MatchingEngine::new();
        let maker = engine
            .submit_order(Uuid::new_v4(), Some("alice".to_string()), Side::Sell, dec!(1.0), dec!(100.0))
            .unwrap();

        engine
            .submit_order(Uuid::new_v4(), Some("bob".to_string()), Side::Buy, dec!(0.4), dec!(100.0))
            .unwrap();

        // alice bumps her remaining size; the 0.4 already traded must carry forward.
        let modified = engine
            .modify_order(maker.order_id, Some("alice"), None, Some(dec!(2.0)))
            .unwrap();

        assert_eq!(modified.filled_quantity, dec!(0.4));
        assert_eq!(modified.remaining_quantity, dec!(1.6));
        assert_eq!(modified.status, OrderStatus::PartiallyFilled);

        let record = engine.get_order_record(&maker.order_id).unwrap();
        assert_eq!(record.filled_quantity, dec!(0.4).to_string());
        assert_eq!(record.original_quantity, dec!(2.0).to_string());
    }

    #[test]
    fn test_modify_without_new_quantity_preserves_lifetime_total() {
        let engine = MatchingEngine::new();
        let maker = engine
            .submit_order(Uuid::new_v4(), Some("alice".to_string()), Side::Sell, dec!(1.0), dec!(100.0))
            .unwrap();

        engine
            .submit_order(Uuid::new_v4(), Some("bob".to_string()), Side::Buy, dec!(0.4), dec!(100.0))
            .unwrap();

        // First modify bumps the total to 2.0 (remaining goes from 0.6 to 1.6).
        engine
            .modify_order(maker.order_id, Some("alice"), None, Some(dec!(2.0)))
            .unwrap();

        // A second modify that only changes price must not silently shrink the
        // lifetime total back down to the 1.6 that happened to be resting.
        let modified = engine
            .modify_order(maker.order_id, Some("alice"), Some(dec!(101.0)), None)
            .unwrap();

        assert_eq!(modified.filled_quantity, dec!(0.4));
        assert_eq!(modified.remaining_quantity, dec!(1.6));
    }

    #[test]
    fn test_modify_rejects_quantity_below_already_filled() {
        let engine = MatchingEngine::new();
        let maker = engine
            .submit_order(Uuid::new_v4(), Some("alice".to_string()), Side::Sell, dec!(1.0), dec!(100.0))
            .unwrap();

        engine
            .submit_order(Uuid::new_v4(), Some("bob".to_string()), Side::Buy, dec!(0.4), dec!(100.0))
            .unwrap();

        let err = engine
            .modify_order(maker.order_id, Some("alice"), None, Some(dec!(0.1)))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuantity(_)));
    }
}
