//! Order Flow Orchestrator
//!
//! Connects the matching engine with durable persistence: submits an order
//! to the lane synchronously (in-memory, authoritative), acknowledges the
//! caller immediately, then spawns an async task to write the result through
//! to Postgres. The write-through is best-effort with bounded retry; the book
//! itself never blocks on it.

use super::engine::MatchingEngine;
use super::types::*;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const PERSIST_RETRY_ATTEMPTS: u32 = 3;
const PERSIST_RETRY_BACKOFF: Duration = Duration::from_millis(100);

pub struct OrderFlowOrchestrator {
    engine: Arc<MatchingEngine>,
    pool: PgPool,
}

impl OrderFlowOrchestrator {
    pub fn new(engine: Arc<MatchingEngine>, pool: PgPool) -> Self {
        info!("order flow orchestrator initialized");
        Self { engine, pool }
    }

    pub fn engine(&self) -> &Arc<MatchingEngine> {
        &self.engine
    }

    /// Spawn the background worker that durably persists every trade as it
    /// is produced by the lane.
    pub fn start_persistence_worker(&self) {
        let pool = self.pool.clone();
        let mut rx = self.engine.subscribe_trades();

        tokio::spawn(async move {
            info!("trade persistence worker started");

            loop {
                match rx.recv().await {
                    Ok(trade) => {
                        if let Err(e) = Self::persist_trade_with_retry(&pool, &trade).await {
                            error!("failed to persist trade {} after retries: {}", trade.trade_id, e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("trade persistence worker lagged {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("trade channel closed, stopping persistence worker");
                        break;
                    }
                }
            }
        });
    }

    /// Submit a new order: run the lane synchronously, then persist async.
    pub async fn process_order(
        &self,
        owner_id: Option<String>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<MatchResult, EngineError> {
        debug!("processing order: owner={:?}, side={:?}, quantity={}, price={}", owner_id, side, quantity, price);

        let order_id = Uuid::new_v4();
        let result = self.engine.submit_order(order_id, owner_id.clone(), side, quantity, price)?;

        let pool = self.pool.clone();
        let result_clone = result.clone();

        tokio::spawn(async move {
            if let Err(e) = Self::persist_order_with_retry(&pool, &result_clone, owner_id.as_deref(), side, quantity, price).await {
                error!("failed to persist order {} after retries: {}", order_id, e);
            }
        });

        info!("order processed: id={}, status={:?}, filled={}", result.order_id, result.status, result.filled_quantity);
        Ok(result)
    }

    /// `price` is the order's resolved new resting price (the caller already
    /// folded in "unchanged" by passing the existing price) — unlike trade
    /// price, which can differ from it on price improvement, this is what
    /// gets persisted as the order row's own price.
    pub async fn modify_order(
        &self,
        order_id: Uuid,
        owner_id: Option<&str>,
        side: Side,
        price: Decimal,
        new_quantity: Option<Decimal>,
    ) -> Result<MatchResult, EngineError> {
        let result = self.engine.modify_order(order_id, owner_id, Some(price), new_quantity)?;

        let pool = self.pool.clone();
        let owner = owner_id.map(|s| s.to_string());
        let result_clone = result.clone();
        let quantity = result.filled_quantity + result.remaining_quantity;

        tokio::spawn(async move {
            if let Err(e) = Self::persist_order_with_retry(&pool, &result_clone, owner.as_deref(), side, quantity, price).await {
                error!("failed to persist modified order {} after retries: {}", order_id, e);
            }
        });

        Ok(result)
    }

    pub async fn cancel_order(&self, order_id: Uuid, owner_id: Option<&str>) -> Result<(), EngineError> {
        debug!("cancelling order: id={}", order_id);

        self.engine.cancel_order(order_id, owner_id)?;

        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::update_order_status_with_retry(&pool, order_id, OrderStatus::Cancelled).await {
                error!("failed to persist cancellation of {} after retries: {}", order_id, e);
            }
        });

        info!("order cancelled: id={}", order_id);
        Ok(())
    }

    pub fn get_orderbook(&self, depth: usize) -> OrderbookSnapshot {
        self.engine.get_orderbook(depth)
    }

    pub fn get_trades(&self, query: &TradeHistoryQuery) -> TradeHistoryResponse {
        self.engine.get_trades(query)
    }

    pub fn get_orders(&self, owner_id: Option<&str>, query: &OrderHistoryQuery) -> OrderHistoryResponse {
        self.engine.get_orders(owner_id, query)
    }

    // ========================================================================
    // Database persistence
    // ========================================================================

    async fn persist_trade_with_retry(pool: &PgPool, trade: &TradeEvent) -> Result<(), sqlx::Error> {
        let mut last_err = None;
        for attempt in 1..=PERSIST_RETRY_ATTEMPTS {
            match Self::persist_trade(pool, trade).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("persist_trade attempt {} failed: {}", attempt, e);
                    last_err = Some(e);
                    tokio::time::sleep(PERSIST_RETRY_BACKOFF * attempt).await;
                }
            }
        }
        Err(last_err.unwrap())
    }

    pub async fn persist_trade(pool: &PgPool, trade: &TradeEvent) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, maker_order_id, taker_order_id, maker_owner_id, taker_owner_id, side, price, quantity, settled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6::order_side, $7, $8, false, to_timestamp($9::double precision / 1000))
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(trade.trade_id)
        .bind(trade.maker_order_id)
        .bind(trade.taker_order_id)
        .bind(&trade.maker_owner_id)
        .bind(&trade.taker_owner_id)
        .bind(trade.taker_side)
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.timestamp as f64)
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            UPDATE orders
            SET filled_quantity = filled_quantity + $1,
                status = CASE
                    WHEN filled_quantity + $1 >= original_quantity THEN 'filled'::order_status
                    ELSE 'partially_filled'::order_status
                END,
                fill_notional = fill_notional + ($1 * $2),
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(trade.quantity)
        .bind(trade.price)
        .bind(trade.maker_order_id)
        .execute(pool)
        .await?;

        debug!("persisted trade: {}", trade.trade_id);
        Ok(())
    }

    async fn persist_order_with_retry(
        pool: &PgPool,
        result: &MatchResult,
        owner_id: Option<&str>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<(), sqlx::Error> {
        let mut last_err = None;
        for attempt in 1..=PERSIST_RETRY_ATTEMPTS {
            match Self::persist_order(pool, result, owner_id, side, quantity, price).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("persist_order attempt {} failed: {}", attempt, e);
                    last_err = Some(e);
                    tokio::time::sleep(PERSIST_RETRY_BACKOFF * attempt).await;
                }
            }
        }
        Err(last_err.unwrap())
    }

    async fn persist_order(
        pool: &PgPool,
        result: &MatchResult,
        owner_id: Option<&str>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, owner_id, side, status, price, original_quantity, filled_quantity, remaining_quantity, fill_notional, created_at, updated_at)
            VALUES ($1, $2, $3::order_side, $4::order_status, $5, $6, $7, $8, $9, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE SET
                status = $4::order_status,
                price = $5,
                original_quantity = $6,
                filled_quantity = $7,
                remaining_quantity = $8,
                fill_notional = $9,
                updated_at = NOW()
            "#,
        )
        .bind(result.order_id)
        .bind(owner_id)
        .bind(side)
        .bind(result.status)
        .bind(price)
        .bind(quantity)
        .bind(result.filled_quantity)
        .bind(result.remaining_quantity)
        .bind(result.average_price.map(|p| result.filled_quantity * p).unwrap_or(Decimal::ZERO))
        .execute(pool)
        .await?;

        debug!("persisted order: {}", result.order_id);
        Ok(())
    }

    async fn update_order_status_with_retry(pool: &PgPool, order_id: Uuid, status: OrderStatus) -> Result<(), sqlx::Error> {
        let mut last_err = None;
        for attempt in 1..=PERSIST_RETRY_ATTEMPTS {
            match Self::update_order_status(pool, order_id, status).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("update_order_status attempt {} failed: {}", attempt, e);
                    last_err = Some(e);
                    tokio::time::sleep(PERSIST_RETRY_BACKOFF * attempt).await;
                }
            }
        }
        Err(last_err.unwrap())
    }

    async fn update_order_status(pool: &PgPool, order_id: Uuid, status: OrderStatus) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $1::order_status, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(status)
        .bind(order_id)
        .execute(pool)
        .await?;

        debug!("updated order status: id={}, status={}", order_id, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Exercising persistence requires a live Postgres connection; matching
    // logic itself is covered by the unit tests in orderbook.rs/engine.rs.
}
