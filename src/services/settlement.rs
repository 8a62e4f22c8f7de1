//! Trade Settlement Service (C7)
//!
//! A trade settles exactly once: `settled` is a one-shot `false -> true`
//! transition. Re-settling an already-settled trade is rejected, not a no-op,
//! so a caller can distinguish "nothing happened because it already happened"
//! from "nothing happened because of an error".

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum TradeSettlementError {
    #[error("trade not found: {0}")]
    TradeNotFound(Uuid),

    #[error("trade already settled: {0}")]
    AlreadySettled(Uuid),

    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct TradeSettlementResult {
    pub trade_id: Uuid,
    pub price: Decimal,
    pub quantity: Decimal,
    pub settled_at: DateTime<Utc>,
}

pub struct TradeSettlementService;

impl TradeSettlementService {
    /// Transition a trade from unsettled to settled. Guarded by a `WHERE
    /// settled = false` clause so a racing double-settle returns zero rows
    /// affected rather than silently succeeding twice.
    pub async fn settle_trade(pool: &PgPool, trade_id: Uuid) -> Result<TradeSettlementResult, TradeSettlementError> {
        let existing: Option<(Decimal, Decimal, bool)> =
            sqlx::query_as("SELECT price, quantity, settled FROM trades WHERE id = $1")
                .bind(trade_id)
                .fetch_optional(pool)
                .await?;

        let (price, quantity, settled) = existing.ok_or(TradeSettlementError::TradeNotFound(trade_id))?;

        if settled {
            return Err(TradeSettlementError::AlreadySettled(trade_id));
        }

        let settled_at: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            UPDATE trades
            SET settled = true
            WHERE id = $1 AND settled = false
            RETURNING created_at
            "#,
        )
        .bind(trade_id)
        .fetch_optional(pool)
        .await?;

        let (settled_at,) = settled_at.ok_or(TradeSettlementError::AlreadySettled(trade_id))?;

        info!("trade settled: id={}", trade_id);
        crate::metrics::record_settlement();

        Ok(TradeSettlementResult {
            trade_id,
            price,
            quantity,
            settled_at,
        })
    }

    /// Read-only settlement status check, without mutating anything.
    pub async fn get_settlement_status(pool: &PgPool, trade_id: Uuid) -> Result<bool, TradeSettlementError> {
        let settled: Option<(bool,)> = sqlx::query_as("SELECT settled FROM trades WHERE id = $1")
            .bind(trade_id)
            .fetch_optional(pool)
            .await?;

        settled.map(|(s,)| s).ok_or(TradeSettlementError::TradeNotFound(trade_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_error_display() {
        let id = Uuid::new_v4();
        let err = TradeSettlementError::AlreadySettled(id);
        assert_eq!(err.to_string(), format!("trade already settled: {}", id));
    }
}
