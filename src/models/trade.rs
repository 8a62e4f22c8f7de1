use crate::services::matching::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

mod datetime_as_millis {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(dt.timestamp_millis())
    }
}

/// Persisted trade row. Settlement is a one-shot `settled: false -> true`
/// transition, never reversed.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub maker_owner_id: Option<String>,
    pub taker_owner_id: Option<String>,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub settled: bool,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeResponse {
    pub trade_id: Uuid,
    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub settled: bool,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub created_at: DateTime<Utc>,
}

impl From<Trade> for TradeResponse {
    fn from(trade: Trade) -> Self {
        Self {
            trade_id: trade.id,
            maker_order_id: trade.maker_order_id,
            taker_order_id: trade.taker_order_id,
            side: trade.side,
            price: trade.price,
            quantity: trade.quantity,
            settled: trade.settled,
            created_at: trade.created_at,
        }
    }
}
