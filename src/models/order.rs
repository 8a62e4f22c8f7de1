use crate::services::matching::Side;
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    #[serde(default)]
    pub owner_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ModifyOrderRequest {
    pub price: Option<Decimal>,
    pub quantity: Option<Decimal>,
}
