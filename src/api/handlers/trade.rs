//! Trade API Handlers
//!
//! Trade history is read from the in-memory ring buffer maintained by the
//! matching engine (fast, recent); individual trade lookups and settlement
//! go straight to Postgres since the in-memory buffer evicts old entries.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Trade, TradeResponse};
use crate::services::matching::TradeHistoryQuery;
use crate::services::matching::TradeHistoryResponse;
use crate::services::settlement::TradeSettlementService;
use crate::utils::response::{AppError, ApiResponse};
use crate::AppState;

pub async fn list_trades(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TradeHistoryQuery>,
) -> Result<Json<ApiResponse<TradeHistoryResponse>>, AppError> {
    let response = state.orchestrator.get_trades(&query);
    Ok(Json(ApiResponse::success(response)))
}

pub async fn get_trade(
    State(state): State<Arc<AppState>>,
    Path(trade_id): Path<Uuid>,
) -> Result<Json<ApiResponse<TradeResponse>>, AppError> {
    let trade: Option<Trade> = sqlx::query_as("SELECT * FROM trades WHERE id = $1")
        .bind(trade_id)
        .fetch_optional(&state.db.pool)
        .await?;

    let trade = trade.ok_or_else(|| AppError::not_found(&format!("trade {} not found", trade_id)))?;

    Ok(Json(ApiResponse::success(TradeResponse::from(trade))))
}

pub async fn settle_trade(
    State(state): State<Arc<AppState>>,
    Path(trade_id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let result = TradeSettlementService::settle_trade(&state.db.pool, trade_id).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "trade_id": result.trade_id,
        "price": result.price,
        "quantity": result.quantity,
        "settled_at": result.settled_at.timestamp_millis(),
    }))))
}
