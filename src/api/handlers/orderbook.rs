//! Orderbook API Handler

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use crate::services::matching::OrderbookSnapshot;
use crate::utils::response::{AppError, ApiResponse};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct OrderbookQuery {
    pub depth: Option<usize>,
}

pub async fn get_orderbook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OrderbookQuery>,
) -> Result<Json<ApiResponse<OrderbookSnapshot>>, AppError> {
    let depth = query.depth.unwrap_or(state.config.default_book_depth).clamp(1, 500);
    let snapshot = state.orchestrator.get_orderbook(depth);
    Ok(Json(ApiResponse::success(snapshot)))
}
