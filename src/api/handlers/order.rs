//! Order API Handlers
//!
//! Place/modify/cancel/get/list orders. No auth, no leverage, no signatures —
//! the lane accepts a request, acknowledges it immediately, and the
//! persistence gateway writes it through asynchronously.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{CreateOrderRequest, ModifyOrderRequest};
use crate::services::matching::{MatchResult, OrderHistoryQuery, OrderHistoryResponse};
use crate::utils::response::{AppError, ApiResponse};
use crate::AppState;

pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<MatchResult>>), AppError> {
    if req.price <= Decimal::ZERO {
        return Err(AppError::bad_request("price must be positive"));
    }
    if req.quantity <= Decimal::ZERO {
        return Err(AppError::bad_request("quantity must be positive"));
    }

    let result = state
        .orchestrator
        .process_order(req.owner_id, req.side, req.quantity, req.price)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(result))))
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner_id: Option<String>,
}

pub async fn modify_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Query(owner): Query<OwnerQuery>,
    Json(req): Json<ModifyOrderRequest>,
) -> Result<Json<ApiResponse<MatchResult>>, AppError> {
    if let Some(price) = req.price {
        if price <= Decimal::ZERO {
            return Err(AppError::bad_request("price must be positive"));
        }
    }
    if let Some(quantity) = req.quantity {
        if quantity <= Decimal::ZERO {
            return Err(AppError::bad_request("quantity must be positive"));
        }
    }

    let existing = state
        .orchestrator
        .engine()
        .get_order(&order_id)
        .ok_or_else(|| AppError::not_found(&format!("order {} not found", order_id)))?;

    let price = req.price.unwrap_or(existing.price);
    let result = state
        .orchestrator
        .modify_order(order_id, owner.owner_id.as_deref(), existing.side, price, req.quantity)
        .await?;

    Ok(Json(ApiResponse::success(result)))
}

pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Query(owner): Query<OwnerQuery>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.orchestrator.cancel_order(order_id, owner.owner_id.as_deref()).await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<crate::services::matching::OrderHistoryRecord>>, AppError> {
    // The book only holds live resting orders — a filled or cancelled order
    // has already been removed from it, so this reads the history cache
    // instead, which covers terminal orders too.
    let order = state
        .orchestrator
        .engine()
        .get_order_record(&order_id)
        .ok_or_else(|| AppError::not_found(&format!("order {} not found", order_id)))?;

    Ok(Json(ApiResponse::success(order)))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub owner_id: Option<String>,
    pub status: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub before: Option<i64>,
    pub after: Option<i64>,
}

pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<OrderHistoryResponse>>, AppError> {
    let history_query = OrderHistoryQuery {
        status: query.status,
        page: query.page,
        page_size: query.page_size,
        before: query.before,
        after: query.after,
    };

    let response = state.orchestrator.get_orders(query.owner_id.as_deref(), &history_query);
    Ok(Json(ApiResponse::success(response)))
}

