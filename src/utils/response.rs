#![allow(dead_code)]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn error(code: &str, message: &str) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Application error type
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// The order exists but is not in a state that allows the requested
    /// operation (e.g. cancelling an already-terminal order).
    pub fn state_conflict(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "STATE_CONFLICT", message)
    }

    pub fn internal(message: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl From<crate::services::matching::EngineError> for AppError {
    fn from(err: crate::services::matching::EngineError) -> Self {
        use crate::services::matching::EngineError;
        match err {
            EngineError::OrderNotFound(id) => AppError::not_found(&format!("order {} not found", id)),
            EngineError::InvalidPrice(msg) | EngineError::InvalidQuantity(msg) => AppError::bad_request(&msg),
            EngineError::StateConflict(id) => {
                AppError::state_conflict(&format!("order {} is not in a modifiable/cancellable state", id))
            }
            EngineError::DatabaseError(msg) | EngineError::InternalError(msg) => AppError::internal(&msg),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::internal(&err.to_string())
    }
}

impl From<crate::services::settlement::TradeSettlementError> for AppError {
    fn from(err: crate::services::settlement::TradeSettlementError) -> Self {
        use crate::services::settlement::TradeSettlementError;
        match err {
            TradeSettlementError::TradeNotFound(id) => AppError::not_found(&format!("trade {} not found", id)),
            TradeSettlementError::AlreadySettled(id) => {
                AppError::state_conflict(&format!("trade {} is already settled", id))
            }
            TradeSettlementError::DatabaseError(e) => AppError::internal(&e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()>::error(&self.code, &self.message);
        (self.status, Json(body)).into_response()
    }
}
