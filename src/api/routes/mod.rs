use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::AppState;

pub fn create_router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/orderbook", get(handlers::orderbook::get_orderbook))
        .route("/orders", post(handlers::order::create_order))
        .route("/orders", get(handlers::order::list_orders))
        .route("/orders/:order_id", get(handlers::order::get_order))
        .route("/orders/:order_id", patch(handlers::order::modify_order))
        .route("/orders/:order_id", delete(handlers::order::cancel_order))
        .route("/trades", get(handlers::trade::list_trades))
        .route("/trades/:trade_id", get(handlers::trade::get_trade))
        .route("/trades/:trade_id/settle", post(handlers::trade::settle_trade))
}
