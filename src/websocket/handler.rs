//! WebSocket Handler
//!
//! Public market-data feed: trades and orderbook snapshots, pushed from the
//! snapshot publisher's broadcast channels. No auth, no private channels.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Ping,
}

#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    Trade {
        trades: Vec<crate::services::matching::TradeRecord>,
        sequence: u64,
        timestamp: i64,
    },
    Orderbook {
        bids: Vec<[String; 2]>,
        asks: Vec<[String; 2]>,
        sequence: u64,
        timestamp: i64,
    },
    Pong,
    Error { code: String, message: String },
}

const CHANNEL_TRADES: &str = "trades";
const CHANNEL_ORDERBOOK: &str = "orderbook";

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscriptions: HashSet<String> = HashSet::new();

    let mut trade_rx = state.snapshot_publisher.subscribe_trade_batches();
    let mut orderbook_rx = state.snapshot_publisher.subscribe_orderbook();

    crate::metrics::set_ws_connections(1);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        crate::metrics::record_ws_message_received();
                        handle_client_message(&text, &mut subscriptions, &mut sender).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::warn!("websocket disconnected: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            trade = trade_rx.recv() => {
                match trade {
                    Ok(batch) => {
                        if subscriptions.contains(CHANNEL_TRADES) && !batch.trades.is_empty() {
                            let msg = ServerMessage::Trade {
                                trades: batch.trades,
                                sequence: batch.sequence,
                                timestamp: batch.timestamp,
                            };
                            let _ = sender.send(Message::Text(serde_json::to_string(&msg).unwrap())).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("trade batch receiver lagged {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            update = orderbook_rx.recv() => {
                match update {
                    Ok(update) => {
                        if subscriptions.contains(CHANNEL_ORDERBOOK) {
                            let msg = ServerMessage::Orderbook {
                                bids: update.bids,
                                asks: update.asks,
                                sequence: update.sequence,
                                timestamp: update.timestamp,
                            };
                            let _ = sender.send(Message::Text(serde_json::to_string(&msg).unwrap())).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("orderbook update receiver lagged {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    crate::metrics::set_ws_connections(-1);
    tracing::info!("websocket connection closed");
}

async fn handle_client_message(
    text: &str,
    subscriptions: &mut HashSet<String>,
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
) {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            let response = ServerMessage::Error {
                code: "INVALID_MESSAGE".to_string(),
                message: format!("failed to parse message: {}", e),
            };
            let _ = sender.send(Message::Text(serde_json::to_string(&response).unwrap())).await;
            return;
        }
    };

    match client_msg {
        ClientMessage::Subscribe { channel } => {
            subscriptions.insert(channel.clone());
            let response = ServerMessage::Subscribed { channel };
            let _ = sender.send(Message::Text(serde_json::to_string(&response).unwrap())).await;
        }
        ClientMessage::Unsubscribe { channel } => {
            subscriptions.remove(&channel);
            let response = ServerMessage::Unsubscribed { channel };
            let _ = sender.send(Message::Text(serde_json::to_string(&response).unwrap())).await;
        }
        ClientMessage::Ping => {
            let _ = sender.send(Message::Text(serde_json::to_string(&ServerMessage::Pong).unwrap())).await;
        }
    }
}
