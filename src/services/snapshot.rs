//! Snapshot Publisher (C6)
//!
//! Periodic, lane-consistent book snapshots and batched trade updates for
//! WebSocket subscribers. Ticks on an interval, takes a linearizable read of
//! the book through the matching engine's mutex, and broadcasts — unless
//! nobody is listening, in which case the tick is a no-op.

use crate::services::matching::{MatchingEngine, OrderbookUpdate, TradeRecord, TradeSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const CHANNEL_CAPACITY: usize = 256;

pub struct SnapshotPublisher {
    orderbook_tx: broadcast::Sender<OrderbookUpdate>,
    trade_batch_tx: broadcast::Sender<TradeSnapshot>,
}

impl SnapshotPublisher {
    pub fn new() -> Arc<Self> {
        let (orderbook_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (trade_batch_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Arc::new(Self {
            orderbook_tx,
            trade_batch_tx,
        })
    }

    pub fn subscribe_orderbook(&self) -> broadcast::Receiver<OrderbookUpdate> {
        self.orderbook_tx.subscribe()
    }

    pub fn subscribe_trade_batches(&self) -> broadcast::Receiver<TradeSnapshot> {
        self.trade_batch_tx.subscribe()
    }

    /// Spawn the background publisher loop. `depth` is the number of price
    /// levels per side included in each book snapshot.
    pub fn spawn(self: Arc<Self>, engine: Arc<MatchingEngine>, cadence: Duration, depth: usize) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("snapshot publisher started, cadence={:?}, depth={}", cadence, depth);

            let mut trade_rx = engine.subscribe_trades();
            let mut ticker = tokio::time::interval(cadence);
            let mut pending_trades: Vec<TradeRecord> = Vec::new();
            let mut sequence: u64 = 0;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sequence += 1;

                        if self.orderbook_tx.receiver_count() > 0 {
                            let snap = engine.get_orderbook(depth);
                            crate::metrics::set_orderbook_depth("bid", snap.bids.len() as i64);
                            crate::metrics::set_orderbook_depth("ask", snap.asks.len() as i64);
                            if let (Some(best_bid), Some(best_ask)) = (snap.bids.first(), snap.asks.first()) {
                                if let (Ok(bid), Ok(ask)) = (best_bid[0].parse::<f64>(), best_ask[0].parse::<f64>()) {
                                    crate::metrics::set_orderbook_spread(ask - bid);
                                }
                            }
                            let update = OrderbookUpdate {
                                bids: snap.bids,
                                asks: snap.asks,
                                sequence,
                                timestamp: snap.timestamp,
                            };
                            let _ = self.orderbook_tx.send(update);
                        }

                        if !pending_trades.is_empty() {
                            if self.trade_batch_tx.receiver_count() > 0 {
                                let batch = TradeSnapshot {
                                    trades: std::mem::take(&mut pending_trades),
                                    sequence,
                                    timestamp: chrono::Utc::now().timestamp_millis(),
                                };
                                let _ = self.trade_batch_tx.send(batch);
                            } else {
                                pending_trades.clear();
                            }
                        }
                    }
                    recv = trade_rx.recv() => {
                        match recv {
                            Ok(event) => pending_trades.push(TradeRecord::from(&event)),
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("snapshot publisher lagged {} trade events", n);
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                info!("trade channel closed, stopping snapshot publisher");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }
}
