//! Orderbook Implementation
//!
//! Price-level index (C2) + resting-order index (C3) + the in-book half of
//! the matching kernel (C4): walking opposing levels, FIFO fill, and
//! inserting the post-match residue back into the book.

use super::types::*;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use uuid::Uuid;

/// A single-instrument orderbook.
pub struct Orderbook {
    /// Bids sorted by price descending (highest first)
    bids: RwLock<BTreeMap<PriceLevel, VecDeque<OrderEntry>>>,

    /// Asks sorted by price ascending (lowest first)
    asks: RwLock<BTreeMap<PriceLevel, VecDeque<OrderEntry>>>,

    /// Order ID to (side, price_level) mapping for O(1) id lookup
    order_index: DashMap<Uuid, (Side, PriceLevel)>,

    /// Last trade price, in cents (0 = no trade yet)
    last_trade_price: AtomicI64,

    /// Resting order count
    order_count: AtomicI64,
}

impl Orderbook {
    pub fn new() -> Self {
        Self {
            bids: RwLock::new(BTreeMap::new()),
            asks: RwLock::new(BTreeMap::new()),
            order_index: DashMap::new(),
            last_trade_price: AtomicI64::new(0),
            order_count: AtomicI64::new(0),
        }
    }

    /// Get total resting order count
    pub fn order_count(&self) -> i64 {
        self.order_count.load(AtomicOrdering::Relaxed)
    }

    /// Get last trade price
    pub fn last_trade_price(&self) -> Option<Decimal> {
        let raw = self.last_trade_price.load(AtomicOrdering::Relaxed);
        if raw == 0 {
            None
        } else {
            Some(PriceLevel::from_raw(raw).to_decimal())
        }
    }

    /// Set last trade price
    pub fn set_last_trade_price(&self, price: Decimal) {
        let raw = PriceLevel::from_decimal(price).raw();
        self.last_trade_price.store(raw, AtomicOrdering::Relaxed);
    }

    /// Get best bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        let bids = self.bids.read();
        bids.keys().next_back().map(|p| p.to_decimal())
    }

    /// Get best ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        let asks = self.asks.read();
        asks.keys().next().map(|p| p.to_decimal())
    }

    /// Get spread
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Insert a resting order at the tail of its price level.
    pub fn add_order(&self, entry: OrderEntry) {
        let price_level = PriceLevel::from_decimal(entry.price);
        let side = entry.side;
        let order_id = entry.id;

        match side {
            Side::Buy => {
                let mut bids = self.bids.write();
                bids.entry(price_level).or_insert_with(VecDeque::new).push_back(entry);
            }
            Side::Sell => {
                let mut asks = self.asks.write();
                asks.entry(price_level).or_insert_with(VecDeque::new).push_back(entry);
            }
        }

        self.order_index.insert(order_id, (side, price_level));
        self.order_count.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Cancel an order by id: remove from the index, then excise it from its
    /// price level's queue (O(n) in that level's depth).
    pub fn cancel_order(&self, order_id: Uuid) -> Option<OrderEntry> {
        let (side, price_level) = self.order_index.remove(&order_id)?.1;

        let entry = match side {
            Side::Buy => {
                let mut bids = self.bids.write();
                Self::remove_from_level(&mut bids, &price_level, order_id)
            }
            Side::Sell => {
                let mut asks = self.asks.write();
                Self::remove_from_level(&mut asks, &price_level, order_id)
            }
        };

        if entry.is_some() {
            self.order_count.fetch_sub(1, AtomicOrdering::Relaxed);
        }

        entry
    }

    fn remove_from_level(
        book_side: &mut BTreeMap<PriceLevel, VecDeque<OrderEntry>>,
        price_level: &PriceLevel,
        order_id: Uuid,
    ) -> Option<OrderEntry> {
        let queue = book_side.get_mut(price_level)?;
        let pos = queue.iter().position(|o| o.id == order_id)?;
        let entry = queue.remove(pos);
        if queue.is_empty() {
            book_side.remove(price_level);
        }
        entry
    }

    /// Match an incoming order against the book, then insert any unfilled
    /// residue back in as a resting order (step 3 of the matching kernel).
    /// Returns (trades, residue order entry if anything remains resting,
    /// fills applied to resting maker orders so the caller can carry those
    /// forward into the makers' own history records).
    pub fn match_and_rest(
        &self,
        taker_order_id: Uuid,
        taker_owner_id: Option<String>,
        side: Side,
        mut quantity: Decimal,
        limit_price: Decimal,
        timestamp: i64,
    ) -> (Vec<TradeExecution>, Option<OrderEntry>, Vec<MakerFill>) {
        let original_quantity = quantity;
        let mut trades = Vec::new();
        let mut maker_fills = Vec::new();

        match side {
            Side::Buy => {
                let mut asks = self.asks.write();
                let price_levels: Vec<PriceLevel> = asks.keys().cloned().collect();

                for price_level in price_levels {
                    if quantity <= Decimal::ZERO {
                        break;
                    }
                    if price_level.to_decimal() > limit_price {
                        break;
                    }

                    if let Some(queue) = asks.get_mut(&price_level) {
                        Self::fill_against_queue(
                            queue,
                            taker_order_id,
                            &mut quantity,
                            &mut trades,
                            &mut maker_fills,
                            &self.order_index,
                            &self.order_count,
                        );
                        if queue.is_empty() {
                            asks.remove(&price_level);
                        }
                    }
                }
            }
            Side::Sell => {
                let mut bids = self.bids.write();
                let price_levels: Vec<PriceLevel> = bids.keys().rev().cloned().collect();

                for price_level in price_levels {
                    if quantity <= Decimal::ZERO {
                        break;
                    }
                    if price_level.to_decimal() < limit_price {
                        break;
                    }

                    if let Some(queue) = bids.get_mut(&price_level) {
                        Self::fill_against_queue(
                            queue,
                            taker_order_id,
                            &mut quantity,
                            &mut trades,
                            &mut maker_fills,
                            &self.order_index,
                            &self.order_count,
                        );
                        if queue.is_empty() {
                            bids.remove(&price_level);
                        }
                    }
                }
            }
        }

        if let Some(last) = trades.last() {
            self.set_last_trade_price(last.price);
        }

        let residue = if quantity > Decimal::ZERO {
            let entry = OrderEntry {
                id: taker_order_id,
                owner_id: taker_owner_id,
                price: limit_price,
                original_quantity,
                remaining_quantity: quantity,
                side,
                timestamp,
            };
            self.add_order(entry.clone());
            Some(entry)
        } else {
            None
        };

        (trades, residue, maker_fills)
    }

    fn fill_against_queue(
        queue: &mut VecDeque<OrderEntry>,
        taker_order_id: Uuid,
        quantity: &mut Decimal,
        trades: &mut Vec<TradeExecution>,
        maker_fills: &mut Vec<MakerFill>,
        order_index: &DashMap<Uuid, (Side, PriceLevel)>,
        order_count: &AtomicI64,
    ) {
        let now = chrono::Utc::now().timestamp_millis();

        while let Some(maker) = queue.front_mut() {
            if *quantity <= Decimal::ZERO {
                break;
            }

            let trade_quantity = (*quantity).min(maker.remaining_quantity);
            let trade_price = maker.price;

            trades.push(TradeExecution {
                trade_id: Uuid::new_v4(),
                maker_order_id: maker.id,
                taker_order_id,
                maker_owner_id: maker.owner_id.clone(),
                price: trade_price,
                quantity: trade_quantity,
                timestamp: now,
            });

            *quantity -= trade_quantity;
            maker.remaining_quantity -= trade_quantity;

            let is_terminal = maker.remaining_quantity <= Decimal::ZERO;
            maker_fills.push(MakerFill {
                order_id: maker.id,
                owner_id: maker.owner_id.clone(),
                side: maker.side,
                price: maker.price,
                trade_quantity,
                remaining_quantity: maker.remaining_quantity.max(Decimal::ZERO),
                is_terminal,
                timestamp: now,
            });

            if is_terminal {
                let maker_id = maker.id;
                queue.pop_front();
                order_index.remove(&maker_id);
                order_count.fetch_sub(1, AtomicOrdering::Relaxed);
            }
        }
    }

    /// Price/aggregate-quantity snapshot of both sides, `depth` levels each.
    pub fn snapshot(&self, depth: usize, sequence: u64) -> OrderbookSnapshot {
        let mut bids_vec: Vec<[String; 2]> = Vec::new();
        let mut asks_vec: Vec<[String; 2]> = Vec::new();

        {
            let bids = self.bids.read();
            for (price_level, orders) in bids.iter().rev().take(depth) {
                let total: Decimal = orders.iter().map(|o| o.remaining_quantity).sum();
                bids_vec.push([price_level.to_decimal().to_string(), total.to_string()]);
            }
        }

        {
            let asks = self.asks.read();
            for (price_level, orders) in asks.iter().take(depth) {
                let total: Decimal = orders.iter().map(|o| o.remaining_quantity).sum();
                asks_vec.push([price_level.to_decimal().to_string(), total.to_string()]);
            }
        }

        OrderbookSnapshot {
            bids: bids_vec,
            asks: asks_vec,
            last_price: self.last_trade_price(),
            sequence,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Total resting bid volume
    pub fn bid_depth(&self) -> Decimal {
        self.bids.read().values().flat_map(|q| q.iter()).map(|o| o.remaining_quantity).sum()
    }

    /// Total resting ask volume
    pub fn ask_depth(&self) -> Decimal {
        self.asks.read().values().flat_map(|q| q.iter()).map(|o| o.remaining_quantity).sum()
    }

    pub fn has_order(&self, order_id: &Uuid) -> bool {
        self.order_index.contains_key(order_id)
    }

    pub fn get_order(&self, order_id: &Uuid) -> Option<OrderEntry> {
        let (side, price_level) = self.order_index.get(order_id)?.clone();

        match side {
            Side::Buy => self.bids.read().get(&price_level)?.iter().find(|o| o.id == *order_id).cloned(),
            Side::Sell => self.asks.read().get(&price_level)?.iter().find(|o| o.id == *order_id).cloned(),
        }
    }
}

impl Default for Orderbook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_test_order(id: Uuid, price: Decimal, quantity: Decimal, side: Side) -> OrderEntry {
        OrderEntry {
            id,
            owner_id: Some("owner-1".to_string()),
            price,
            original_quantity: quantity,
            remaining_quantity: quantity,
            side,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[test]
    fn test_add_and_cancel_order() {
        let book = Orderbook::new();
        let order_id = Uuid::new_v4();
        let order = create_test_order(order_id, dec!(100.0), dec!(1.0), Side::Buy);

        book.add_order(order);
        assert_eq!(book.order_count(), 1);
        assert!(book.has_order(&order_id));

        let cancelled = book.cancel_order(order_id);
        assert!(cancelled.is_some());
        assert_eq!(book.order_count(), 0);
        assert!(!book.has_order(&order_id));
    }

    #[test]
    fn test_best_bid_ask() {
        let book = Orderbook::new();

        book.add_order(create_test_order(Uuid::new_v4(), dec!(100.0), dec!(1.0), Side::Buy));
        book.add_order(create_test_order(Uuid::new_v4(), dec!(101.0), dec!(1.0), Side::Buy));
        book.add_order(create_test_order(Uuid::new_v4(), dec!(102.0), dec!(1.0), Side::Sell));
        book.add_order(create_test_order(Uuid::new_v4(), dec!(103.0), dec!(1.0), Side::Sell));

        assert_eq!(book.best_bid(), Some(dec!(101.0)));
        assert_eq!(book.best_ask(), Some(dec!(102.0)));
        assert_eq!(book.spread(), Some(dec!(1.0)));
    }

    #[test]
    fn test_match_buy_order() {
        let book = Orderbook::new();

        let ask1_id = Uuid::new_v4();
        book.add_order(create_test_order(ask1_id, dec!(100.0), dec!(1.0), Side::Sell));

        let ask2_id = Uuid::new_v4();
        book.add_order(create_test_order(ask2_id, dec!(101.0), dec!(2.0), Side::Sell));

        let taker_id = Uuid::new_v4();
        let (trades, residue, maker_fills) = book.match_and_rest(
            taker_id,
            Some("taker".to_string()),
            Side::Buy,
            dec!(1.5),
            dec!(101.0),
            chrono::Utc::now().timestamp_millis(),
        );

        assert_eq!(trades.len(), 2);
        assert!(residue.is_none());
        assert_eq!(maker_fills.len(), 2);
        assert!(maker_fills[0].is_terminal);
        assert!(!maker_fills[1].is_terminal);
        assert_eq!(maker_fills[1].remaining_quantity, dec!(1.5));

        assert_eq!(trades[0].price, dec!(100.0));
        assert_eq!(trades[0].quantity, dec!(1.0));

        assert_eq!(trades[1].price, dec!(101.0));
        assert_eq!(trades[1].quantity, dec!(0.5));

        assert!(!book.has_order(&ask1_id));
        assert!(book.has_order(&ask2_id));
    }

    #[test]
    fn test_match_leaves_residue_resting() {
        let book = Orderbook::new();
        book.add_order(create_test_order(Uuid::new_v4(), dec!(100.0), dec!(1.0), Side::Sell));

        let taker_id = Uuid::new_v4();
        let (trades, residue, maker_fills) = book.match_and_rest(
            taker_id,
            Some("taker".to_string()),
            Side::Buy,
            dec!(2.5),
            dec!(100.0),
            chrono::Utc::now().timestamp_millis(),
        );

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].quantity, dec!(1.0));
        assert_eq!(maker_fills.len(), 1);
        assert!(maker_fills[0].is_terminal);
        let residue = residue.expect("unfilled remainder should rest in the book");
        assert_eq!(residue.remaining_quantity, dec!(1.5));
        assert_eq!(residue.original_quantity, dec!(2.5));
        assert!(book.has_order(&taker_id));
    }

    #[test]
    fn test_snapshot() {
        let book = Orderbook::new();

        book.add_order(create_test_order(Uuid::new_v4(), dec!(100.0), dec!(1.0), Side::Buy));
        book.add_order(create_test_order(Uuid::new_v4(), dec!(100.0), dec!(2.0), Side::Buy));
        book.add_order(create_test_order(Uuid::new_v4(), dec!(102.0), dec!(1.5), Side::Sell));

        let snapshot = book.snapshot(10, 1);

        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.bids.len(), 1);
        assert_eq!(snapshot.asks.len(), 1);
        assert_eq!(snapshot.bids[0][1], "3.0");
        assert_eq!(snapshot.asks[0][1], "1.5");
    }
}
