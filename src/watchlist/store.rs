use crate::error::AppError;
use crate::market::types::TradeTick;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Rolling history bound per stock. Oldest points are evicted first.
pub const MAX_HISTORY_POINTS: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub time: i64,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchedStock {
    pub symbol: String,
    pub name: String,
    pub alert_price: f64,
    pub current_price: f64,
    /// Day change at snapshot time. Ticks do not carry it, so it is never
    /// refreshed after creation.
    pub change_percent: f64,
    pub history: VecDeque<PricePoint>,
}

impl WatchedStock {
    pub fn new(
        symbol: String,
        name: String,
        alert_price: f64,
        current_price: f64,
        change_percent: f64,
        seeded_at: i64,
    ) -> Self {
        let mut history = VecDeque::with_capacity(MAX_HISTORY_POINTS);
        history.push_back(PricePoint {
            time: seeded_at,
            price: current_price,
        });

        Self {
            symbol,
            name,
            alert_price,
            current_price,
            change_percent,
            history,
        }
    }

    pub fn is_above_alert(&self) -> bool {
        self.current_price > self.alert_price
    }

    fn apply_tick(&mut self, point: PricePoint) {
        self.current_price = point.price;
        self.history.push_back(point);
        if self.history.len() > MAX_HISTORY_POINTS {
            self.history.pop_front();
        }
    }
}

pub type TradeTickMap = HashMap<String, PricePoint>;

/// Collapses a tick batch into the latest tick per symbol. Last write wins
/// by input order.
pub fn trade_tick_map(ticks: &[TradeTick]) -> TradeTickMap {
    ticks
        .iter()
        .map(|tick| {
            (
                tick.symbol.clone(),
                PricePoint {
                    time: tick.time,
                    price: tick.price,
                },
            )
        })
        .collect()
}

/// Insertion-ordered set of watched stocks. Symbols are case-sensitive
/// unique keys.
#[derive(Debug, Clone, Default)]
pub struct WatchlistStore {
    stocks: Vec<WatchedStock>,
}

impl WatchlistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, stock: WatchedStock) -> Result<(), AppError> {
        if self.stocks.iter().any(|entry| entry.symbol == stock.symbol) {
            return Err(AppError::DuplicateSymbol(stock.symbol));
        }
        self.stocks.push(stock);
        Ok(())
    }

    pub fn remove(&mut self, symbol: &str) -> bool {
        let before = self.stocks.len();
        self.stocks.retain(|stock| stock.symbol != symbol);
        self.stocks.len() != before
    }

    /// Applies the latest tick per symbol to every matching stock and
    /// returns the symbols that changed. Stocks without a matching tick are
    /// left untouched.
    pub fn apply_ticks(&mut self, ticks: &TradeTickMap) -> Vec<String> {
        let mut updated = Vec::new();
        for stock in &mut self.stocks {
            if let Some(point) = ticks.get(&stock.symbol) {
                stock.apply_tick(*point);
                updated.push(stock.symbol.clone());
            }
        }
        updated
    }

    pub fn list(&self) -> Vec<WatchedStock> {
        self.stocks.clone()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.stocks.iter().map(|stock| stock.symbol.clone()).collect()
    }

    pub fn get(&self, symbol: &str) -> Option<&WatchedStock> {
        self.stocks.iter().find(|stock| stock.symbol == symbol)
    }

    pub fn len(&self) -> usize {
        self.stocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stocks.is_empty()
    }
}
