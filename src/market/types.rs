use crate::error::AppError;
use crate::market::finnhub::{FINNHUB_REST_BASE_URL, FINNHUB_WS_BASE_URL};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_RESUBSCRIBE_STAGGER_MS: u64 = 100;
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 50;
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 300_000;
pub const MIN_RECONNECT_DELAY_MS: u64 = 50;
pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;
pub const MAX_RESUBSCRIBE_STAGGER_MS: u64 = 5_000;

/// Suggestion list surfaced by the add-stock form.
pub const POPULAR_SYMBOLS: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "TSLA", "JPM", "JNJ", "WMT", "V", "DIS",
    "NFLX", "PYPL", "KO", "PEP",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatusSnapshot {
    pub state: ConnectionState,
    /// Total reconnect attempts so far. Diagnostics only, never resets.
    pub reconnect_attempt: u64,
    pub reason: Option<String>,
}

impl StreamStatusSnapshot {
    pub fn closed(reason: Option<String>) -> Self {
        Self {
            state: ConnectionState::Closed,
            reconnect_attempt: 0,
            reason,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FeedArgs {
    pub token: String,
    pub ws_base_url: Option<String>,
    pub rest_base_url: Option<String>,
    pub heartbeat_interval_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub resubscribe_stagger_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub token: String,
    pub ws_base_url: String,
    pub rest_base_url: String,
    pub heartbeat_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub resubscribe_stagger_ms: u64,
}

impl FeedArgs {
    pub fn normalize(self) -> Result<FeedConfig, AppError> {
        let token = self.token.trim().to_string();
        if token.is_empty() {
            return Err(AppError::InvalidArgument(
                "token must be non-empty".to_string(),
            ));
        }

        let ws_base_url = self
            .ws_base_url
            .unwrap_or_else(|| FINNHUB_WS_BASE_URL.to_string());
        let rest_base_url = self
            .rest_base_url
            .unwrap_or_else(|| FINNHUB_REST_BASE_URL.to_string());

        let heartbeat_interval_ms = self
            .heartbeat_interval_ms
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        if !(MIN_HEARTBEAT_INTERVAL_MS..=MAX_HEARTBEAT_INTERVAL_MS).contains(&heartbeat_interval_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "heartbeatIntervalMs must be between {MIN_HEARTBEAT_INTERVAL_MS} and {MAX_HEARTBEAT_INTERVAL_MS}"
            )));
        }

        let reconnect_delay_ms = self.reconnect_delay_ms.unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        if !(MIN_RECONNECT_DELAY_MS..=MAX_RECONNECT_DELAY_MS).contains(&reconnect_delay_ms) {
            return Err(AppError::InvalidArgument(format!(
                "reconnectDelayMs must be between {MIN_RECONNECT_DELAY_MS} and {MAX_RECONNECT_DELAY_MS}"
            )));
        }

        let resubscribe_stagger_ms = self
            .resubscribe_stagger_ms
            .unwrap_or(DEFAULT_RESUBSCRIBE_STAGGER_MS);
        if resubscribe_stagger_ms > MAX_RESUBSCRIBE_STAGGER_MS {
            return Err(AppError::InvalidArgument(format!(
                "resubscribeStaggerMs must be at most {MAX_RESUBSCRIBE_STAGGER_MS}"
            )));
        }

        Ok(FeedConfig {
            token,
            ws_base_url,
            rest_base_url,
            heartbeat_interval_ms,
            reconnect_delay_ms,
            resubscribe_stagger_ms,
        })
    }
}

/// Outbound control frames, serialized as `{"type":...}` JSON text frames.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Subscribe { symbol: String },
    Unsubscribe { symbol: String },
    Ping,
}

#[derive(Debug, Deserialize)]
pub struct TradeTickWire {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: f64,
    #[serde(rename = "t")]
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeTick {
    pub symbol: String,
    pub price: f64,
    pub time: i64,
}

impl TryFrom<TradeTickWire> for TradeTick {
    type Error = AppError;

    fn try_from(value: TradeTickWire) -> Result<Self, Self::Error> {
        if !value.price.is_finite() {
            return Err(AppError::InvalidArgument(
                "trade price must be finite".to_string(),
            ));
        }

        Ok(Self {
            symbol: value.symbol,
            price: value.price,
            time: value.time,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum FeedFrameWire {
    Ping,
    Trade { data: Vec<TradeTickWire> },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, PartialEq)]
pub enum FeedFrame {
    Ping,
    Trade(Vec<TradeTick>),
    Unknown,
}

pub fn parse_feed_frame(payload: &mut [u8]) -> Result<FeedFrame, AppError> {
    let wire: FeedFrameWire = simd_json::serde::from_slice(payload)?;
    match wire {
        FeedFrameWire::Ping => Ok(FeedFrame::Ping),
        FeedFrameWire::Trade { data } => {
            let mut ticks = Vec::with_capacity(data.len());
            for tick in data {
                ticks.push(tick.try_into()?);
            }
            Ok(FeedFrame::Trade(ticks))
        }
        FeedFrameWire::Unknown => Ok(FeedFrame::Unknown),
    }
}

#[derive(Debug, Deserialize)]
pub struct QuoteWire {
    #[serde(rename = "c")]
    pub current_price: f64,
    #[serde(rename = "dp")]
    pub change_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteSnapshot {
    pub current_price: f64,
    pub change_percent: f64,
}

impl TryFrom<QuoteWire> for QuoteSnapshot {
    type Error = AppError;

    fn try_from(value: QuoteWire) -> Result<Self, Self::Error> {
        if !value.current_price.is_finite() {
            return Err(AppError::InvalidArgument(
                "quote price must be finite".to_string(),
            ));
        }

        let change_percent = value.change_percent.unwrap_or(0.0);
        if !change_percent.is_finite() {
            return Err(AppError::InvalidArgument(
                "quote change percent must be finite".to_string(),
            ));
        }

        Ok(Self {
            current_price: value.current_price,
            change_percent,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ProfileWire {
    #[serde(default)]
    pub name: Option<String>,
}

pub fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
