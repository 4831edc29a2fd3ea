use crate::error::AppError;
use crate::market::types::{FeedConfig, ProfileWire, QuoteSnapshot, QuoteWire};
use reqwest::Client;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

pub const FINNHUB_WS_BASE_URL: &str = "wss://ws.finnhub.io";
pub const FINNHUB_REST_BASE_URL: &str = "https://finnhub.io/api/v1";

pub type FeedWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn ws_endpoint(config: &FeedConfig) -> String {
    format!("{}?token={}", config.ws_base_url, config.token)
}

fn quote_endpoint(config: &FeedConfig, symbol: &str) -> String {
    format!(
        "{}/quote?symbol={symbol}&token={}",
        config.rest_base_url, config.token
    )
}

fn profile_endpoint(config: &FeedConfig, symbol: &str) -> String {
    format!(
        "{}/stock/profile2?symbol={symbol}&token={}",
        config.rest_base_url, config.token
    )
}

pub async fn connect_feed_stream(config: &FeedConfig) -> Result<FeedWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(16 << 20),
        max_frame_size: Some(4 << 20),
        ..Default::default()
    };

    let request = ws_endpoint(config);
    let (stream, _) = connect_async_with_config(request, Some(ws_config), true).await?;
    Ok(stream)
}

pub async fn fetch_quote_snapshot(
    client: &Client,
    config: &FeedConfig,
    symbol: &str,
) -> Result<QuoteSnapshot, AppError> {
    let endpoint = quote_endpoint(config, symbol);
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let payload = response.json::<QuoteWire>().await?;
    payload.try_into()
}

/// Returns the company's display name, or `None` when the profile resolves
/// to no known entity (absent or empty name).
pub async fn fetch_company_profile(
    client: &Client,
    config: &FeedConfig,
    symbol: &str,
) -> Result<Option<String>, AppError> {
    let endpoint = profile_endpoint(config, symbol);
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let payload = response.json::<ProfileWire>().await?;
    Ok(payload.name.filter(|name| !name.is_empty()))
}
