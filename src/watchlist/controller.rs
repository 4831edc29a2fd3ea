use crate::error::AppError;
use crate::market::finnhub::{fetch_company_profile, fetch_quote_snapshot};
use crate::market::stream::{run_feed_stream, DashboardEvent, FeedCommand};
use crate::market::types::{
    now_unix_ms, ConnectionState, FeedArgs, FeedConfig, StreamStatusSnapshot,
};
use crate::state::FeedStreamHandle;
use crate::watchlist::store::{WatchedStock, WatchlistStore};
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Orchestrates the feed runtime and the watchlist store: lookups on add,
/// subscription management, and resubscription after every reconnect.
///
/// This is the rendering boundary. A UI reads snapshots via [`watchlist`]
/// and [`status`], reacts to [`subscribe_events`], and mutates through
/// [`add_stock`] / [`remove_stock`].
///
/// [`watchlist`]: StockDashboard::watchlist
/// [`status`]: StockDashboard::status
/// [`subscribe_events`]: StockDashboard::subscribe_events
/// [`add_stock`]: StockDashboard::add_stock
/// [`remove_stock`]: StockDashboard::remove_stock
pub struct StockDashboard {
    config: FeedConfig,
    http_client: Client,
    store: Arc<Mutex<WatchlistStore>>,
    status_rx: watch::Receiver<StreamStatusSnapshot>,
    commands: mpsc::Sender<FeedCommand>,
    events: broadcast::Sender<DashboardEvent>,
    handle: FeedStreamHandle,
}

impl StockDashboard {
    /// Spawns the feed runtime and the resubscriber. Must be called from
    /// within a tokio runtime.
    pub fn start(args: FeedArgs) -> Result<Self, AppError> {
        let config = args.normalize()?;
        let store = Arc::new(Mutex::new(WatchlistStore::new()));
        let (status_tx, status_rx) =
            watch::channel(StreamStatusSnapshot::closed(Some("feed idle".to_string())));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let cancellation_token = CancellationToken::new();

        let stream_task = tokio::spawn(run_feed_stream(
            config.clone(),
            Arc::clone(&store),
            status_tx,
            events.clone(),
            command_rx,
            cancellation_token.clone(),
        ));
        let resubscribe_task = tokio::spawn(run_resubscriber(
            status_rx.clone(),
            Arc::clone(&store),
            command_tx.clone(),
            config.resubscribe_stagger_ms,
            cancellation_token.clone(),
        ));

        Ok(Self {
            config,
            http_client: Client::new(),
            store,
            status_rx,
            commands: command_tx,
            events,
            handle: FeedStreamHandle {
                cancellation_token,
                stream_task,
                resubscribe_task,
            },
        })
    }

    /// Looks the symbol up (quote + profile, jointly), inserts it into the
    /// watchlist and subscribes on the stream. Fails without mutation on an
    /// unknown or already-watched symbol.
    pub async fn add_stock(&self, symbol: &str, alert_price: f64) -> Result<WatchedStock, AppError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(AppError::InvalidArgument(
                "symbol must be non-empty".to_string(),
            ));
        }
        if !alert_price.is_finite() || alert_price <= 0.0 {
            return Err(AppError::InvalidArgument(
                "alertPrice must be a finite positive number".to_string(),
            ));
        }

        let quote_future = fetch_quote_snapshot(&self.http_client, &self.config, symbol);
        let profile_future = fetch_company_profile(&self.http_client, &self.config, symbol);
        let (quote, display_name) = tokio::join!(quote_future, profile_future);
        let quote = quote?;
        let display_name =
            display_name?.ok_or_else(|| AppError::UnknownSymbol(symbol.to_string()))?;

        if self.handle.cancellation_token.is_cancelled() {
            return Err(AppError::Disposed);
        }

        let stock = WatchedStock::new(
            symbol.to_string(),
            display_name,
            alert_price,
            quote.current_price,
            quote.change_percent,
            now_unix_ms(),
        );
        self.store.lock().add(stock.clone())?;
        let _ = self.events.send(DashboardEvent::WatchlistChanged);

        // Best effort: if the feed is not open yet, the resubscriber picks
        // the symbol up on the next open transition.
        self.subscribe_symbol(symbol).await;
        Ok(stock)
    }

    /// Unsubscribes (best effort) and drops the stock. Returns whether
    /// anything was removed.
    pub async fn remove_stock(&self, symbol: &str) -> bool {
        if self.status_rx.borrow().is_open() {
            let _ = self
                .commands
                .send(FeedCommand::Unsubscribe(symbol.to_string()))
                .await;
        }

        let removed = self.store.lock().remove(symbol);
        if removed {
            let _ = self.events.send(DashboardEvent::WatchlistChanged);
        }
        removed
    }

    /// Watchlist snapshot in insertion order.
    pub fn watchlist(&self) -> Vec<WatchedStock> {
        self.store.lock().list()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    pub fn status(&self) -> StreamStatusSnapshot {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<StreamStatusSnapshot> {
        self.status_rx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    /// Intentional close: stops the heartbeat and any pending reconnect,
    /// sends a close frame, and waits for both tasks to finish.
    pub async fn shutdown(mut self) {
        self.handle.cancellation_token.cancel();
        let _ = (&mut self.handle.stream_task).await;
        let _ = (&mut self.handle.resubscribe_task).await;
    }

    async fn subscribe_symbol(&self, symbol: &str) {
        if !self.status_rx.borrow().is_open() {
            warn!("cannot subscribe to {symbol}, feed is not open");
            return;
        }
        if self
            .commands
            .send(FeedCommand::Subscribe(symbol.to_string()))
            .await
            .is_err()
        {
            warn!("feed runtime is gone, dropping subscribe for {symbol}");
        }
    }
}

/// Replays subscriptions after every open transition. The feed keeps no
/// subscription memory across reconnects, so this task is what restores
/// them; sends are staggered to avoid bursting the feed's rate limiter.
async fn run_resubscriber(
    mut status_rx: watch::Receiver<StreamStatusSnapshot>,
    store: Arc<Mutex<WatchlistStore>>,
    commands: mpsc::Sender<FeedCommand>,
    stagger_ms: u64,
    cancel_token: CancellationToken,
) {
    let mut was_open = status_rx.borrow().is_open();

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let is_open = status_rx.borrow_and_update().is_open();
        if is_open && !was_open {
            let symbols = store.lock().symbols();
            debug!("feed open, resubscribing {} symbols", symbols.len());

            for (index, symbol) in symbols.into_iter().enumerate() {
                if index > 0 {
                    tokio::select! {
                        _ = cancel_token.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_millis(stagger_ms)) => {}
                    }
                }
                if commands.send(FeedCommand::Subscribe(symbol)).await.is_err() {
                    return;
                }
            }
        }
        was_open = is_open;
    }
}
