use crate::error::AppError;
use crate::market::finnhub::{connect_feed_stream, FeedWsStream};
use crate::market::types::{
    parse_feed_frame, ConnectionState, ControlFrame, FeedConfig, FeedFrame, StreamStatusSnapshot,
};
use crate::watchlist::store::{trade_tick_map, WatchlistStore};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Control requests from the dashboard to the feed runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedCommand {
    Subscribe(String),
    Unsubscribe(String),
}

/// Events published to the rendering boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    Status(StreamStatusSnapshot),
    WatchlistChanged,
    PricesUpdated(Vec<String>),
}

#[derive(Debug, PartialEq)]
enum StreamDirective {
    Continue,
    Reconnect,
}

type FeedSink = SplitSink<FeedWsStream, Message>;

/// Owns one feed connection's lifecycle: dial, heartbeat, control frames,
/// tick dispatch, and reconnect with a fixed delay. Cancelling the token is
/// the one intentional close; every other disconnect schedules a retry.
pub async fn run_feed_stream(
    config: FeedConfig,
    store: Arc<Mutex<WatchlistStore>>,
    status_tx: watch::Sender<StreamStatusSnapshot>,
    events: broadcast::Sender<DashboardEvent>,
    mut commands: mpsc::Receiver<FeedCommand>,
    cancel_token: CancellationToken,
) {
    let mut reconnect_attempt: u64 = 0;

    'runtime: while !cancel_token.is_cancelled() {
        let reason = if reconnect_attempt == 0 {
            "opening feed connection".to_string()
        } else {
            format!("reconnect attempt {reconnect_attempt}")
        };
        publish_status(
            &status_tx,
            &events,
            ConnectionState::Connecting,
            reconnect_attempt,
            Some(reason),
        );

        let connected = tokio::select! {
            _ = cancel_token.cancelled() => break 'runtime,
            connected = connect_feed_stream(&config) => connected,
        };

        let disconnect_reason = match connected {
            Ok(ws) => {
                info!("feed connected");
                publish_status(
                    &status_tx,
                    &events,
                    ConnectionState::Open,
                    reconnect_attempt,
                    None,
                );

                let (mut sink, mut source) = ws.split();
                let mut heartbeat = tokio::time::interval_at(
                    tokio::time::Instant::now()
                        + Duration::from_millis(config.heartbeat_interval_ms),
                    Duration::from_millis(config.heartbeat_interval_ms),
                );
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

                let mut intentional_close = false;
                let mut disconnect_reason = "feed disconnected".to_string();
                loop {
                    tokio::select! {
                        _ = cancel_token.cancelled() => {
                            intentional_close = true;
                            break;
                        }
                        _ = heartbeat.tick() => {
                            debug!("keep-alive sent");
                            if let Err(error) = send_control(&mut sink, &ControlFrame::Ping).await {
                                disconnect_reason = format!("keep-alive send failed: {error}");
                                break;
                            }
                        }
                        maybe_command = commands.recv() => {
                            let Some(command) = maybe_command else {
                                // All command senders dropped: the owner is gone.
                                intentional_close = true;
                                break;
                            };
                            if let Err(error) = forward_command(&mut sink, command).await {
                                disconnect_reason = format!("control frame send failed: {error}");
                                break;
                            }
                        }
                        frame = source.next() => {
                            match frame {
                                Some(Ok(message)) => {
                                    if handle_message(message, &store, &events) == StreamDirective::Reconnect {
                                        disconnect_reason = "feed closed by server".to_string();
                                        break;
                                    }
                                }
                                Some(Err(error)) => {
                                    disconnect_reason = format!("feed stream error: {error}");
                                    break;
                                }
                                None => break,
                            }
                        }
                    }
                }

                if intentional_close {
                    let _ = sink.send(Message::Close(None)).await;
                    break 'runtime;
                }
                disconnect_reason
            }
            Err(error) => format!("feed connect error: {error}"),
        };

        if cancel_token.is_cancelled() {
            break;
        }

        reconnect_attempt = reconnect_attempt.saturating_add(1);
        warn!(
            "{disconnect_reason}, reconnecting in {}ms",
            config.reconnect_delay_ms
        );
        publish_status(
            &status_tx,
            &events,
            ConnectionState::Closed,
            reconnect_attempt,
            Some(disconnect_reason),
        );

        let delay = tokio::time::sleep(Duration::from_millis(config.reconnect_delay_ms));
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break 'runtime,
                _ = &mut delay => break,
                maybe_command = commands.recv() => {
                    match maybe_command {
                        Some(command) => reject_command(command),
                        None => break 'runtime,
                    }
                }
            }
        }
    }

    publish_status(
        &status_tx,
        &events,
        ConnectionState::Closed,
        reconnect_attempt,
        Some("feed disposed".to_string()),
    );
}

fn handle_message(
    message: Message,
    store: &Arc<Mutex<WatchlistStore>>,
    events: &broadcast::Sender<DashboardEvent>,
) -> StreamDirective {
    let mut payload = match message {
        Message::Text(text) => text.into_bytes(),
        Message::Binary(binary) => binary,
        Message::Close(_) => return StreamDirective::Reconnect,
        _ => return StreamDirective::Continue,
    };

    match parse_feed_frame(payload.as_mut_slice()) {
        Ok(FeedFrame::Ping) => debug!("keep-alive ack received"),
        Ok(FeedFrame::Trade(ticks)) => {
            debug!("trade batch received: {} ticks", ticks.len());
            let map = trade_tick_map(&ticks);
            let updated = store.lock().apply_ticks(&map);
            if !updated.is_empty() {
                let _ = events.send(DashboardEvent::PricesUpdated(updated));
            }
        }
        Ok(FeedFrame::Unknown) => {}
        Err(error) => warn!("failed to decode feed frame: {error}"),
    }

    StreamDirective::Continue
}

async fn send_control(sink: &mut FeedSink, frame: &ControlFrame) -> Result<(), AppError> {
    let payload = serde_json::to_string(frame)?;
    sink.send(Message::Text(payload)).await?;
    Ok(())
}

async fn forward_command(sink: &mut FeedSink, command: FeedCommand) -> Result<(), AppError> {
    match command {
        FeedCommand::Subscribe(symbol) => {
            info!("subscribing to {symbol}");
            send_control(sink, &ControlFrame::Subscribe { symbol }).await
        }
        FeedCommand::Unsubscribe(symbol) => {
            info!("unsubscribing from {symbol}");
            send_control(sink, &ControlFrame::Unsubscribe { symbol }).await
        }
    }
}

fn reject_command(command: FeedCommand) {
    match command {
        FeedCommand::Subscribe(symbol) => warn!("cannot subscribe to {symbol}, feed is not open"),
        // Removal already dropped the stock locally, a missed unsubscribe is non-fatal.
        FeedCommand::Unsubscribe(_) => {}
    }
}

fn publish_status(
    status_tx: &watch::Sender<StreamStatusSnapshot>,
    events: &broadcast::Sender<DashboardEvent>,
    state: ConnectionState,
    reconnect_attempt: u64,
    reason: Option<String>,
) {
    let snapshot = StreamStatusSnapshot {
        state,
        reconnect_attempt,
        reason,
    };
    status_tx.send_replace(snapshot.clone());
    let _ = events.send(DashboardEvent::Status(snapshot));
}
