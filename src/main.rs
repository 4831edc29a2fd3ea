use stockwatch::{
    format_price, AppError, DashboardEvent, FeedArgs, StockDashboard, POPULAR_SYMBOLS,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockwatch=info".into()),
        )
        .init();

    let Ok(token) = std::env::var("FINNHUB_TOKEN") else {
        error!("FINNHUB_TOKEN is not set");
        std::process::exit(1);
    };

    let mut symbols: Vec<String> = std::env::args().skip(1).collect();
    if symbols.is_empty() {
        symbols = POPULAR_SYMBOLS
            .iter()
            .take(3)
            .map(|symbol| symbol.to_string())
            .collect();
    }

    let dashboard = StockDashboard::start(FeedArgs {
        token,
        ..FeedArgs::default()
    })?;
    let mut events = dashboard.subscribe_events();

    for symbol in &symbols {
        match dashboard.add_stock(symbol, 1.0).await {
            Ok(stock) => info!(
                "watching {} ({}) at {}",
                stock.symbol,
                stock.name,
                format_price(stock.current_price)
            ),
            Err(err) => warn!("could not add {symbol}: {err}"),
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(DashboardEvent::PricesUpdated(updated)) => {
                    for stock in dashboard.watchlist() {
                        if updated.contains(&stock.symbol) {
                            info!(
                                "{} {} ({} points)",
                                stock.symbol,
                                format_price(stock.current_price),
                                stock.history.len()
                            );
                        }
                    }
                }
                Ok(DashboardEvent::Status(status)) => {
                    info!("feed status: {:?}", status.state);
                }
                Ok(DashboardEvent::WatchlistChanged) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("event stream lagged, skipped {skipped} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    dashboard.shutdown().await;
    Ok(())
}
