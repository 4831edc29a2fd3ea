pub mod error;
pub mod market;
pub mod state;
pub mod watchlist;

pub use error::AppError;
pub use market::stream::{DashboardEvent, FeedCommand};
pub use market::types::{
    ConnectionState, FeedArgs, FeedConfig, StreamStatusSnapshot, TradeTick, POPULAR_SYMBOLS,
};
pub use watchlist::controller::StockDashboard;
pub use watchlist::format::{color_for_symbol, format_change_percent, format_price};
pub use watchlist::store::{
    trade_tick_map, PricePoint, TradeTickMap, WatchedStock, WatchlistStore, MAX_HISTORY_POINTS,
};
