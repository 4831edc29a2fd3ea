pub mod finnhub;
pub mod stream;
pub mod types;
