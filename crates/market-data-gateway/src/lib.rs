//! Vendor market-data gateway: EODHD-backed price history, fundamentals/market-cap
//! caching, and news ingestion, each with its own staleness/incremental-refresh policy.

pub mod eodhd;
pub mod market_cap;
pub mod news;
pub mod prices;

pub use eodhd::{EodRow, EodhdClient, EodhdError, EodhdResult, NewsItem};
pub use market_cap::fetch_and_store_market_cap;
pub use news::fetch_and_store_news;
pub use prices::{fetch_and_store_benchmark_prices, fetch_and_store_prices_for_issuer};
