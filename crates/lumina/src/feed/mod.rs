//! Price feed: HTTP client, last-good-price cache, fallback value.

mod cache;
mod price;

pub use cache::{CacheError, CachedPrice, QuoteCache};
pub use price::{parse_simple_price, PriceConfig, PriceError, PriceFetcher, PriceQuote, QuoteSource};
