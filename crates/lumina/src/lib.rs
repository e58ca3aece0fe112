//! lumina — resilient data fetching for the Lumina insurance / prediction-market app.
//!
//! Two independent primitives, [`RetryExecutor`] and [`PollingLoop`], plus the
//! price feed and display-state store they keep fresh. Read-only; no wallet, no signing.

pub mod config;
pub mod failure;
pub mod feed;
pub mod poll;
pub mod retry;
pub mod store;

pub use config::LuminaConfig;
pub use failure::OperationFailure;
pub use feed::{PriceConfig, PriceFetcher, PriceQuote, QuoteCache, QuoteSource};
pub use poll::{poll_callback, CallbackFailure, PollOptions, PollingLoop};
pub use retry::{RetryError, RetryExecutor, RetryOptions, RetryState};
pub use store::{FeedSnapshot, FeedStore};
