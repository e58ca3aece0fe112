//! Spot price client (CoinGecko-style `simple/price`) with retries and a fallback value.

use crate::feed::cache::QuoteCache;
use crate::retry::{RetryError, RetryExecutor, RetryOptions};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_PRICE_URL: &str = "https://api.coingecko.com/api/v3";
const DEFAULT_ASSET: &str = "ethereum";
const DEFAULT_VS_CURRENCY: &str = "usd";
const DEFAULT_FALLBACK_PRICE: f64 = 2000.0;
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 500;
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct PriceConfig {
    pub base_url: String,
    pub asset: String,
    pub vs_currency: String,
    /// Served when neither a live nor a cached price is available.
    pub fallback_price: f64,
    pub retry: RetryOptions,
    pub offline: bool,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PRICE_URL.to_string(),
            asset: DEFAULT_ASSET.to_string(),
            vs_currency: DEFAULT_VS_CURRENCY.to_string(),
            fallback_price: DEFAULT_FALLBACK_PRICE,
            retry: RetryOptions::default()
                .max_attempts(MAX_ATTEMPTS)
                .delay(Duration::from_millis(RETRY_DELAY_MS)),
            offline: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum PriceError {
    #[error("request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api error: status {0} body {1}")]
    Api(u16, String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("offline mode: live price unavailable")]
    Offline,
    #[error(transparent)]
    Retry(#[from] RetryError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    Live,
    Cached,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub asset: String,
    pub vs_currency: String,
    pub price: f64,
    pub source: QuoteSource,
    /// Unix seconds (UTC) when the price was obtained from the API.
    pub fetched_utc: i64,
}

/// Extract `body[asset][vs_currency]` from a `simple/price` response.
pub fn parse_simple_price(body: &str, asset: &str, vs_currency: &str) -> Result<f64, PriceError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| PriceError::Parse(e.to_string()))?;
    let price = value
        .get(asset)
        .and_then(|a| a.get(vs_currency))
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| PriceError::Parse(format!("no {asset}/{vs_currency} price in response")))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(PriceError::Parse(format!("implausible price {price}")));
    }
    Ok(price)
}

/// Price client. Live requests go through a [`RetryExecutor`]; the last good price is cached.
pub struct PriceFetcher {
    config: PriceConfig,
    client: Option<reqwest::Client>,
    cache: Option<QuoteCache>,
    executor: RetryExecutor,
    request_count: AtomicU64,
}

impl PriceFetcher {
    pub fn new(config: PriceConfig, cache: Option<QuoteCache>) -> Result<Self, PriceError> {
        let client = if config.offline {
            None
        } else {
            Some(
                reqwest::Client::builder()
                    .use_rustls_tls()
                    .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                    .build()?,
            )
        };
        Ok(Self {
            config,
            client,
            cache,
            executor: RetryExecutor::new(),
            request_count: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &PriceConfig {
        &self.config
    }

    /// Progress of the retry sequence currently in flight, if any.
    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    fn price_url(&self) -> Result<Url, PriceError> {
        let base = format!("{}/simple/price", self.config.base_url.trim_end_matches('/'));
        let mut url = Url::parse(&base)?;
        url.query_pairs_mut()
            .append_pair("ids", &self.config.asset)
            .append_pair("vs_currencies", &self.config.vs_currency);
        Ok(url)
    }

    /// One request, no retries.
    pub async fn fetch_live(&self) -> Result<f64, PriceError> {
        let client = self.client.as_ref().ok_or(PriceError::Offline)?;
        let url = self.price_url()?;
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let res = client.get(url).send().await?;
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(PriceError::Api(status.as_u16(), body));
        }
        parse_simple_price(&body, &self.config.asset, &self.config.vs_currency)
    }

    /// Live price with the configured retries. Caches the result on success.
    ///
    /// Offline mode fails at once with [`PriceError::Offline`]; there is nothing to retry.
    pub async fn fetch_with_retry(&self) -> Result<PriceQuote, PriceError> {
        if self.client.is_none() {
            return Err(PriceError::Offline);
        }
        let price = self
            .executor
            .retry(|| self.fetch_live(), &self.config.retry)
            .await?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&self.config.asset, &self.config.vs_currency, price) {
                warn!(error = %e, "cache write failed");
            }
        }
        info!(asset = %self.config.asset, price, "live price");
        Ok(PriceQuote {
            asset: self.config.asset.clone(),
            vs_currency: self.config.vs_currency.clone(),
            price,
            source: QuoteSource::Live,
            fetched_utc: OffsetDateTime::now_utc().unix_timestamp(),
        })
    }

    /// Best available price: live, else last cached, else the configured fallback. Never fails.
    pub async fn quote(&self) -> PriceQuote {
        let err = match self.fetch_with_retry().await {
            Ok(quote) => return quote,
            Err(e) => e,
        };
        warn!(error = %err, "live price unavailable");
        let cached = self.cache.as_ref().and_then(|cache| {
            cache
                .get(&self.config.asset, &self.config.vs_currency)
                .inspect_err(|e| warn!(error = %e, "cache read failed"))
                .ok()
                .flatten()
        });
        match cached {
            Some(c) => {
                debug!(price = c.price, fetched_utc = c.fetched_utc, "serving cached price");
                PriceQuote {
                    asset: self.config.asset.clone(),
                    vs_currency: self.config.vs_currency.clone(),
                    price: c.price,
                    source: QuoteSource::Cached,
                    fetched_utc: c.fetched_utc,
                }
            }
            None => {
                debug!(price = self.config.fallback_price, "serving fallback price");
                PriceQuote {
                    asset: self.config.asset.clone(),
                    vs_currency: self.config.vs_currency.clone(),
                    price: self.config.fallback_price,
                    source: QuoteSource::Fallback,
                    fetched_utc: OffsetDateTime::now_utc().unix_timestamp(),
                }
            }
        }
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}
