//! SQLite store of the last good price per asset pair.

use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A cached price and when it was fetched (Unix seconds, UTC).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CachedPrice {
    pub price: f64,
    pub fetched_utc: i64,
}

/// Last-good-price cache. Key = SHA-256 of `asset:vs_currency` (lowercased).
pub struct QuoteCache {
    conn: Mutex<Connection>,
}

impl QuoteCache {
    /// Open or create cache at `path`. Creates parent dirs if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// In-memory cache, gone when dropped.
    pub fn in_memory() -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS quotes (
                key TEXT PRIMARY KEY,
                price REAL NOT NULL,
                fetched_utc INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn key_for(asset: &str, vs_currency: &str) -> String {
        let pair = format!(
            "{}:{}",
            asset.trim().to_lowercase(),
            vs_currency.trim().to_lowercase()
        );
        let mut hasher = Sha256::new();
        hasher.update(pair.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, asset: &str, vs_currency: &str) -> Result<Option<CachedPrice>, CacheError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let mut stmt = conn.prepare("SELECT price, fetched_utc FROM quotes WHERE key = ?1")?;
        let row = stmt
            .query_row([Self::key_for(asset, vs_currency)], |r| {
                Ok(CachedPrice {
                    price: r.get(0)?,
                    fetched_utc: r.get(1)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Insert or replace the price for the pair, stamped now.
    pub fn set(&self, asset: &str, vs_currency: &str, price: f64) -> Result<(), CacheError> {
        let fetched = time::OffsetDateTime::now_utc().unix_timestamp();
        let conn = self
            .conn
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO quotes (key, price, fetched_utc) VALUES (?1, ?2, ?3)",
            rusqlite::params![Self::key_for(asset, vs_currency), price, fetched],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn key_ignores_case_and_whitespace() {
        let k1 = QuoteCache::key_for("ethereum", "usd");
        let k2 = QuoteCache::key_for(" Ethereum", "USD ");
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 64);
        assert_ne!(k1, QuoteCache::key_for("ethereum", "eur"));
    }

    #[test]
    fn missing_pair_is_none() {
        let cache = QuoteCache::in_memory().unwrap();
        assert!(cache.get("ethereum", "usd").unwrap().is_none());
    }

    #[test]
    fn latest_price_wins() {
        let tmp = NamedTempFile::new().unwrap();
        let cache = QuoteCache::open(tmp.path()).unwrap();
        cache.set("ethereum", "usd", 3000.5).unwrap();
        cache.set("ethereum", "usd", 3100.25).unwrap();
        let got = cache.get("ethereum", "usd").unwrap().unwrap();
        assert_eq!(got.price, 3100.25);
        assert!(got.fetched_utc > 0);
    }
}
