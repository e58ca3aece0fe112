//! Shared display state for the price feed.
//!
//! Writers are the polling callback and its error sink; readers take snapshots or
//! subscribe for changes. A failed refresh keeps the last good quote and only sets
//! the transient error indicator.

use crate::feed::PriceQuote;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    pub quote: Option<PriceQuote>,
    pub last_error: Option<String>,
    pub consecutive_errors: u32,
    /// Number of writes (quotes and errors) so far.
    pub updates: u64,
}

impl FeedSnapshot {
    /// True when the displayed quote is older than the latest refresh attempt.
    pub fn is_stale(&self) -> bool {
        self.consecutive_errors > 0
    }
}

pub struct FeedStore {
    tx: watch::Sender<FeedSnapshot>,
}

impl Default for FeedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(FeedSnapshot::default());
        Self { tx }
    }

    pub fn record_quote(&self, quote: PriceQuote) {
        self.tx.send_modify(|s| {
            s.quote = Some(quote);
            s.last_error = None;
            s.consecutive_errors = 0;
            s.updates += 1;
        });
    }

    pub fn record_error(&self, error: impl ToString) {
        let error = error.to_string();
        self.tx.send_modify(|s| {
            s.last_error = Some(error);
            s.consecutive_errors = s.consecutive_errors.saturating_add(1);
            s.updates += 1;
        });
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.tx.subscribe()
    }
}
