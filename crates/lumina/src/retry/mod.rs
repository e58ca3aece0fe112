//! Retry with bounded attempts and exponential backoff.

mod executor;

pub use executor::{
    backoff_delay, RetryError, RetryExecutor, RetryHook, RetryOptions, RetryState,
};
