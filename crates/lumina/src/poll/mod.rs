//! Periodic, non-overlapping invocation of a data-refresh callback.

mod polling;

pub use polling::{
    poll_callback, CallbackFailure, ErrorSink, PollCallback, PollFuture, PollOptions, PollingLoop,
};
