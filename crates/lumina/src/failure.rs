//! Opaque failure of a wrapped async operation.

use std::error::Error as StdError;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure produced by an operation handed to the retry executor or polling loop.
///
/// Any error converts into one. Plain messages (`String`, `&str`) become a generic
/// message error; an `OperationFailure` that is wrapped again passes through as-is.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct OperationFailure(BoxError);

impl OperationFailure {
    pub fn new(err: impl Into<BoxError>) -> Self {
        let boxed: BoxError = err.into();
        match boxed.downcast::<OperationFailure>() {
            Ok(inner) => *inner,
            Err(other) => Self(other),
        }
    }

    /// Concrete error behind the failure, if it is an `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    pub fn into_inner(self) -> BoxError {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Error, Debug, PartialEq)]
    #[error("rpc down")]
    struct RpcDown;

    #[test]
    fn message_is_normalized() {
        let f = OperationFailure::new("boom");
        assert_eq!(f.to_string(), "boom");
        assert!(f.downcast_ref::<RpcDown>().is_none());
    }

    #[test]
    fn structured_error_is_kept() {
        let f = OperationFailure::new(RpcDown);
        assert_eq!(f.downcast_ref::<RpcDown>(), Some(&RpcDown));
    }

    #[test]
    fn rewrapping_does_not_nest() {
        let f = OperationFailure::new(OperationFailure::new(RpcDown));
        assert_eq!(f.downcast_ref::<RpcDown>(), Some(&RpcDown));
        assert!(f.downcast_ref::<OperationFailure>().is_none());
    }
}
