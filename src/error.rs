use thiserror::Error;

/// How a notification source (or a wait procedure) reports that it did not
/// produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection<E> {
    /// The deferred computation failed.
    #[error("{0}")]
    Failed(E),
    /// The deferred computation was cancelled.
    #[error("cancelled")]
    Cancelled,
}

/// Terminal error of a [`Future`](crate::Future).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error<E> {
    #[error("rejected: {0}")]
    Rejected(E),
    /// Produced both by a local `cancel()` and by an upstream cancellation.
    #[error("cancelled by access")]
    Cancelled,
    /// The wait procedure returned, but the source never settled.
    #[error("wait did not resolve")]
    Unresolved,
}

impl<E> Error<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl<E> From<Rejection<E>> for Error<E> {
    fn from(rejection: Rejection<E>) -> Self {
        match rejection {
            Rejection::Failed(err) => Error::Rejected(err),
            Rejection::Cancelled => Error::Cancelled,
        }
    }
}
