//! A blocking, cancellable [`Future`] layered over a promise-style
//! notification source.
//!
//! The notification source pushes its settlement through callbacks
//! ([`Notifier`]); the [`Future`] mirrors that settlement into its own
//! write-once state so a synchronous caller can block on [`Future::wait`].
//! [`Deferred`] is a ready-made notification source.
//!
//! # Examples
//!
//! ```
//! use promise_future::{Deferred, Future};
//! use std::thread;
//!
//! let deferred = Deferred::<i32, String>::new();
//! let producer = deferred.clone();
//! let future = Future::builder(deferred)
//!     .wait_with(move || {
//!         thread::spawn(move || producer.resolve(42)).join().unwrap();
//!         Ok(())
//!     })
//!     .build();
//! assert_eq!(future.wait(), Ok(42));
//! ```
use std::sync::Arc;

pub mod deferred;
mod error;
pub mod future;

pub use deferred::Deferred;
pub use error::{Error, Rejection};
pub use future::{Builder, Future};

pub type OnFulfilled<T> = Box<dyn FnOnce(T) + Send>;
pub type OnRejected<E> = Box<dyn FnOnce(Rejection<E>) + Send>;
pub type OnProgress<P> = Box<dyn FnMut(P) + Send>;

/// A source that settles exactly once and reports it through callbacks.
///
/// Implementations may run the callbacks on another thread, later on an
/// event loop, or synchronously inside `subscribe`/`then` when the source is
/// already settled.
pub trait Notifier<T, E> {
    /// Handle returned by [`then`](Notifier::then).
    type Chained;
    type Progress;

    /// Registers a fulfil/reject pair. Exactly one of them is invoked, once.
    fn subscribe(&self, on_fulfilled: OnFulfilled<T>, on_rejected: OnRejected<E>);

    fn then(
        &self,
        on_fulfilled: Option<OnFulfilled<T>>,
        on_rejected: Option<OnRejected<E>>,
        on_progress: Option<OnProgress<Self::Progress>>,
    ) -> Self::Chained;
}

impl<T, E, N> Notifier<T, E> for Arc<N>
where
    N: Notifier<T, E> + ?Sized,
{
    type Chained = N::Chained;
    type Progress = N::Progress;

    fn subscribe(&self, on_fulfilled: OnFulfilled<T>, on_rejected: OnRejected<E>) {
        (**self).subscribe(on_fulfilled, on_rejected)
    }

    fn then(
        &self,
        on_fulfilled: Option<OnFulfilled<T>>,
        on_rejected: Option<OnRejected<E>>,
        on_progress: Option<OnProgress<Self::Progress>>,
    ) -> Self::Chained {
        (**self).then(on_fulfilled, on_rejected, on_progress)
    }
}
