use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use log::{debug, trace, warn};

use crate::{Error, Notifier, OnFulfilled, OnProgress, OnRejected, Rejection};

type WaitFn<E> = Box<dyn FnOnce() -> Result<(), Rejection<E>> + Send>;
type CancelFn<T, E, N> = Box<dyn FnOnce(&Future<T, E, N>) -> bool + Send>;

/// A deferred result that can be waited on synchronously, chained through
/// its notification source, or cancelled.
///
/// The future subscribes to its source the first time [`wait`](Future::wait)
/// is called and mirrors the settlement into its own state. Exactly one path
/// (the source's callbacks, a failing wait procedure, or
/// [`cancel`](Future::cancel)) realizes it; every later attempt is a no-op.
///
/// # Examples
///
/// ```
/// use promise_future::{Deferred, Error, Future};
/// let deferred = Deferred::<i32, String>::new();
/// let future = Future::builder(deferred.clone())
///     .cancel_with(|_| true)
///     .build();
/// assert!(future.cancel());
/// assert_eq!(future.wait(), Err(Error::Cancelled));
/// ```
pub struct Future<T, E, N> {
    source: N,
    register: Arc<Register<T, E, N>>,
}

/// Configures the optional wait and cancel procedures of a [`Future`].
pub struct Builder<T, E, N> {
    source: N,
    wait_fn: Option<WaitFn<E>>,
    cancel_fn: Option<CancelFn<T, E, N>>,
}

struct Register<T, E, N> {
    state: Mutex<State<T, E, N>>,
    driven: Condvar,
}

struct State<T, E, N> {
    outcome: Option<Result<T, Error<E>>>,
    registered: bool,
    // Thread currently running the wait procedure.
    driver: Option<ThreadId>,
    wait_fn: Option<WaitFn<E>>,
    cancel_fn: Option<CancelFn<T, E, N>>,
}

/// Procedures taken out of the state by a committed transition.
struct Consumed<T, E, N> {
    // Only held so the procedure is dropped after the lock is released.
    _wait_fn: Option<WaitFn<E>>,
    cancel_fn: Option<CancelFn<T, E, N>>,
}

impl<T, E, N> Register<T, E, N>
where
    T: Clone,
    E: Clone,
{
    fn lock(&self) -> MutexGuard<'_, State<T, E, N>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes `outcome` unless already realized. On success both procedures
    /// are handed back so they are dropped, or invoked, outside the lock.
    fn commit(&self, outcome: Result<T, Error<E>>) -> Option<Consumed<T, E, N>> {
        let consumed = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return None;
            }
            debug!(
                "future realized: {}",
                match outcome {
                    Ok(_) => "fulfilled",
                    Err(Error::Rejected(_)) => "rejected",
                    Err(Error::Cancelled) => "cancelled",
                    Err(Error::Unresolved) => "unresolved",
                }
            );
            state.outcome = Some(outcome);
            Consumed {
                _wait_fn: state.wait_fn.take(),
                cancel_fn: state.cancel_fn.take(),
            }
        };
        self.driven.notify_all();
        Some(consumed)
    }

    fn try_realize_fulfilled(&self, value: T) -> bool {
        self.commit(Ok(value)).is_some()
    }

    fn try_realize_rejected(&self, err: E) -> bool {
        self.commit(Err(Error::Rejected(err))).is_some()
    }

    fn try_realize_cancelled(&self) -> bool {
        self.commit(Err(Error::Cancelled)).is_some()
    }

    fn try_realize_unresolved(&self) -> bool {
        self.commit(Err(Error::Unresolved)).is_some()
    }

    fn settle_from(&self, rejection: Rejection<E>) -> bool {
        match rejection {
            Rejection::Failed(err) => self.try_realize_rejected(err),
            Rejection::Cancelled => self.try_realize_cancelled(),
        }
    }

    fn outcome(&self) -> Option<Result<T, Error<E>>> {
        self.lock().outcome.clone()
    }
}

/// Clears the driver and wakes blocked waiters, even if the wait procedure
/// panics.
struct Driving<'a, T, E, N>(&'a Register<T, E, N>);

impl<T, E, N> Drop for Driving<'_, T, E, N> {
    fn drop(&mut self) {
        self.0
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .driver = None;
        self.0.driven.notify_all();
    }
}

impl<T, E, N> Future<T, E, N>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    N: Notifier<T, E> + 'static,
{
    /// A future that can only be realized by `source` settling, or by
    /// [`cancel`](Future::cancel).
    pub fn new(source: N) -> Self {
        Self::builder(source).build()
    }

    pub fn builder(source: N) -> Builder<T, E, N> {
        Builder {
            source,
            wait_fn: None,
            cancel_fn: None,
        }
    }

    /// Blocks until the future is realized and returns its outcome.
    ///
    /// The wait procedure runs at most once. If it returns without the source
    /// having settled, or if there is no wait procedure and the source has not
    /// settled yet, the future is realized with [`Error::Unresolved`].
    /// Concurrent callers block until the thread running the wait procedure
    /// is done with it, so the wait procedure must not block on another
    /// thread's `wait()` of the same future; that deadlocks.
    pub fn wait(&self) -> Result<T, Error<E>> {
        if !self.is_realized() {
            self.register_shadow();
        }

        let wait_fn = {
            let current = thread::current().id();
            let mut state = self.register.lock();
            while state.outcome.is_none()
                && state.driver.map_or(false, |driver| driver != current)
            {
                state = self
                    .register
                    .driven
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if state.outcome.is_none() {
                let wait_fn = state.wait_fn.take();
                if wait_fn.is_some() {
                    state.driver = Some(current);
                }
                wait_fn
            } else {
                None
            }
        };

        if let Some(wait_fn) = wait_fn {
            trace!("invoking wait procedure");
            let _driving = Driving(&self.register);
            if let Err(rejection) = wait_fn() {
                self.register.settle_from(rejection);
            }
        }

        if self.register.try_realize_unresolved() {
            warn!("wait returned before the notification source settled");
        }
        self.register.outcome().unwrap_or(Err(Error::Unresolved))
    }

    /// Registers continuations on the notification source. The future's own
    /// state is not touched.
    pub fn then(
        &self,
        on_fulfilled: Option<OnFulfilled<T>>,
        on_rejected: Option<OnRejected<E>>,
        on_progress: Option<OnProgress<N::Progress>>,
    ) -> N::Chained {
        self.source.then(on_fulfilled, on_rejected, on_progress)
    }

    /// Realizes a pending future with [`Error::Cancelled`] and asks the cancel
    /// procedure to abort the underlying computation.
    ///
    /// Returns what the cancel procedure reports, or `false` when there is
    /// none or the future was already realized. The future is cancelled even
    /// when this returns `false` for a pending future.
    pub fn cancel(&self) -> bool {
        let cancel_fn = match self.register.commit(Err(Error::Cancelled)) {
            Some(consumed) => consumed.cancel_fn,
            None => return false,
        };
        match cancel_fn {
            Some(cancel_fn) => {
                trace!("invoking cancel procedure");
                cancel_fn(self)
            }
            None => false,
        }
    }

    pub fn is_realized(&self) -> bool {
        self.register.lock().outcome.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.register.lock().outcome, Some(Err(Error::Cancelled)))
    }

    /// The terminal outcome, if realized. Never blocks and never drives the
    /// source.
    pub fn peek(&self) -> Option<Result<T, Error<E>>> {
        self.register.outcome()
    }

    pub fn source(&self) -> &N {
        &self.source
    }

    fn register_shadow(&self) {
        {
            let mut state = self.register.lock();
            if state.registered || state.outcome.is_some() {
                return;
            }
            state.registered = true;
        }
        trace!("registering shadow on notification source");
        // The source may call back before `subscribe` returns.
        let fulfilled: Weak<Register<T, E, N>> = Arc::downgrade(&self.register);
        let rejected = fulfilled.clone();
        self.source.subscribe(
            Box::new(move |value: T| {
                if let Some(register) = fulfilled.upgrade() {
                    register.try_realize_fulfilled(value);
                }
            }),
            Box::new(move |rejection: Rejection<E>| {
                if let Some(register) = rejected.upgrade() {
                    register.settle_from(rejection);
                }
            }),
        );
    }
}

impl<T, E, N> Builder<T, E, N>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    N: Notifier<T, E> + 'static,
{
    /// Procedure that blocks until the source has been driven to settlement.
    pub fn wait_with<F>(mut self, wait_fn: F) -> Self
    where
        F: FnOnce() -> Result<(), Rejection<E>> + Send + 'static,
    {
        self.wait_fn = Some(Box::new(wait_fn));
        self
    }

    /// Procedure that tries to abort the underlying computation and reports
    /// whether it did.
    pub fn cancel_with<F>(mut self, cancel_fn: F) -> Self
    where
        F: FnOnce(&Future<T, E, N>) -> bool + Send + 'static,
    {
        self.cancel_fn = Some(Box::new(cancel_fn));
        self
    }

    pub fn build(self) -> Future<T, E, N> {
        Future {
            source: self.source,
            register: Arc::new(Register {
                state: Mutex::new(State {
                    outcome: None,
                    registered: false,
                    driver: None,
                    wait_fn: self.wait_fn,
                    cancel_fn: self.cancel_fn,
                }),
                driven: Condvar::new(),
            }),
        }
    }
}

impl<T, E, N> fmt::Debug for Future<T, E, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let realized = match self.register.state.lock() {
            Ok(state) => state.outcome.is_some(),
            Err(poisoned) => poisoned.into_inner().outcome.is_some(),
        };
        f.debug_struct("Future").field("realized", &realized).finish()
    }
}
