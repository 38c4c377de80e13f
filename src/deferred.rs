use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::{future::Future, task::{Poll, Waker}};

use log::trace;

use crate::{Notifier, OnFulfilled, OnProgress, OnRejected, Rejection};

/// A settle-once notification source. Every clone is a handle to the same
/// settlement, so one clone can be kept by the producer while another is
/// handed to a [`Future`](crate::Future).
///
/// # Examples
///
/// ```
/// use promise_future::{Deferred, Notifier};
/// use futures::executor::block_on;
/// use std::thread;
/// let deferred = Deferred::<String, String>::new();
/// let chained = deferred.then(
///     Some(Box::new(|value: String| println!("Received {:?}", value))),
///     None,
///     None,
/// );
/// let producer = deferred.clone();
/// let task1 = thread::spawn(move || producer.resolve("Hi".into()));
/// assert_eq!(block_on(chained.settled()), Ok("Hi".to_string()));
/// task1.join().expect("The task1 thread has panicked.");
/// ```
pub struct Deferred<T, E, P = ()> {
    promise: Arc<Mutex<Inner<T, E, P>>>,
}

/// Awaitable view of a [`Deferred`]'s settlement.
pub struct Settled<T, E, P = ()> {
    promise: Arc<Mutex<Inner<T, E, P>>>,
}

struct Subscriber<T, E> {
    on_fulfilled: Option<OnFulfilled<T>>,
    on_rejected: Option<OnRejected<E>>,
}

struct Inner<T, E, P> {
    outcome: Option<Result<T, Rejection<E>>>,
    subscribers: Vec<Subscriber<T, E>>,
    progress: Vec<OnProgress<P>>,
    waker: Vec<Waker>,
}

impl<T, E> Subscriber<T, E> {
    fn deliver(self, outcome: Result<T, Rejection<E>>) {
        match outcome {
            Ok(value) => {
                if let Some(on_fulfilled) = self.on_fulfilled {
                    on_fulfilled(value)
                }
            }
            Err(rejection) => {
                if let Some(on_rejected) = self.on_rejected {
                    on_rejected(rejection)
                }
            }
        }
    }
}

impl<T, E, P> Deferred<T, E, P>
where
    T: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            promise: Arc::new(Mutex::new(Inner {
                outcome: None,
                subscribers: vec![],
                progress: vec![],
                waker: vec![],
            })),
        }
    }

    /// Fulfils with `value`. Returns `false` if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Rejects with an ordinary failure. Returns `false` if already settled.
    pub fn reject(&self, err: E) -> bool {
        self.settle(Err(Rejection::Failed(err)))
    }

    /// Rejects with [`Rejection::Cancelled`]. Returns `false` if already settled.
    pub fn cancel(&self) -> bool {
        self.settle(Err(Rejection::Cancelled))
    }

    pub fn is_settled(&self) -> bool {
        self.lock().outcome.is_some()
    }

    /// Reports progress to every registered progress listener. Returns
    /// `false` if nobody received it: once settled, with no listeners, or
    /// when called from inside a listener of this same `Deferred` (listeners
    /// are detached while they run).
    pub fn notify(&self, progress: P) -> bool
    where
        P: Clone,
    {
        let mut listeners = {
            let mut promise = self.lock();
            if promise.outcome.is_some() {
                return false;
            }
            std::mem::take(&mut promise.progress)
        };
        if listeners.is_empty() {
            return false;
        }
        for listener in listeners.iter_mut() {
            listener(progress.clone());
        }
        let mut promise = self.lock();
        if promise.outcome.is_none() {
            // Keep listeners registered while the callbacks were running.
            let added = std::mem::replace(&mut promise.progress, listeners);
            promise.progress.extend(added);
        }
        true
    }

    pub fn settled(&self) -> Settled<T, E, P> {
        Settled { promise: self.promise.clone() }
    }

    fn settle(&self, outcome: Result<T, Rejection<E>>) -> bool {
        let (subscribers, wakers) = {
            let mut promise = self.lock();
            if promise.outcome.is_some() {
                return false;
            }
            promise.outcome = Some(outcome.clone());
            promise.progress.clear();
            (
                std::mem::take(&mut promise.subscribers),
                std::mem::take(&mut promise.waker),
            )
        };
        trace!(
            "deferred settled ({}), {} subscriber(s)",
            if outcome.is_ok() { "fulfilled" } else { "rejected" },
            subscribers.len()
        );
        for subscriber in subscribers {
            subscriber.deliver(outcome.clone());
        }
        for waker in wakers {
            waker.wake()
        }
        true
    }

    fn register(&self, subscriber: Subscriber<T, E>) {
        let settled = {
            let mut promise = self.lock();
            match promise.outcome {
                Some(ref outcome) => outcome.clone(),
                None => {
                    promise.subscribers.push(subscriber);
                    return;
                }
            }
        };
        subscriber.deliver(settled);
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, E, P>> {
        self.promise.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, E, P> Notifier<T, E> for Deferred<T, E, P>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    P: Clone + Send + 'static,
{
    type Chained = Deferred<T, E, P>;
    type Progress = P;

    fn subscribe(&self, on_fulfilled: OnFulfilled<T>, on_rejected: OnRejected<E>) {
        self.register(Subscriber {
            on_fulfilled: Some(on_fulfilled),
            on_rejected: Some(on_rejected),
        })
    }

    /// The returned handle settles with the same outcome once the matching
    /// handler has run.
    fn then(
        &self,
        on_fulfilled: Option<OnFulfilled<T>>,
        on_rejected: Option<OnRejected<E>>,
        on_progress: Option<OnProgress<P>>,
    ) -> Self::Chained {
        let chained = Deferred::new();
        {
            let chained = chained.clone();
            let mut on_progress = on_progress;
            let listener: OnProgress<P> = Box::new(move |progress: P| {
                if let Some(on_progress) = on_progress.as_mut() {
                    on_progress(progress.clone());
                }
                chained.notify(progress);
            });
            let mut promise = self.lock();
            if promise.outcome.is_none() {
                promise.progress.push(listener);
            }
        }
        let fulfilled = chained.clone();
        let rejected = chained.clone();
        self.register(Subscriber {
            on_fulfilled: Some(Box::new(move |value: T| {
                if let Some(on_fulfilled) = on_fulfilled {
                    on_fulfilled(value.clone());
                }
                fulfilled.settle(Ok(value));
            })),
            on_rejected: Some(Box::new(move |rejection: Rejection<E>| {
                if let Some(on_rejected) = on_rejected {
                    on_rejected(rejection.clone());
                }
                rejected.settle(Err(rejection));
            })),
        });
        chained
    }
}

impl<T, E, P> Future for Settled<T, E, P>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, Rejection<E>>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let mut promise = self.promise.lock().unwrap_or_else(PoisonError::into_inner);
        match promise.outcome {
            Some(ref outcome) => Poll::Ready(outcome.clone()),
            None => {
                promise.waker.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T, E, P> Clone for Deferred<T, E, P> {
    fn clone(&self) -> Self {
        Self { promise: self.promise.clone() }
    }
}

impl<T: Clone, E: Clone, P> Default for Deferred<T, E, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E, P> fmt::Debug for Deferred<T, E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settled = self
            .promise
            .lock()
            .map(|promise| promise.outcome.is_some())
            .unwrap_or_else(|poisoned| poisoned.into_inner().outcome.is_some());
        f.debug_struct("Deferred").field("settled", &settled).finish()
    }
}

#[cfg(test)]
mod tests {
use futures::executor::block_on;
use std::sync::{Arc, Mutex};
use std::thread;
use super::Deferred;
use crate::{Notifier, Rejection};

#[test]
fn test_deferred_resolve() {
    let op = Deferred::<String, ()>::new();
    let op_a = op.settled();
    let task1 = thread::spawn(move || block_on(op_a));
    let task2 = thread::spawn(move || op.resolve(String::from("🍓")));
    assert!(task2.join().expect("The task2 thread has panicked"));
    assert_eq!(task1.join().expect("The task1 thread has panicked"), Ok(String::from("🍓")));
}

#[test]
fn test_two_consumers_resolve() {
    let op = Deferred::<String, ()>::new();
    let op_a = op.settled();
    let op_b = op.settled();
    let task1 = thread::spawn(move || block_on(op_a));
    let task2 = thread::spawn(move || block_on(op_b));
    let task3 = thread::spawn(move || op.resolve(String::from("🍓")));
    task3.join().expect("The task3 thread has panicked");
    assert_eq!(task1.join().expect("The task1 thread has panicked"), Ok("🍓".into()));
    assert_eq!(task2.join().expect("The task2 thread has panicked"), Ok("🍓".into()));
}

#[test]
fn test_deferred_reject() {
    let a = Deferred::<String, String>::new();
    let b = a.settled();
    let task2 = thread::spawn(move || a.reject(String::from("reject!!")));
    task2.join().expect("The task2 thread has panicked");
    assert_eq!(block_on(b), Err(Rejection::Failed("reject!!".into())));
}

#[test]
fn test_settle_twice() {
    let a = Deferred::<String, ()>::new();
    assert!(a.resolve("hi".into()));
    assert!(!a.resolve("again".into()));
    assert!(!a.cancel());
    assert_eq!(block_on(a.settled()), Ok("hi".into()));
}

#[test]
fn test_subscribe_after_settle_runs_synchronously() {
    let a = Deferred::<i32, ()>::new();
    a.resolve(7);
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    a.subscribe(
        Box::new(move |value: i32| *sink.lock().unwrap() = Some(value)),
        Box::new(|_: Rejection<()>| panic!("rejected")),
    );
    assert_eq!(*seen.lock().unwrap(), Some(7));
}

#[test]
fn test_subscribers_run_in_order() {
    let a = Deferred::<i32, ()>::new();
    let order = Arc::new(Mutex::new(vec![]));
    for tag in 0..3 {
        let order = order.clone();
        a.subscribe(Box::new(move |_: i32| order.lock().unwrap().push(tag)), Box::new(|_: Rejection<()>| {}));
    }
    a.resolve(1);
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[test]
fn test_then_chains_outcome_and_progress() {
    let a = Deferred::<i32, String, u8>::new();
    let seen = Arc::new(Mutex::new(vec![]));
    let sink = seen.clone();
    let chained = a.then(None, None, Some(Box::new(move |p: u8| sink.lock().unwrap().push(p))));
    let forwarded = Arc::new(Mutex::new(vec![]));
    let sink = forwarded.clone();
    chained.then(None, None, Some(Box::new(move |p: u8| sink.lock().unwrap().push(p))));

    assert!(a.notify(10));
    assert!(a.notify(20));
    a.cancel();
    assert!(!a.notify(30));

    assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
    assert_eq!(*forwarded.lock().unwrap(), vec![10, 20]);
    assert!(chained.is_settled());
    assert_eq!(block_on(chained.settled()), Err(Rejection::Cancelled));
}

#[test]
fn test_notify_without_listeners() {
    let a = Deferred::<i32, (), u8>::new();
    assert!(!a.notify(1));
    let seen = Arc::new(Mutex::new(vec![]));
    let sink = seen.clone();
    let _chained = a.then(None, None, Some(Box::new(move |p: u8| sink.lock().unwrap().push(p))));
    assert!(a.notify(2));
    assert_eq!(*seen.lock().unwrap(), vec![2]);
}

#[test]
fn test_notify_from_inside_listener() {
    let a = Deferred::<i32, (), u8>::new();
    let inner = a.clone();
    let nested = Arc::new(Mutex::new(vec![]));
    let sink = nested.clone();
    let _chained = a.then(
        None,
        None,
        Some(Box::new(move |p: u8| {
            if p == 1 {
                sink.lock().unwrap().push(inner.notify(2));
            }
        })),
    );
    assert!(a.notify(1));
    assert_eq!(*nested.lock().unwrap(), vec![false]);
    // The listener is still registered afterwards.
    assert!(a.notify(3));
    a.resolve(0);
}
}
