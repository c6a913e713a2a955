use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::{future::Future, task::{Poll, Waker}};
use tracing::{debug, trace};

/// A `Promise` is the consuming half of a settlement cell. It starts out
/// pending and is settled at most once, either fulfilled with a `T` or
/// rejected with an `E`.
///
/// Cloning a promise is cheap and yields another handle to the same cell.
///
/// # Examples
///
/// ```
/// use promise_chain::{Promise, Step};
/// let p = Promise::<i32, String>::resolve(2)
///     .then(|v| Step::Value(v + 5))
///     .map(|v| v * 2);
/// assert_eq!(p.value(), Some(14));
/// ```
pub struct Promise<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

/// The producing half handed to an executor. Any clone may settle the
/// promise; only the first settlement counts.
///
/// # Examples
///
/// ```
/// use promise_chain::Resolver;
/// use std::thread;
/// let (resolver, promise) = Resolver::<String, ()>::new();
/// let task = thread::spawn(move || resolver.resolve("🍓".into()));
/// task.join().expect("The task thread has panicked");
/// assert_eq!(promise.value().as_deref(), Some("🍓"));
/// ```
pub struct Resolver<T, E> {
    promise: Promise<T, E>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

/// What a continuation wants to happen next.
#[derive(Debug)]
pub enum Step<T, E> {
    /// Settle with a new value.
    Value(T),
    /// Follow another promise and take its outcome.
    Promise(Promise<T, E>),
    /// Keep the outcome the continuation was called with.
    Unchanged,
}

/// Conversion from a handler's return value into a [`Step`]. An `Err`
/// returned from a handler rejects the chained promise.
pub trait IntoStep<T, E> {
    fn into_step(self) -> Result<Step<T, E>, E>;
}

type OnFulfilled<T, E> = Box<dyn FnOnce(T) -> Result<Step<T, E>, E> + Send>;
type OnRejected<T, E> = Box<dyn FnOnce(E) -> Result<Step<T, E>, E> + Send>;

struct Inner<T, E> {
    value: Option<Result<T, E>>,
    reactions: Vec<Reaction<T, E>>,
    waker: Vec<Waker>,
}

struct Handlers<T, E> {
    on_fulfilled: Option<OnFulfilled<T, E>>,
    on_rejected: Option<OnRejected<T, E>>,
}

/// A continuation waiting on a pending promise. A reaction without
/// handlers is a plain waiter: `target` follows the outcome as is.
struct Reaction<T, E> {
    handlers: Handlers<T, E>,
    target: Promise<T, E>,
}

enum Transition<T, E> {
    Keep,
    Settle(Result<T, E>),
    Adopt(Promise<T, E>),
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Runs `executor` synchronously with a [`Resolver`] for the new promise.
    /// If the executor returns an error before settling, the promise is
    /// rejected with it.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::{Promise, State};
    /// let p = Promise::<i32, &str>::new(|_| Err("💥"));
    /// assert_eq!(p.state(), State::Rejected);
    /// assert_eq!(p.error(), Some("💥"));
    /// ```
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let (resolver, promise) = Resolver::new();
        if let Err(error) = executor(resolver.clone()) {
            trace!("executor failed, rejecting");
            resolver.reject(error);
        }
        promise
    }

    pub fn resolve(value: T) -> Self {
        Self::settled(Ok(value))
    }

    pub fn reject(error: E) -> Self {
        Self::settled(Err(error))
    }

    fn settled(outcome: Result<T, E>) -> Self {
        let promise = Self::pending();
        promise.settle(outcome);
        promise
    }

    /// Chains a fulfillment handler. A rejection passes through untouched.
    ///
    /// Handlers run on whichever thread settles the promise. A panicking
    /// handler unwinds into that thread's `resolve`/`reject` call, and
    /// promises still waiting in the same settlement are left pending.
    pub fn then<F, R>(&self, on_fulfilled: F) -> Self
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: IntoStep<T, E>,
    {
        self.chain(Handlers {
            on_fulfilled: Some(Box::new(move |value| on_fulfilled(value).into_step())),
            on_rejected: None,
        })
    }

    pub fn then_else<F, R, G, S>(&self, on_fulfilled: F, on_rejected: G) -> Self
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: IntoStep<T, E>,
        G: FnOnce(E) -> S + Send + 'static,
        S: IntoStep<T, E>,
    {
        self.chain(Handlers {
            on_fulfilled: Some(Box::new(move |value| on_fulfilled(value).into_step())),
            on_rejected: Some(Box::new(move |error| on_rejected(error).into_step())),
        })
    }

    /// Chains a rejection handler. A fulfilled value passes through untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::Promise;
    /// let p = Promise::<i32, &str>::reject("💥")
    ///     .map(|v| v + 1)
    ///     .catch(|_| Promise::resolve(7));
    /// assert_eq!(p.value(), Some(7));
    /// assert_eq!(p.error(), None);
    /// ```
    pub fn catch<G, S>(&self, on_rejected: G) -> Self
    where
        G: FnOnce(E) -> S + Send + 'static,
        S: IntoStep<T, E>,
    {
        self.chain(Handlers {
            on_fulfilled: None,
            on_rejected: Some(Box::new(move |error| on_rejected(error).into_step())),
        })
    }

    pub fn map<F>(&self, f: F) -> Self
    where
        F: FnOnce(T) -> T + Send + 'static,
    {
        self.then(move |value| Step::Value(f(value)))
    }

    pub fn state(&self) -> State {
        match self.inner.lock().value {
            None => State::Pending,
            Some(Ok(_)) => State::Fulfilled,
            Some(Err(_)) => State::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().value.is_none()
    }

    pub fn value(&self) -> Option<T> {
        match self.inner.lock().value {
            Some(Ok(ref value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<E> {
        match self.inner.lock().value {
            Some(Err(ref error)) => Some(error.clone()),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<Result<T, E>> {
        self.inner.lock().value.clone()
    }

    fn pending() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value: None,
                reactions: vec![],
                waker: vec![],
            })),
        }
    }

    /// Already settled: run the matching handler right here. Pending:
    /// queue the handlers and hand back the promise they will settle.
    fn chain(&self, handlers: Handlers<T, E>) -> Self {
        let outcome = {
            let mut inner = self.inner.lock();
            match inner.value.clone() {
                Some(outcome) => outcome,
                None => {
                    let target = Self::pending();
                    inner.reactions.push(Reaction {
                        handlers,
                        target: target.clone(),
                    });
                    trace!(reactions = inner.reactions.len(), "continuation registered");
                    return target;
                }
            }
        };
        match handlers.react(&outcome) {
            Transition::Keep => self.clone(),
            Transition::Settle(outcome) => Self::settled(outcome),
            Transition::Adopt(promise) => promise,
        }
    }

    /// Settles this promise and then every promise waiting on it, breadth
    /// first through a work queue so long chains never grow the stack.
    /// Returns `false` if the promise was already settled.
    fn settle(&self, outcome: Result<T, E>) -> bool {
        let reactions = match self.transition(&outcome) {
            Some(reactions) => reactions,
            None => {
                debug!("promise already settled, ignoring");
                return false;
            }
        };
        let mut queue: VecDeque<_> = reactions
            .into_iter()
            .map(|reaction| (reaction, outcome.clone()))
            .collect();

        while let Some((Reaction { handlers, target }, outcome)) = queue.pop_front() {
            let next = match handlers.react(&outcome) {
                Transition::Keep => outcome,
                Transition::Settle(next) => next,
                Transition::Adopt(promise) => match promise.follow(&target) {
                    Some(next) => next,
                    None => continue,
                },
            };
            match target.transition(&next) {
                Some(reactions) => queue.extend(
                    reactions
                        .into_iter()
                        .map(|reaction| (reaction, next.clone())),
                ),
                None => debug!("chained promise already settled, ignoring"),
            }
        }
        true
    }

    /// The single-assignment step: stores the outcome, wakes awaiting tasks
    /// and takes the queued reactions. `None` if already settled.
    fn transition(&self, outcome: &Result<T, E>) -> Option<Vec<Reaction<T, E>>> {
        let (reactions, wakers) = {
            let mut promise = self.inner.lock();
            if promise.value.is_some() {
                return None;
            }
            promise.value = Some(outcome.clone());
            (
                std::mem::take(&mut promise.reactions),
                std::mem::take(&mut promise.waker),
            )
        };
        trace!(
            fulfilled = outcome.is_ok(),
            reactions = reactions.len(),
            "promise settled"
        );
        for waker in wakers {
            waker.wake()
        }
        Some(reactions)
    }

    /// Makes `waiter` follow this promise. Returns the outcome right away if
    /// there already is one.
    fn follow(&self, waiter: &Self) -> Option<Result<T, E>> {
        let mut inner = self.inner.lock();
        if let Some(ref outcome) = inner.value {
            return Some(outcome.clone());
        }
        inner.reactions.push(Reaction {
            handlers: Handlers {
                on_fulfilled: None,
                on_rejected: None,
            },
            target: waiter.clone(),
        });
        trace!("waiting on returned promise");
        None
    }
}

impl<T, E> Promise<T, E> {
    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T, E> Handlers<T, E>
where
    T: Clone,
    E: Clone,
{
    fn react(self, outcome: &Result<T, E>) -> Transition<T, E> {
        let step = match (outcome, self.on_fulfilled, self.on_rejected) {
            (Ok(value), Some(handler), _) => handler(value.clone()),
            (Err(error), _, Some(handler)) => handler(error.clone()),
            _ => return Transition::Keep,
        };
        match step {
            Ok(Step::Value(value)) => Transition::Settle(Ok(value)),
            Ok(Step::Promise(promise)) => Transition::Adopt(promise),
            Ok(Step::Unchanged) => Transition::Keep,
            Err(error) => Transition::Settle(Err(error)),
        }
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// A pending promise together with the resolver that settles it.
    pub fn new() -> (Self, Promise<T, E>) {
        let promise = Promise::pending();
        (
            Self {
                promise: promise.clone(),
            },
            promise,
        )
    }

    /// Returns `true` if this call fulfilled the promise.
    pub fn resolve(self, value: T) -> bool {
        self.promise.settle(Ok(value))
    }

    /// Returns `true` if this call rejected the promise.
    pub fn reject(self, error: E) -> bool {
        self.promise.settle(Err(error))
    }

    pub fn is_pending(&self) -> bool {
        self.promise.is_pending()
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T: Debug, E: Debug> Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Promise")
            .field("value", &inner.value)
            .field("reactions", &inner.reactions.len())
            .finish()
    }
}

impl<T: Debug, E: Debug> Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("promise", &self.promise)
            .finish()
    }
}

impl<T, E> IntoStep<T, E> for Step<T, E> {
    fn into_step(self) -> Result<Step<T, E>, E> {
        Ok(self)
    }
}

impl<T, E> IntoStep<T, E> for Promise<T, E> {
    fn into_step(self) -> Result<Step<T, E>, E> {
        Ok(Step::Promise(self))
    }
}

impl<T, E> IntoStep<T, E> for () {
    fn into_step(self) -> Result<Step<T, E>, E> {
        Ok(Step::Unchanged)
    }
}

impl<T, E, S> IntoStep<T, E> for Result<S, E>
where
    S: IntoStep<T, E>,
{
    fn into_step(self) -> Result<Step<T, E>, E> {
        self.and_then(IntoStep::into_step)
    }
}

impl<T, E> Future for Promise<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let mut promise = self.inner.lock();
        if let Some(ref value) = promise.value {
            return Poll::Ready(value.clone());
        }
        if !promise.waker.iter().any(|waker| waker.will_wake(cx.waker())) {
            promise.waker.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::{Promise, Resolver, State, Step};
    use futures::task::{waker, ArcWake};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    struct Inspect {
        promise: Promise<i32, ()>,
        seen: Mutex<Option<State>>,
    }

    impl ArcWake for Inspect {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            *arc_self.seen.lock().unwrap() = Some(arc_self.promise.state());
        }
    }

    #[test]
    fn test_waker_may_inspect_promise_on_wake() {
        let (resolver, promise) = Resolver::<i32, ()>::new();
        let inspect = Arc::new(Inspect {
            promise: promise.clone(),
            seen: Mutex::new(None),
        });
        let waker = waker(inspect.clone());
        let mut cx = Context::from_waker(&waker);
        let mut polled = promise.clone();
        assert_eq!(Pin::new(&mut polled).poll(&mut cx), Poll::Pending);

        resolver.resolve(3);
        assert_eq!(*inspect.seen.lock().unwrap(), Some(State::Fulfilled));
        assert_eq!(Pin::new(&mut polled).poll(&mut cx), Poll::Ready(Ok(3)));
    }

    #[test]
    fn test_repeated_polls_store_one_waker() {
        let (_resolver, promise) = Resolver::<i32, ()>::new();
        let inspect = Arc::new(Inspect {
            promise: promise.clone(),
            seen: Mutex::new(None),
        });
        let waker = waker(inspect);
        let mut cx = Context::from_waker(&waker);
        let mut polled = promise.clone();
        for _ in 0..5 {
            assert_eq!(Pin::new(&mut polled).poll(&mut cx), Poll::Pending);
        }
        assert_eq!(promise.inner.lock().waker.len(), 1);
    }

    #[test]
    fn test_reactions_run_in_registration_order() {
        let (resolver, promise) = Resolver::<i32, ()>::new();
        let seen = Arc::new(Mutex::new(vec![]));
        for tag in 0..4 {
            let seen = seen.clone();
            let _ = promise.then(move |v| {
                seen.lock().unwrap().push((tag, v));
            });
        }
        assert!(resolver.resolve(9));
        assert_eq!(*seen.lock().unwrap(), vec![(0, 9), (1, 9), (2, 9), (3, 9)]);
    }

    #[test]
    fn test_long_pending_chain_settles_iteratively() {
        let (resolver, head) = Resolver::<u64, ()>::new();
        let mut tail = head.clone();
        for _ in 0..200_000 {
            tail = tail.map(|v| v + 1);
        }
        assert_eq!(tail.state(), State::Pending);
        resolver.resolve(0);
        assert_eq!(tail.value(), Some(200_000));
    }

    #[test]
    fn test_long_adoption_chain_settles_iteratively() {
        let (resolver, head) = Resolver::<u64, ()>::new();
        let mut tail = head.clone();
        for _ in 0..100_000 {
            let (gate, source) = Resolver::<u64, ()>::new();
            let inner = tail.clone();
            tail = source.then(move |_| inner);
            gate.resolve(0);
        }
        assert!(tail.is_pending());
        resolver.resolve(5);
        assert_eq!(tail.value(), Some(5));
    }

    #[test]
    fn test_unchanged_keeps_rejection() {
        let (resolver, promise) = Resolver::<i32, &str>::new();
        let caught = promise.catch(|_| ());
        resolver.reject("💥");
        assert_eq!(caught.error(), Some("💥"));
    }

    #[test]
    fn test_second_settlement_is_ignored() {
        let (resolver, promise) = Resolver::<i32, &str>::new();
        assert!(resolver.clone().resolve(1));
        assert!(!resolver.clone().reject("late"));
        assert!(!resolver.resolve(2));
        assert_eq!(promise.result(), Some(Ok(1)));
    }

    #[test]
    fn test_handler_error_rejects_chained_promise() {
        let p = Promise::<i32, &str>::resolve(1)
            .then(|_| -> Result<Step<i32, &'static str>, &'static str> {
                Err("raised")
            });
        assert_eq!(p.state(), State::Rejected);
        assert_eq!(p.error(), Some("raised"));
    }
}
