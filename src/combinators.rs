//! `Promise::all` and `Promise::race`. Both only use the public chaining
//! surface of the input promises, so inputs may have other consumers too.
use crate::{Promise, Resolver};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

struct Gather<T> {
    slots: Vec<Option<T>>,
    fulfilled: usize,
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Fulfills with every input's value, in input order, once all inputs
    /// are fulfilled. Rejects with the first rejection; an input that is
    /// already rejected when `all` is called wins immediately.
    ///
    /// An empty input fulfills with an empty list.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::{Promise, Resolver};
    /// let (slow, p1) = Resolver::<i32, String>::new();
    /// let all = Promise::all([p1, Promise::resolve(2), Promise::resolve(3)]);
    /// assert!(all.is_pending());
    /// slow.resolve(1);
    /// assert_eq!(all.value(), Some(vec![1, 2, 3]));
    /// ```
    pub fn all<I>(promises: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        if let Some(error) = promises.iter().find_map(Promise::error) {
            trace!("all: input already rejected");
            return Promise::reject(error);
        }
        if promises.is_empty() {
            return Promise::resolve(vec![]);
        }

        let (resolver, result) = Resolver::new();
        let gather = Arc::new(Mutex::new(Gather {
            slots: vec![None; promises.len()],
            fulfilled: 0,
        }));

        for (index, promise) in promises.iter().enumerate() {
            let on_fulfilled = resolver.clone();
            let on_rejected = resolver.clone();
            let gather = gather.clone();
            promise.then_else(
                move |value| {
                    let mut gather = gather.lock();
                    if !on_fulfilled.is_pending() {
                        return;
                    }
                    gather.slots[index] = Some(value);
                    gather.fulfilled += 1;
                    trace!(index, fulfilled = gather.fulfilled, "all: input fulfilled");
                    if gather.fulfilled == gather.slots.len() {
                        let values: Vec<T> = gather.slots.drain(..).flatten().collect();
                        drop(gather);
                        on_fulfilled.resolve(values);
                    }
                },
                move |error| {
                    if on_rejected.is_pending() {
                        trace!(index, "all: input rejected");
                        on_rejected.reject(error);
                    }
                },
            );
        }
        result
    }

    /// Settles like whichever input settles first, fulfilled or rejected.
    /// Inputs that are already settled are taken in input order.
    ///
    /// An empty input never settles.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::{Promise, Resolver};
    /// let (_never, p1) = Resolver::<i32, String>::new();
    /// let (later, p2) = Resolver::new();
    /// let race = Promise::race([p1, p2]);
    /// later.reject("💥".to_string());
    /// assert_eq!(race.error().as_deref(), Some("💥"));
    /// ```
    pub fn race<I>(promises: I) -> Promise<T, E>
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        let (resolver, result) = Resolver::new();
        for promise in promises {
            let on_fulfilled = resolver.clone();
            let on_rejected = resolver.clone();
            promise.then_else(
                move |value| {
                    if on_fulfilled.is_pending() {
                        on_fulfilled.resolve(value);
                    }
                },
                move |error| {
                    if on_rejected.is_pending() {
                        on_rejected.reject(error);
                    }
                },
            );
        }
        result
    }
}
