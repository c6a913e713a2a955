//! Chainable promises: a [`Promise`] is settled once through its
//! [`Resolver`], either right away inside the executor or later from any
//! thread, and continuations attached with [`Promise::then`] or
//! [`Promise::catch`] run when it settles.
//!
//! ```
//! use promise_chain::{scheduler::schedule_after, Promise, State};
//! use futures::executor::block_on;
//! use std::time::Duration;
//!
//! let p = Promise::<i32, String>::new(|resolver| {
//!     schedule_after(Duration::from_millis(10), move || {
//!         resolver.resolve(2);
//!     });
//!     Ok(())
//! })
//! .map(|v| v + 5);
//! assert_eq!(p.state(), State::Pending);
//! assert_eq!(block_on(p), Ok(7));
//! ```
pub mod combinators;
pub mod promise;
pub mod scheduler;

pub use promise::{IntoStep, Promise, Resolver, State, Step};
pub use scheduler::Scheduler;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("promise timed out")]
    Timeout,
    #[error("scheduler has stopped")]
    SchedulerStopped,
    #[error("failed to spawn scheduler thread {name}: {reason}")]
    Spawn { name: String, reason: String },
}
