//! Single-assignment promises with chainable continuations.
//!
//! A [`Promise`] settles exactly once, then drives its registered
//! continuations asynchronously: nothing ever runs inside `resolve`,
//! `reject` or `then`, and handlers on one promise run in registration
//! order. [`Deferred`] layers jQuery-style `done`/`fail`/`always` callback
//! lists over a promise, and [`when`] joins any number of promise-like
//! inputs into one deferred outcome.
//!
//! The only environment dependency is the [`Scheduler`], a cooperative
//! single-threaded turn queue that the embedder pumps.
//!
//! # Examples
//!
//! ```
//! use assure::{Promise, Scheduler, Step};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let scheduler = Scheduler::new();
//! let promise: Promise<i32, String> = Promise::new(&scheduler);
//!
//! let seen = Rc::new(Cell::new(0));
//! let capture = seen.clone();
//! promise
//!     .then(Some(Box::new(|v| Step::Value(v + 1))), None)
//!     .then(
//!         Some(Box::new(move |v| {
//!             capture.set(v);
//!             Step::Value(v)
//!         })),
//!         None,
//!     );
//!
//! promise.resolve(41);
//! assert_eq!(seen.get(), 0); // nothing runs inside `resolve`
//! scheduler.run_until_idle();
//! assert_eq!(seen.get(), 42);
//! ```

pub mod deferred;
mod pipe;
pub mod promise;
pub mod scheduler;
pub mod when;

pub use deferred::Deferred;
pub use promise::{OnFulfilled, OnRejected, Promise, State, Step, Thenable, Waiter};
pub use scheduler::Scheduler;
pub use when::when;

/// Faults a [`Waiter`] can observe while waiting on a promise.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error<E> {
    /// The promise settled on the failure channel.
    #[error("promise rejected")]
    Rejected(E),
    /// Every handle able to settle the promise was dropped while it was
    /// still pending.
    #[error("promise dropped before settlement")]
    Dropped,
}
