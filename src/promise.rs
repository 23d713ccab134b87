//! The promise state machine.
//!
//! A [`Promise`] is a single-assignment future value: it starts pending and
//! settles exactly once, either fulfilled or rejected. Continuations are
//! registered with [`then`](Promise::then) and always run on a later
//! scheduler turn, in registration order, even when the promise was already
//! settled at registration time.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use tracing::{debug, trace};

use crate::pipe::pipe;
use crate::scheduler::Scheduler;
use crate::Error;

/// Settlement state of a promise. Transitions out of `Pending` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

/// What a continuation instructs its child promise to do.
///
/// A continuation signals failure by returning [`Step::Fail`]; there is no
/// separate thrown-exception channel, both failure paths of the dynamic
/// model collapse into this variant. Returning [`Step::Chain`] flattens
/// another promise into the child: the child settles with that promise's
/// eventual outcome.
#[derive(Clone)]
pub enum Step<T, E> {
    /// Resolve the child with this value.
    Value(T),
    /// Reject the child with this reason.
    Fail(E),
    /// Settle the child with the eventual outcome of this promise.
    Chain(Promise<T, E>),
}

impl<T, E> From<Result<T, E>> for Step<T, E> {
    fn from(outcome: Result<T, E>) -> Self {
        match outcome {
            Ok(value) => Step::Value(value),
            Err(reason) => Step::Fail(reason),
        }
    }
}

impl<T, E> From<Promise<T, E>> for Step<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Step::Chain(promise)
    }
}

/// Success continuation: receives the settled value.
pub type OnFulfilled<T, E> = Box<dyn FnOnce(T) -> Step<T, E>>;
/// Failure continuation: receives the rejection reason.
pub type OnRejected<T, E> = Box<dyn FnOnce(E) -> Step<T, E>>;

/// The narrow promise-like capability: anything that can register a pair of
/// continuations and hand back a chained [`Promise`]. Implemented by
/// [`Promise`] and [`Deferred`](crate::Deferred); [`when`](crate::when)
/// accepts any implementor.
pub trait Thenable<T, E> {
    fn then(
        &self,
        on_fulfilled: Option<OnFulfilled<T, E>>,
        on_rejected: Option<OnRejected<T, E>>,
    ) -> Promise<T, E>;
}

/// One registered continuation. `ran`/`step` memoize the first invocation so
/// a pass that revisits the record replays the captured result instead of
/// calling the continuation again.
struct Handler<T, E> {
    on_fulfilled: Option<OnFulfilled<T, E>>,
    on_rejected: Option<OnRejected<T, E>>,
    child: Promise<T, E>,
    ran: bool,
    step: Option<Step<T, E>>,
}

struct Inner<T, E> {
    state: State,
    value: Option<Result<T, E>>,
    handlers: Vec<Rc<RefCell<Handler<T, E>>>>,
    scheduled: bool,
    wakers: Vec<Waker>,
}

/// A clonable handle to one promise. All handles settle and subscribe the
/// same underlying state; the model is single-threaded and cooperative, so
/// handles are cheap `Rc` clones.
pub struct Promise<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
    // Liveness token: one strong count per handle. Waiters hold a `Weak`
    // and report `Error::Dropped` once every handle is gone.
    alive: Rc<()>,
    scheduler: Scheduler,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            alive: self.alive.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T, E> Drop for Promise<T, E> {
    /// If this was the last handle, wake waiters so they observe the drop.
    fn drop(&mut self) {
        if Rc::strong_count(&self.alive) == 1 {
            let wakers = match self.inner.try_borrow_mut() {
                Ok(mut inner) => mem::take(&mut inner.wakers),
                Err(_) => Vec::new(),
            };
            for waker in wakers {
                waker.wake();
            }
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.inner.borrow().state)
            .finish_non_exhaustive()
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    pub fn new(scheduler: &Scheduler) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                value: None,
                handlers: Vec::new(),
                scheduled: false,
                wakers: Vec::new(),
            })),
            alive: Rc::new(()),
            scheduler: scheduler.clone(),
        }
    }

    /// A promise already fulfilled with `value`. Subscribers still run
    /// asynchronously.
    pub fn resolved(scheduler: &Scheduler, value: T) -> Self {
        let promise = Self::new(scheduler);
        promise.resolve(value);
        promise
    }

    /// A promise already rejected with `reason`.
    pub fn rejected(scheduler: &Scheduler, reason: E) -> Self {
        let promise = Self::new(scheduler);
        promise.reject(reason);
        promise
    }

    pub fn state(&self) -> State {
        self.inner.borrow().state
    }

    /// The settled outcome, or `None` while pending.
    pub fn value(&self) -> Option<Result<T, E>> {
        self.inner.borrow().value.clone()
    }

    /// Fulfills the promise. A no-op once settled; continuations never run
    /// inside this call.
    pub fn resolve(&self, value: T) {
        self.settle(Ok(value));
    }

    /// Rejects the promise. A no-op once settled.
    pub fn reject(&self, reason: E) {
        self.settle(Err(reason));
    }

    fn settle(&self, outcome: Result<T, E>) {
        let state = if outcome.is_ok() {
            State::Fulfilled
        } else {
            State::Rejected
        };

        let (wakers, schedule) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != State::Pending {
                return;
            }
            inner.state = state;
            inner.value = Some(outcome);
            let schedule = !inner.scheduled;
            if schedule {
                inner.scheduled = true;
            }
            (mem::take(&mut inner.wakers), schedule)
        };

        debug!(?state, "promise settled");

        for waker in wakers {
            waker.wake();
        }
        if schedule {
            self.schedule_process();
        }
    }

    /// Registers a continuation pair and returns the child promise that the
    /// pair will settle. Registration is legal at any time; on an already
    /// settled promise it queues a fresh processing pass.
    pub fn then(
        &self,
        on_fulfilled: Option<OnFulfilled<T, E>>,
        on_rejected: Option<OnRejected<T, E>>,
    ) -> Promise<T, E> {
        let child = Promise::new(&self.scheduler);
        let record = Rc::new(RefCell::new(Handler {
            on_fulfilled,
            on_rejected,
            child: child.clone(),
            ran: false,
            step: None,
        }));

        let schedule = {
            let mut inner = self.inner.borrow_mut();
            inner.handlers.push(record);
            let schedule = inner.state != State::Pending && !inner.scheduled;
            if schedule {
                inner.scheduled = true;
            }
            schedule
        };

        if schedule {
            self.schedule_process();
        }
        child
    }

    /// A future that yields the settled outcome, or [`Error::Dropped`] if
    /// every handle to this promise goes away first.
    pub fn waiter(&self) -> Waiter<T, E> {
        Waiter {
            inner: self.inner.clone(),
            alive: Rc::downgrade(&self.alive),
        }
    }

    fn schedule_process(&self) {
        let this = self.clone();
        self.scheduler.schedule(move || this.process());
    }

    /// One processing pass. Walks a snapshot of the handler list, so
    /// continuations registered during the pass wait for a later pass.
    fn process(&self) {
        let (outcome, snapshot) = {
            let mut inner = self.inner.borrow_mut();
            inner.scheduled = false;
            if inner.state == State::Pending {
                return;
            }
            let outcome = match inner.value.clone() {
                Some(outcome) => outcome,
                None => return,
            };
            (outcome, inner.handlers.clone())
        };

        trace!(handlers = snapshot.len(), "processing pass");

        for record in &snapshot {
            self.dispatch(record, &outcome);
        }
    }

    fn dispatch(&self, record: &Rc<RefCell<Handler<T, E>>>, outcome: &Result<T, E>) {
        let child;
        let mut run_fulfilled = None;
        let mut run_rejected = None;
        let mut step = None;
        {
            let mut handler = record.borrow_mut();
            child = handler.child.clone();
            if handler.ran {
                match handler.step.clone() {
                    Some(memo) => step = Some(memo),
                    // The continuation is mid-invocation on an outer pass;
                    // leave the record to that pass.
                    None => return,
                }
            } else {
                match outcome {
                    Ok(_) => run_fulfilled = handler.on_fulfilled.take(),
                    Err(_) => run_rejected = handler.on_rejected.take(),
                }
                if run_fulfilled.is_some() || run_rejected.is_some() {
                    handler.ran = true;
                }
            }
        }

        // Invoked with no borrow held: the continuation may register new
        // handlers or settle other promises re-entrantly.
        let fresh = match (outcome, run_fulfilled, run_rejected) {
            (Ok(value), Some(callback), _) => Some(callback(value.clone())),
            (Err(reason), _, Some(callback)) => Some(callback(reason.clone())),
            _ => None,
        };

        if let Some(fresh) = fresh {
            record.borrow_mut().step = Some(fresh.clone());
            step = Some(fresh);
        }

        match step {
            // Pass-through link: no matching continuation, so the child
            // settles the same way the parent did.
            None => match outcome {
                Ok(value) => child.resolve(value.clone()),
                Err(reason) => child.reject(reason.clone()),
            },
            Some(Step::Value(value)) => child.resolve(value),
            Some(Step::Fail(reason)) => child.reject(reason),
            Some(Step::Chain(promise)) => pipe(&promise, &child),
        }
    }
}

impl<T, E> Thenable<T, E> for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn then(
        &self,
        on_fulfilled: Option<OnFulfilled<T, E>>,
        on_rejected: Option<OnRejected<T, E>>,
    ) -> Promise<T, E> {
        Promise::then(self, on_fulfilled, on_rejected)
    }
}

/// Future adapter for a [`Promise`]. Reads the settlement directly, so it
/// does not need the scheduler pumped; while the promise is pending it parks
/// the task's waker and is woken on settlement or when the last promise
/// handle is dropped.
pub struct Waiter<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
    alive: Weak<()>,
}

impl<T, E> Future for Waiter<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, Error<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        if let Some(outcome) = inner.value.clone() {
            return Poll::Ready(outcome.map_err(Error::Rejected));
        }
        if self.alive.upgrade().is_none() {
            return Poll::Ready(Err(Error::Dropped));
        }
        inner.wakers.push(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use futures::executor::block_on;

    use super::{Promise, State, Step};
    use crate::{Error, Scheduler};

    #[test]
    fn test_single_resolution() {
        let scheduler = Scheduler::new();
        let promise: Promise<i32, String> = Promise::new(&scheduler);

        promise.resolve(1);
        promise.resolve(2);
        promise.reject("late".into());

        assert_eq!(promise.state(), State::Fulfilled);
        assert_eq!(promise.value(), Some(Ok(1)));
    }

    #[test]
    fn test_delivery_is_asynchronous() {
        let scheduler = Scheduler::new();
        let promise: Promise<i32, String> = Promise::new(&scheduler);
        let seen = Rc::new(Cell::new(0));

        let capture = seen.clone();
        promise.then(
            Some(Box::new(move |v| {
                capture.set(v);
                Step::Value(v)
            })),
            None,
        );

        promise.resolve(7);
        assert_eq!(seen.get(), 0);

        scheduler.run_until_idle();
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn test_late_subscriber_still_runs_asynchronously() {
        let scheduler = Scheduler::new();
        let promise: Promise<i32, String> = Promise::resolved(&scheduler, 3);
        scheduler.run_until_idle();

        let seen = Rc::new(Cell::new(0));
        let capture = seen.clone();
        promise.then(
            Some(Box::new(move |v| {
                capture.set(v);
                Step::Value(v)
            })),
            None,
        );

        assert_eq!(seen.get(), 0);
        scheduler.run_until_idle();
        assert_eq!(seen.get(), 3);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let scheduler = Scheduler::new();
        let promise: Promise<i32, String> = Promise::new(&scheduler);
        let order = Rc::new(RefCell::new(Vec::new()));

        for tag in 1..=3 {
            let order = order.clone();
            promise.then(
                Some(Box::new(move |v| {
                    order.borrow_mut().push(tag);
                    Step::Value(v)
                })),
                None,
            );
        }

        promise.resolve(0);
        scheduler.run_until_idle();
        assert_eq!(*order.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_fail_step_rejects_child() {
        let scheduler = Scheduler::new();
        let promise: Promise<i32, String> = Promise::new(&scheduler);
        let seen = Rc::new(RefCell::new(String::new()));

        let failing = promise.then(Some(Box::new(|_| Step::Fail("x".to_string()))), None);
        let capture = seen.clone();
        failing.then(
            None,
            Some(Box::new(move |reason| {
                *capture.borrow_mut() = reason.clone();
                Step::Fail(reason)
            })),
        );

        promise.resolve(1);
        scheduler.run_until_idle();

        assert_eq!(*seen.borrow(), "x");
        assert_eq!(failing.state(), State::Rejected);
    }

    #[test]
    fn test_pass_through_propagates_rejection() {
        let scheduler = Scheduler::new();
        let promise: Promise<i32, String> = Promise::new(&scheduler);
        let skipped = Rc::new(Cell::new(false));
        let seen = Rc::new(RefCell::new(String::new()));

        let mark = skipped.clone();
        let middle = promise.then(
            Some(Box::new(move |v| {
                mark.set(true);
                Step::Value(v)
            })),
            None,
        );
        let capture = seen.clone();
        middle.then(
            None,
            Some(Box::new(move |reason| {
                *capture.borrow_mut() = reason.clone();
                Step::Fail(reason)
            })),
        );

        promise.reject("boom".into());
        scheduler.run_until_idle();

        assert!(!skipped.get());
        assert_eq!(*seen.borrow(), "boom");
    }

    #[test]
    fn test_chain_step_flattens_nested_promise() {
        let scheduler = Scheduler::new();
        let promise: Promise<i32, String> = Promise::new(&scheduler);
        let nested: Promise<i32, String> = Promise::new(&scheduler);
        let seen = Rc::new(Cell::new(0));

        let chained = {
            let nested = nested.clone();
            promise.then(Some(Box::new(move |_| Step::Chain(nested))), None)
        };
        let capture = seen.clone();
        chained.then(
            Some(Box::new(move |v| {
                capture.set(v);
                Step::Value(v)
            })),
            None,
        );

        promise.resolve(1);
        scheduler.run_until_idle();
        assert_eq!(chained.state(), State::Pending);
        assert_eq!(seen.get(), 0);

        nested.resolve(7);
        scheduler.run_until_idle();
        assert_eq!(chained.state(), State::Fulfilled);
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn test_callbacks_run_once_across_passes() {
        let scheduler = Scheduler::new();
        let promise: Promise<i32, String> = Promise::new(&scheduler);
        let calls = Rc::new(Cell::new(0));

        let count = calls.clone();
        promise.then(
            Some(Box::new(move |v| {
                count.set(count.get() + 1);
                Step::Value(v)
            })),
            None,
        );

        promise.resolve(1);
        scheduler.run_until_idle();
        assert_eq!(calls.get(), 1);

        // A late registration queues another pass over the same handler
        // list; the first record must replay its memo, not run again.
        let late = Rc::new(Cell::new(0));
        let capture = late.clone();
        promise.then(
            Some(Box::new(move |v| {
                capture.set(v);
                Step::Value(v)
            })),
            None,
        );
        scheduler.run_until_idle();

        assert_eq!(calls.get(), 1);
        assert_eq!(late.get(), 1);
    }

    #[test]
    fn test_waiter_sees_resolution() {
        let scheduler = Scheduler::new();
        let promise: Promise<String, String> = Promise::new(&scheduler);
        promise.resolve("hi".into());

        assert_eq!(block_on(promise.waiter()), Ok("hi".to_string()));
    }

    #[test]
    fn test_waiter_sees_rejection() {
        let scheduler = Scheduler::new();
        let promise: Promise<i32, String> = Promise::new(&scheduler);
        promise.reject("boom".into());

        assert_eq!(
            block_on(promise.waiter()),
            Err(Error::Rejected("boom".to_string()))
        );
    }

    #[test]
    fn test_waiter_sees_dropped_promise() {
        let scheduler = Scheduler::new();
        let waiter = {
            let promise: Promise<i32, String> = Promise::new(&scheduler);
            promise.waiter()
        };

        assert_eq!(block_on(waiter), Err(Error::Dropped));
    }
}
