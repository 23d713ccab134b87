//! A promise wrapped with jQuery-style callback lists.
//!
//! [`Deferred`] owns a [`Promise`] and layers three registration lists on
//! top of it: `done` runs on fulfillment, `fail` on rejection, `always` on
//! either outcome. Callbacks run asynchronously, in registration order, and
//! exactly once; registering after settlement is a silent no-op.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use tracing::trace;

use crate::promise::{OnFulfilled, OnRejected, Promise, State, Step, Thenable};
use crate::scheduler::Scheduler;

type DoneCallback<T> = Box<dyn FnOnce(T)>;
type FailCallback<E> = Box<dyn FnOnce(E)>;
type AlwaysCallback<T, E> = Box<dyn FnOnce(Result<T, E>)>;

struct Lists<T, E> {
    on_done: Vec<DoneCallback<T>>,
    on_fail: Vec<FailCallback<E>>,
    on_always: Vec<AlwaysCallback<T, E>>,
}

pub struct Deferred<T, E> {
    promise: Promise<T, E>,
    lists: Rc<RefCell<Lists<T, E>>>,
    scheduler: Scheduler,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            lists: self.lists.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    pub fn new(scheduler: &Scheduler) -> Self {
        let deferred = Deferred {
            promise: Promise::new(scheduler),
            lists: Rc::new(RefCell::new(Lists {
                on_done: Vec::new(),
                on_fail: Vec::new(),
                on_always: Vec::new(),
            })),
            scheduler: scheduler.clone(),
        };
        deferred.bootstrap();
        deferred
    }

    /// Attaches the pair of continuations that drain the callback lists once
    /// the wrapped promise settles. The drain is scheduled one further turn
    /// out, so `done`/`fail`/`always` callbacks never run inside a
    /// processing pass.
    fn bootstrap(&self) {
        let on_fulfilled: OnFulfilled<T, E> = {
            let lists = self.lists.clone();
            let scheduler = self.scheduler.clone();
            Box::new(move |value: T| {
                let step = Step::Value(value.clone());
                scheduler.schedule(move || {
                    let (done, always) = {
                        let mut lists = lists.borrow_mut();
                        let done = mem::take(&mut lists.on_done);
                        let always = mem::take(&mut lists.on_always);
                        lists.on_fail.clear();
                        (done, always)
                    };
                    trace!(done = done.len(), always = always.len(), "draining done lists");
                    for callback in done {
                        callback(value.clone());
                    }
                    for callback in always {
                        callback(Ok(value.clone()));
                    }
                });
                step
            })
        };

        let on_rejected: OnRejected<T, E> = {
            let lists = self.lists.clone();
            let scheduler = self.scheduler.clone();
            Box::new(move |reason: E| {
                let step = Step::Fail(reason.clone());
                scheduler.schedule(move || {
                    let (fail, always) = {
                        let mut lists = lists.borrow_mut();
                        let fail = mem::take(&mut lists.on_fail);
                        let always = mem::take(&mut lists.on_always);
                        lists.on_done.clear();
                        (fail, always)
                    };
                    trace!(fail = fail.len(), always = always.len(), "draining fail lists");
                    for callback in fail {
                        callback(reason.clone());
                    }
                    for callback in always {
                        callback(Err(reason.clone()));
                    }
                });
                step
            })
        };

        self.promise.then(Some(on_fulfilled), Some(on_rejected));
    }

    fn open(&self) -> bool {
        self.promise.state() == State::Pending
    }

    /// Registers a callback to run with the value on fulfillment. Dropped
    /// silently if the deferred has already settled.
    pub fn done(&self, callback: impl FnOnce(T) + 'static) -> &Self {
        if self.open() {
            self.lists.borrow_mut().on_done.push(Box::new(callback));
        }
        self
    }

    /// Registers a callback to run with the reason on rejection. Dropped
    /// silently if the deferred has already settled.
    pub fn fail(&self, callback: impl FnOnce(E) + 'static) -> &Self {
        if self.open() {
            self.lists.borrow_mut().on_fail.push(Box::new(callback));
        }
        self
    }

    /// Registers a callback to run on either outcome, receiving the
    /// settlement as a `Result`. Dropped silently once settled.
    pub fn always(&self, callback: impl FnOnce(Result<T, E>) + 'static) -> &Self {
        if self.open() {
            self.lists.borrow_mut().on_always.push(Box::new(callback));
        }
        self
    }

    pub fn resolve(&self, value: T) -> &Self {
        self.promise.resolve(value);
        self
    }

    pub fn reject(&self, reason: E) -> &Self {
        self.promise.reject(reason);
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.promise.state() == State::Fulfilled
    }

    pub fn is_rejected(&self) -> bool {
        self.promise.state() == State::Rejected
    }

    pub fn state(&self) -> State {
        self.promise.state()
    }

    /// The wrapped promise.
    pub fn promise(&self) -> &Promise<T, E> {
        &self.promise
    }

    /// Chains on the wrapped promise; the result drops back to the core
    /// [`Promise`] primitive.
    pub fn then(
        &self,
        on_fulfilled: Option<OnFulfilled<T, E>>,
        on_rejected: Option<OnRejected<T, E>>,
    ) -> Promise<T, E> {
        self.promise.then(on_fulfilled, on_rejected)
    }
}

impl<T, E> Thenable<T, E> for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn then(
        &self,
        on_fulfilled: Option<OnFulfilled<T, E>>,
        on_rejected: Option<OnRejected<T, E>>,
    ) -> Promise<T, E> {
        self.promise.then(on_fulfilled, on_rejected)
    }
}
