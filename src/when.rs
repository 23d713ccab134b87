//! Joins several promise-like inputs into one deferred outcome.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use crate::deferred::Deferred;
use crate::promise::{OnFulfilled, OnRejected, State, Step, Thenable};
use crate::scheduler::Scheduler;

/// Returns a [`Deferred`] that resolves with every input's value, in input
/// order, once all inputs have fulfilled — or rejects with the first
/// failure's reason as soon as any input rejects, without waiting for the
/// rest. With no inputs the result is already resolved with an empty `Vec`;
/// observers still see it on a later turn.
///
/// Inputs may be promises, deferreds, or anything else implementing
/// [`Thenable`].
pub fn when<T, E, P, I>(scheduler: &Scheduler, items: I) -> Deferred<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    P: Thenable<T, E>,
    I: IntoIterator<Item = P>,
{
    let result: Deferred<Vec<T>, E> = Deferred::new(scheduler);
    let items: Vec<P> = items.into_iter().collect();
    let total = items.len();

    if total == 0 {
        result.resolve(Vec::new());
        return result;
    }

    let slots: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; total]));
    let fulfilled = Rc::new(Cell::new(0usize));

    for (index, item) in items.iter().enumerate() {
        let on_fulfilled: OnFulfilled<T, E> = {
            let slots = slots.clone();
            let fulfilled = fulfilled.clone();
            let result = result.clone();
            Box::new(move |value: T| {
                slots.borrow_mut()[index] = Some(value.clone());
                fulfilled.set(fulfilled.get() + 1);
                if fulfilled.get() == total && result.state() == State::Pending {
                    let values: Vec<T> = slots
                        .borrow_mut()
                        .iter_mut()
                        .map(|slot| slot.take().expect("every input settled"))
                        .collect();
                    trace!(inputs = total, "join complete");
                    result.resolve(values);
                }
                Step::Value(value)
            })
        };

        let on_rejected: OnRejected<T, E> = {
            let result = result.clone();
            Box::new(move |reason: E| {
                // First failure wins; later settlements are no-ops.
                if result.state() == State::Pending {
                    trace!(input = index, "join rejected");
                    result.reject(reason.clone());
                }
                Step::Fail(reason)
            })
        };

        item.then(Some(on_fulfilled), Some(on_rejected));
    }

    result
}
