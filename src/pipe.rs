//! Pipes a settlement from one promise into another.

use crate::promise::{OnFulfilled, OnRejected, Promise, Step, Thenable};

/// Subscribes to `parent` and forwards its eventual outcome: success
/// resolves `child`, failure rejects it. This is how a promise returned from
/// a continuation is flattened into a single settlement on the child.
pub(crate) fn pipe<T, E, P>(parent: &P, child: &Promise<T, E>)
where
    T: Clone + 'static,
    E: Clone + 'static,
    P: Thenable<T, E>,
{
    let on_fulfilled: OnFulfilled<T, E> = {
        let child = child.clone();
        Box::new(move |value: T| {
            child.resolve(value.clone());
            Step::Value(value)
        })
    };
    let on_rejected: OnRejected<T, E> = {
        let child = child.clone();
        Box::new(move |reason: E| {
            child.reject(reason.clone());
            Step::Fail(reason)
        })
    };

    parent.then(Some(on_fulfilled), Some(on_rejected));
}
