//! A cooperative turn-queue scheduler. Every asynchronous guarantee in this
//! crate reduces to one primitive: run this zero-argument task on a later
//! turn, in submission order. The embedder pumps the queue with [`turn`] or
//! [`run_until_idle`].
//!
//! [`turn`]: Scheduler::turn
//! [`run_until_idle`]: Scheduler::run_until_idle

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::trace;

type Task = Box<dyn FnOnce()>;

/// Handle to a FIFO task queue. Cloning yields another handle to the same
/// queue; the model is single-threaded, so there are no locks.
#[derive(Clone, Default)]
pub struct Scheduler {
    queue: Rc<RefCell<VecDeque<Task>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `task` to run on a later turn. Tasks run in submission order.
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Runs one turn: exactly the tasks that were queued when the call
    /// began. Tasks they queue wait for the next turn. Returns the number
    /// of tasks run.
    pub fn turn(&self) -> usize {
        let batch = self.queue.borrow().len();
        trace!(batch, "scheduler turn");

        for _ in 0..batch {
            // The borrow is released before the task runs so tasks may
            // schedule more work or pump the queue themselves.
            let task = self.queue.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }

        batch
    }

    /// Runs turns until the queue is empty, returning the total number of
    /// tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;

        loop {
            let task = self.queue.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    total += 1;
                }
                None => break,
            }
        }

        total
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}
