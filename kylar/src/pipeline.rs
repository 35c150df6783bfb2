use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use crate::Error;

/// Byte budget for the read -> process and process -> write queues.
pub const DEFAULT_QUEUE_BUDGET: u64 = 64 << 20;

/// An internally synchronised producer-consumer queue with a value budget.
///
/// Every item carries a "value" (its byte cost, via the value function).
/// While the pending value meets the budget, inserts block until consumers
/// free up room. Consumers block while the queue is empty, until the queue
/// is closed or poisoned.
///
/// Poisoning wakes all waiters: pending inserts return immediately without
/// inserting and pending gets return `None`, so all stages of a pipeline
/// drain to termination in a bounded number of steps.
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    condition: Condvar,
    value_fn: Box<dyn Fn(&T) -> u64 + Send + Sync>,
    budget: u64,
}

struct QueueState<T> {
    items: VecDeque<T>,
    pending_value: u64,
    closed: bool,
    poisoned: bool,
}

impl<T> BoundedQueue<T> {
    pub fn new<F>(budget: u64, value_fn: F) -> Self
    where
        F: Fn(&T) -> u64 + Send + Sync + 'static,
    {
        assert!(budget > 0);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                pending_value: 0,
                closed: false,
                poisoned: false,
            }),
            condition: Condvar::new(),
            value_fn: Box::new(value_fn),
            budget,
        }
    }

    /// Insert an item, blocking while the pending value meets the budget.
    /// On a poisoned queue the item is dropped.
    pub fn insert(&self, item: T) {
        let mut state = self.state.lock().unwrap();
        while state.pending_value >= self.budget && !state.poisoned {
            state = self.condition.wait(state).unwrap();
        }
        if state.poisoned {
            return;
        }
        state.pending_value += (self.value_fn)(&item);
        state.items.push_back(item);
        drop(state);
        self.condition.notify_all();
    }

    /// Take the next item, blocking while the queue is empty. Returns `None`
    /// once the queue is closed and drained, or has been poisoned.
    pub fn get(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.poisoned {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                state.pending_value -= (self.value_fn)(&item);
                drop(state);
                self.condition.notify_all();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self.condition.wait(state).unwrap();
        }
    }

    /// Mark the end of the stream. Consumers drain what is left and then
    /// see `None`.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.condition.notify_all();
    }

    /// Current pending value, for tests and diagnostics.
    pub fn pending_value(&self) -> u64 {
        self.state.lock().unwrap().pending_value
    }
}

/// Queues a pipeline's error state can poison, type-erased.
pub trait PoisonTarget: Sync {
    fn poison(&self);
}

impl<T: Send> PoisonTarget for BoundedQueue<T> {
    fn poison(&self) {
        let mut state = self.state.lock().unwrap();
        state.poisoned = true;
        state.pending_value = 0;
        state.items.clear();
        drop(state);
        self.condition.notify_all();
    }
}

/// Shared failure flag of one pipeline pass. The first error wins and
/// poisons every registered queue; later errors are dropped.
pub struct ErrorState<'a> {
    signaled: AtomicBool,
    first_error: Mutex<Option<Error>>,
    queues: Vec<&'a dyn PoisonTarget>,
}

impl<'a> ErrorState<'a> {
    pub fn new(queues: Vec<&'a dyn PoisonTarget>) -> Self {
        Self {
            signaled: AtomicBool::new(false),
            first_error: Mutex::new(None),
            queues,
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    pub fn signal(&self, error: Error) {
        if !self.signaled.swap(true, Ordering::AcqRel) {
            *self.first_error.lock().unwrap() = Some(error);
        }
        for queue in &self.queues {
            queue.poison();
        }
    }

    /// The first recorded error, if any stage failed.
    pub fn into_error(self) -> Option<Error> {
        self.first_error.into_inner().unwrap()
    }
}

/// Run a stage body and route its error into the shared state.
pub fn run_stage<F>(error_state: &ErrorState<'_>, stage: F)
where
    F: FnOnce() -> Result<(), Error>,
{
    if let Err(error) = stage() {
        error_state.signal(error);
    }
}
