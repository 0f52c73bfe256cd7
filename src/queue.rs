use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

struct QueueState<T> {
    items: VecDeque<T>,
    continue_blocking: bool,
}

/// FIFO handoff between producer and consumer threads.
///
/// `dequeue` blocks while the queue is empty, until an item arrives or
/// blocking is switched off with [`set_continue_blocking(false)`], which
/// releases every waiting consumer at once.
///
/// [`set_continue_blocking(false)`]: SignalQueue::set_continue_blocking
pub struct SignalQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> Default for SignalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SignalQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                continue_blocking: true,
            }),
            available: Condvar::new(),
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends to the tail and wakes one waiting consumer. Never blocks.
    pub fn enqueue(&self, item: T) {
        let mut state = self.lock();
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
    }

    /// Removes the head, waiting while the queue is empty and blocking is
    /// enabled. Returns `None` only once blocking has been switched off and
    /// nothing is left.
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.lock();
        while state.continue_blocking && state.items.is_empty() {
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.items.pop_front()
    }

    pub fn try_dequeue(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    pub fn continue_blocking(&self) -> bool {
        self.lock().continue_blocking
    }

    /// `false` releases all blocked `dequeue` callers; `true` re-arms
    /// blocking for later calls.
    pub fn set_continue_blocking(&self, value: bool) {
        let mut state = self.lock();
        state.continue_blocking = value;
        drop(state);
        if !value {
            self.available.notify_all();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Drops every queued item, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let drained: Vec<T> = self.lock().items.drain(..).collect();
        // items are dropped outside the lock
        drained.len()
    }
}
