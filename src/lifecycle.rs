//! Start/stop state machine shared by every pool flavour.

use super::{
    errors::{ItemFailure, PoolError},
    result::PoolResult,
};
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle, ThreadId},
};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolState::Stopped => "stopped",
            PoolState::Starting => "starting",
            PoolState::Started => "started",
            PoolState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Receives lifecycle notifications from a pool.
///
/// `on_state_changed` runs synchronously on the thread that called
/// `start`/`stop`, or on the last worker out when a pool is dropped from one
/// of its own workers. `on_item_failed` runs on the worker thread that caught
/// the failure. Neither is called while the pool holds any of its locks, and
/// a panic in either is caught and logged.
pub trait PoolObserver: Send + Sync {
    fn on_state_changed(&self, pool: &str, state: PoolState);

    fn on_item_failed(&self, _pool: &str, _failure: &ItemFailure) {}
}

impl<F> PoolObserver for F
where
    F: Fn(&str, PoolState) + Send + Sync,
{
    fn on_state_changed(&self, pool: &str, state: PoolState) {
        self(pool, state)
    }
}

/// Returned by `subscribe`, pass it to `unsubscribe` to detach the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Control {
    state: PoolState,
    drain: bool,
    workers: Vec<JoinHandle<()>>,
    /// Worker threads spawned and not yet exited.
    live: usize,
    /// Stop was requested with nobody left to join the workers.
    detached: bool,
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    entries: Vec<(SubscriptionId, Arc<dyn PoolObserver>)>,
}

pub(crate) struct Lifecycle {
    control: Mutex<Control>,
    observers: Mutex<Observers>,
}

impl Lifecycle {
    pub(crate) fn new(observers: Vec<Arc<dyn PoolObserver>>) -> Self {
        let lifecycle = Self {
            control: Mutex::new(Control {
                state: PoolState::Stopped,
                drain: false,
                workers: Vec::new(),
                live: 0,
                detached: false,
            }),
            observers: Mutex::new(Observers::default()),
        };
        for observer in observers {
            lifecycle.subscribe(observer);
        }
        lifecycle
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn observers(&self) -> MutexGuard<'_, Observers> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self, observer: Arc<dyn PoolObserver>) -> SubscriptionId {
        let mut observers = self.observers();
        let id = SubscriptionId(observers.next_id);
        observers.next_id += 1;
        observers.entries.push((id, observer));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers();
        let before = observers.entries.len();
        observers.entries.retain(|(entry, _)| *entry != id);
        observers.entries.len() != before
    }

    fn snapshot(&self) -> Vec<Arc<dyn PoolObserver>> {
        self.observers()
            .entries
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    pub(crate) fn state(&self) -> PoolState {
        self.lock().state
    }

    /// `Some(drain)` while the pool is stopping.
    pub(crate) fn stopping_drain(&self) -> Option<bool> {
        let control = self.lock();
        (control.state == PoolState::Stopping).then_some(control.drain)
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.lock().workers.len()
    }

    pub(crate) fn is_worker_thread(&self, id: ThreadId) -> bool {
        self.lock().workers.iter().any(|w| w.thread().id() == id)
    }

    /// Runs `f` under the lifecycle lock, only while stopped.
    pub(crate) fn while_stopped<R>(&self, what: &str, f: impl FnOnce() -> R) -> PoolResult<R> {
        let control = self.lock();
        if control.state != PoolState::Stopped {
            return Err(PoolError::InvalidOperation(format!(
                "cannot {what} while the pool is {}",
                control.state
            )));
        }
        let out = f();
        drop(control);
        Ok(out)
    }

    pub(crate) fn begin_start(&self) -> bool {
        let mut control = self.lock();
        if control.state != PoolState::Stopped {
            return false;
        }
        control.state = PoolState::Starting;
        true
    }

    /// Counts a worker about to be spawned. Undo with `release_worker` if the
    /// spawn fails.
    pub(crate) fn reserve_worker(&self) {
        self.lock().live += 1;
    }

    /// Called by each worker on exit and for every failed spawn. Returns
    /// `true` for the last worker of a detached stop, which then owns the
    /// final Stopping -> Stopped transition.
    pub(crate) fn release_worker(&self) -> bool {
        let mut control = self.lock();
        control.live -= 1;
        control.detached && control.live == 0
    }

    pub(crate) fn complete_start(&self, workers: Vec<JoinHandle<()>>) {
        let mut control = self.lock();
        debug_assert_eq!(control.state, PoolState::Starting);
        control.workers = workers;
        control.state = PoolState::Started;
    }

    pub(crate) fn begin_stop(&self, drain: bool) -> bool {
        let mut control = self.lock();
        if control.state != PoolState::Started {
            return false;
        }
        control.state = PoolState::Stopping;
        control.drain = drain;
        true
    }

    /// Started -> Stopping without a joiner. The worker handles are dropped,
    /// which detaches the threads; the last one out completes the stop.
    pub(crate) fn begin_detached_stop(&self) -> bool {
        let mut control = self.lock();
        if control.state != PoolState::Started {
            return false;
        }
        control.state = PoolState::Stopping;
        control.drain = false;
        control.detached = true;
        control.workers.clear();
        true
    }

    /// Starting -> Stopping after a failed spawn, installing the threads that
    /// did start so they can be joined like a normal stop.
    pub(crate) fn abort_start(&self, spawned: Vec<JoinHandle<()>>) {
        let mut control = self.lock();
        debug_assert_eq!(control.state, PoolState::Starting);
        control.workers = spawned;
        control.state = PoolState::Stopping;
        control.drain = false;
    }

    pub(crate) fn take_workers(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.lock().workers)
    }

    pub(crate) fn complete_stop(&self) {
        let mut control = self.lock();
        debug_assert!(control.workers.is_empty());
        control.state = PoolState::Stopped;
        control.drain = false;
        control.detached = false;
    }

    pub(crate) fn notify(&self, pool: &str, state: PoolState) {
        debug!(pool = %pool, state = %state, "pool state changed");
        for observer in self.snapshot() {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                observer.on_state_changed(pool, state)
            }));
            if delivered.is_err() {
                error!(pool = %pool, state = %state, "observer panicked on state change");
            }
        }
    }

    pub(crate) fn notify_failure(&self, pool: &str, failure: &ItemFailure) {
        for observer in self.snapshot() {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                observer.on_item_failed(pool, failure)
            }));
            if delivered.is_err() {
                error!(pool = %pool, "observer panicked while handling an item failure");
            }
        }
    }

    pub(crate) fn current_thread_is_worker(&self) -> bool {
        self.is_worker_thread(thread::current().id())
    }
}
