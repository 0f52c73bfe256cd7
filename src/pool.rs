use super::{
    errors::{ItemFailure, PoolError, ProcessError},
    lifecycle::{Lifecycle, PoolObserver, PoolState, SubscriptionId},
    model::PoolMetrics,
    queue::SignalQueue,
    result::PoolResult,
};
use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};
use thread_priority::{ThreadPriority as OsPriority, ThreadPriorityValue};
use tracing::{debug, debug_span, error, trace, warn};

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 100;

/// OS scheduling priority applied to each worker thread when it starts.
///
/// `Normal` leaves the inherited priority untouched. Raising priority usually
/// needs privileges; when the OS refuses, the worker logs a warning and runs
/// at its inherited priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadPriority {
    Lowest,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    Highest,
}

/// Pool configuration. Can only be changed while the pool is stopped.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub concurrency: usize,
    pub thread_priority: ThreadPriority,
    /// Accept `enqueue` while the pool is stopped; items wait for `start`.
    pub allow_inactive_add: bool,
    /// Pause after each loop iteration. Zero yields the time slice instead.
    pub item_sleep: Duration,
    pub stack_size: Option<usize>,
}

fn concurrency_for(multiplier: usize) -> usize {
    (num_cpus::get() * multiplier).clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "worker-pool".to_string(),
            concurrency: concurrency_for(1),
            thread_priority: ThreadPriority::Normal,
            allow_inactive_add: false,
            item_sleep: Duration::ZERO,
            stack_size: None,
        }
    }
}

impl Config {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn cpu_bound() -> Self {
        Self {
            concurrency: concurrency_for(1),
            thread_priority: ThreadPriority::AboveNormal,
            ..Default::default()
        }
    }

    /// Twice as many threads as cores, for callbacks that mostly wait on I/O.
    pub fn io_bound() -> Self {
        Self {
            concurrency: concurrency_for(2),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> PoolResult<()> {
        check_name(&self.name)?;
        check_concurrency(self.concurrency)?;
        if self.stack_size == Some(0) {
            return Err(PoolError::InvalidArgument {
                name: "stack_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn check_concurrency(concurrency: usize) -> PoolResult<()> {
    if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
        return Err(PoolError::InvalidArgument {
            name: "concurrency",
            reason: format!(
                "{concurrency} is outside {MIN_CONCURRENCY}..={MAX_CONCURRENCY}"
            ),
        });
    }
    Ok(())
}

fn check_name(name: &str) -> PoolResult<()> {
    if name.trim().is_empty() {
        return Err(PoolError::InvalidArgument {
            name: "name",
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn crossplatform(value: u8) -> Result<OsPriority, String> {
    ThreadPriorityValue::try_from(value)
        .map(OsPriority::Crossplatform)
        .map_err(|err| format!("{err:?}"))
}

/// Sets the calling thread's OS priority.
pub(crate) fn apply_thread_priority(priority: ThreadPriority) -> Result<(), String> {
    let os_priority = match priority {
        ThreadPriority::Normal => return Ok(()),
        ThreadPriority::Lowest => OsPriority::Min,
        ThreadPriority::BelowNormal => crossplatform(25)?,
        ThreadPriority::AboveNormal => crossplatform(75)?,
        ThreadPriority::Highest => OsPriority::Max,
    };
    thread_priority::set_current_thread_priority(os_priority).map_err(|err| format!("{err:?}"))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

type Processor<T> = Arc<dyn Fn(T) -> Result<(), ProcessError> + Send + Sync>;

#[derive(Default)]
struct Activity {
    active: usize,
    processed: usize,
    failed: usize,
}

struct Shared<T> {
    queue: SignalQueue<T>,
    lifecycle: Lifecycle,
    config: Mutex<Config>,
    activity: Mutex<Activity>,
    processor: Processor<T>,
}

impl<T: Send + 'static> Shared<T> {
    #[inline]
    fn config(&self) -> MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn activity(&self) -> MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn process(&self, pool: &str, item: T) {
        self.activity().active += 1;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.processor)(item)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(ItemFailure::Error(err)),
            Err(payload) => Some(ItemFailure::Panicked(panic_message(payload.as_ref()))),
        };

        {
            let mut activity = self.activity();
            activity.active -= 1;
            activity.processed += 1;
            if failure.is_some() {
                activity.failed += 1;
            }
        }

        if let Some(failure) = failure {
            error!(pool = %pool, error = %failure, "work item failed");
            self.lifecycle.notify_failure(pool, &failure);
        }
    }

    fn worker_loop(&self, pool: &str, item_sleep: Duration) {
        loop {
            let item = self.queue.dequeue();
            let queue_was_empty = item.is_none();
            if let Some(item) = item {
                self.process(pool, item);
            }

            if let Some(drain) = self.lifecycle.stopping_drain() {
                if queue_was_empty || !drain {
                    break;
                }
            } else if queue_was_empty {
                // blocking is only switched off by a stop; never spin on a released queue
                warn!(state = %self.lifecycle.state(), "queue released outside a stop, worker exiting");
                break;
            }

            if item_sleep.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(item_sleep);
            }
        }
    }
}

/// Fixed-size pool of OS threads draining a shared [`SignalQueue`].
///
/// Every dequeued item is handed to the processor exactly once. Errors and
/// panics raised by the processor are logged, counted and reported to
/// observers; they never stop a worker or the pool.
pub struct WorkerPool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new<F>(concurrency: usize, processor: F) -> PoolResult<Self>
    where
        F: Fn(T) -> Result<(), ProcessError> + Send + Sync + 'static,
    {
        let config = Config {
            concurrency,
            ..Default::default()
        };
        Self::with_config(config, processor)
    }

    pub fn with_config<F>(config: Config, processor: F) -> PoolResult<Self>
    where
        F: Fn(T) -> Result<(), ProcessError> + Send + Sync + 'static,
    {
        Self::with_observers(config, processor, Vec::new())
    }

    pub fn with_observers<F>(
        config: Config,
        processor: F,
        observers: Vec<Arc<dyn PoolObserver>>,
    ) -> PoolResult<Self>
    where
        F: Fn(T) -> Result<(), ProcessError> + Send + Sync + 'static,
    {
        config.validate()?;
        let shared = Arc::new(Shared {
            queue: SignalQueue::new(),
            lifecycle: Lifecycle::new(observers),
            config: Mutex::new(config),
            activity: Mutex::new(Activity::default()),
            processor: Arc::new(processor),
        });
        Ok(Self { shared })
    }

    /// Spawns the worker threads. `Ok(false)` if the pool was not stopped.
    pub fn start(&self) -> PoolResult<bool> {
        let shared = &self.shared;
        if !shared.lifecycle.begin_start() {
            debug!(state = %shared.lifecycle.state(), "start ignored");
            return Ok(false);
        }

        let config = shared.config().clone();
        shared.lifecycle.notify(&config.name, PoolState::Starting);
        shared.queue.set_continue_blocking(true);

        let pool: Arc<str> = Arc::from(config.name.as_str());
        let mut workers = Vec::with_capacity(config.concurrency);
        for index in 0..config.concurrency {
            match self.spawn_worker(&pool, index, &config) {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    error!(pool = %pool, worker = index, error = %source, "failed to spawn worker thread");
                    shared.lifecycle.abort_start(workers);
                    shared.lifecycle.notify(&pool, PoolState::Stopping);
                    self.finish_stop(&pool);
                    return Err(PoolError::Spawn {
                        pool: config.name,
                        source,
                    });
                }
            }
        }

        shared.lifecycle.complete_start(workers);
        shared.lifecycle.notify(&pool, PoolState::Started);
        Ok(true)
    }

    fn spawn_worker(
        &self,
        pool: &Arc<str>,
        index: usize,
        config: &Config,
    ) -> io::Result<JoinHandle<()>> {
        let mut builder = thread::Builder::new().name(format!("{}-{}", config.name, index));
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }

        let shared = Arc::clone(&self.shared);
        let pool = Arc::clone(pool);
        let priority = config.thread_priority;
        let item_sleep = config.item_sleep;

        self.shared.lifecycle.reserve_worker();
        let spawned = builder.spawn(move || {
            let span = debug_span!("worker", pool = %pool, worker = index, priority = ?priority);
            let _enter = span.enter();
            if let Err(err) = apply_thread_priority(priority) {
                warn!(error = %err, "could not apply thread priority");
            }
            debug!("worker started");
            shared.worker_loop(&pool, item_sleep);
            debug!("worker exited");

            if shared.lifecycle.release_worker() {
                shared.lifecycle.complete_stop();
                shared.lifecycle.notify(&pool, PoolState::Stopped);
            }
        });
        if spawned.is_err() {
            self.shared.lifecycle.release_worker();
        }
        spawned
    }

    /// Stops the pool and waits for every worker to exit. With `drain` the
    /// workers empty the queue first; without it they exit after their
    /// in-flight item. `Ok(false)` if the pool was not started.
    pub fn stop(&self, drain: bool) -> PoolResult<bool> {
        let shared = &self.shared;
        if shared.lifecycle.current_thread_is_worker() {
            warn!("stop requested from a worker thread");
            return Err(PoolError::InvalidOperation(
                "stop cannot be called from one of the pool's own worker threads".to_string(),
            ));
        }
        if !shared.lifecycle.begin_stop(drain) {
            debug!(state = %shared.lifecycle.state(), "stop ignored");
            return Ok(false);
        }

        let pool = shared.config().name.clone();
        shared.lifecycle.notify(&pool, PoolState::Stopping);
        self.finish_stop(&pool);
        Ok(true)
    }

    fn finish_stop(&self, pool: &str) {
        let shared = &self.shared;
        shared.queue.set_continue_blocking(false);

        for worker in shared.lifecycle.take_workers() {
            let thread_name = worker.thread().name().unwrap_or("<unnamed>").to_string();
            if let Err(payload) = worker.join() {
                error!(
                    pool = %pool,
                    thread = %thread_name,
                    panic = %panic_message(payload.as_ref()),
                    "worker thread terminated abnormally"
                );
            }
        }

        shared.lifecycle.complete_stop();
        shared.lifecycle.notify(pool, PoolState::Stopped);
    }

    /// Registers an observer at runtime. A running item can subscribe to learn
    /// that a stop has begun and wind down cooperatively.
    pub fn subscribe(&self, observer: Arc<dyn PoolObserver>) -> SubscriptionId {
        self.shared.lifecycle.subscribe(observer)
    }

    /// Detaches an observer. `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.lifecycle.unsubscribe(id)
    }

    /// Queues an item for processing. Rejected while stopped unless
    /// `allow_inactive_add` is set.
    pub fn enqueue(&self, item: T) -> PoolResult<()> {
        let shared = &self.shared;
        if shared.lifecycle.state() == PoolState::Stopped {
            let config = shared.config();
            if !config.allow_inactive_add {
                return Err(PoolError::InvalidOperation(format!(
                    "pool `{}` is not active",
                    config.name
                )));
            }
        }
        shared.queue.enqueue(item);
        trace!("item enqueued");
        Ok(())
    }

    /// Drops every queued item that no worker has picked up yet.
    pub fn clear_queue(&self) -> usize {
        self.shared.queue.clear()
    }

    #[inline]
    pub fn state(&self) -> PoolState {
        self.shared.lifecycle.state()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state() != PoolState::Stopped
    }

    pub fn active_count(&self) -> usize {
        self.shared.activity().active
    }

    pub fn queue_count(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.lifecycle.worker_count()
    }

    pub fn config(&self) -> Config {
        self.shared.config().clone()
    }

    pub fn name(&self) -> String {
        self.shared.config().name.clone()
    }

    pub fn metrics(&self) -> PoolMetrics {
        let (active_items, processed_items, failed_items) = {
            let activity = self.shared.activity();
            (activity.active, activity.processed, activity.failed)
        };
        PoolMetrics {
            state: self.state(),
            workers: self.worker_count(),
            active_items,
            queued_items: self.queue_count(),
            processed_items,
            failed_items,
        }
    }

    pub fn set_name(&self, name: impl Into<String>) -> PoolResult<()> {
        let name = name.into();
        check_name(&name)?;
        self.shared
            .lifecycle
            .while_stopped("rename", || self.shared.config().name = name)
    }

    pub fn set_concurrency(&self, concurrency: usize) -> PoolResult<()> {
        check_concurrency(concurrency)?;
        self.shared.lifecycle.while_stopped("change concurrency", || {
            self.shared.config().concurrency = concurrency
        })
    }

    pub fn set_thread_priority(&self, priority: ThreadPriority) -> PoolResult<()> {
        self.shared.lifecycle.while_stopped("change thread priority", || {
            self.shared.config().thread_priority = priority
        })
    }

    pub fn set_allow_inactive_add(&self, allow: bool) -> PoolResult<()> {
        self.shared.lifecycle.while_stopped("change inactive add", || {
            self.shared.config().allow_inactive_add = allow
        })
    }

    pub fn set_item_sleep(&self, item_sleep: Duration) -> PoolResult<()> {
        self.shared.lifecycle.while_stopped("change item sleep", || {
            self.shared.config().item_sleep = item_sleep
        })
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if self.state() != PoolState::Started {
            return;
        }
        let shared = &self.shared;
        if !shared.lifecycle.current_thread_is_worker() {
            if let Err(err) = self.stop(false) {
                error!(error = %err, "failed to stop pool on drop");
            }
            return;
        }

        // dropped on one of our own workers: nobody can join, so release the
        // workers and let the last one out finish the stop
        if shared.lifecycle.begin_detached_stop() {
            let pool = shared.config().name.clone();
            debug!(pool = %pool, "pool dropped on a worker thread, detaching workers");
            shared.lifecycle.notify(&pool, PoolState::Stopping);
            shared.queue.set_continue_blocking(false);
        }
    }
}
