//! Typed front-ends over [`WorkerPool`]: one queues bare closures, the other
//! pairs a value with the callback that consumes it.

use super::{
    errors::SpawnError,
    handle::JoinHandle,
    lifecycle::{PoolObserver, PoolState, SubscriptionId},
    model::PoolMetrics,
    pool::{panic_message, Config, WorkerPool},
    result::PoolResult,
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Zero-argument unit of work queued on a [`CallbackPool`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A value paired with the callback that will receive it on a worker thread.
pub struct Dispatch<V> {
    value: V,
    callback: Box<dyn FnOnce(V) + Send + 'static>,
}

impl<V> Dispatch<V> {
    fn run(self) {
        (self.callback)(self.value)
    }
}

macro_rules! delegate_pool {
    ($item:ty) => {
        pub fn start(&self) -> PoolResult<bool> {
            self.pool.start()
        }

        pub fn stop(&self, drain: bool) -> PoolResult<bool> {
            self.pool.stop(drain)
        }

        pub fn state(&self) -> PoolState {
            self.pool.state()
        }

        pub fn is_active(&self) -> bool {
            self.pool.is_active()
        }

        pub fn active_count(&self) -> usize {
            self.pool.active_count()
        }

        pub fn queue_count(&self) -> usize {
            self.pool.queue_count()
        }

        pub fn worker_count(&self) -> usize {
            self.pool.worker_count()
        }

        pub fn metrics(&self) -> PoolMetrics {
            self.pool.metrics()
        }

        pub fn config(&self) -> Config {
            self.pool.config()
        }

        pub fn subscribe(&self, observer: Arc<dyn PoolObserver>) -> SubscriptionId {
            self.pool.subscribe(observer)
        }

        pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
            self.pool.unsubscribe(id)
        }

        /// The underlying pool, for configuration setters and queue control.
        pub fn inner(&self) -> &WorkerPool<$item> {
            &self.pool
        }
    };
}

/// Pool whose work items are closures. Processing a unit is calling it.
pub struct CallbackPool {
    pool: WorkerPool<Job>,
}

impl CallbackPool {
    pub fn new(concurrency: usize) -> PoolResult<Self> {
        let config = Config {
            concurrency,
            ..Default::default()
        };
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> PoolResult<Self> {
        Self::with_observers(config, Vec::new())
    }

    pub fn with_observers(
        config: Config,
        observers: Vec<Arc<dyn PoolObserver>>,
    ) -> PoolResult<Self> {
        let pool = WorkerPool::with_observers(
            config,
            |job: Job| {
                job();
                Ok(())
            },
            observers,
        )?;
        Ok(Self { pool })
    }

    pub fn enqueue<F>(&self, f: F) -> PoolResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.enqueue(Box::new(f))
    }

    /// Queues `f` and returns a handle resolving to its result.
    ///
    /// A panic in `f` resolves the handle to [`SpawnError::Panic`] and is
    /// still reported by the pool as a failed item.
    pub fn spawn_with_handle<R, F>(&self, f: F) -> PoolResult<JoinHandle<R>>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<R, SpawnError>>();
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();

        self.enqueue(move || {
            if token.is_cancelled() {
                let _ = tx.send(Err(SpawnError::Cancelled));
                return;
            }
            match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => {
                    let _ = tx.send(Ok(value));
                }
                Err(payload) => {
                    let _ = tx.send(Err(SpawnError::Panic(panic_message(payload.as_ref()))));
                    panic::resume_unwind(payload);
                }
            }
        })?;

        Ok(JoinHandle::new(cancel_token, rx))
    }

    delegate_pool!(Job);
}

/// Pool whose work items pair a value with the callback that consumes it.
pub struct ValuePool<V: Send + 'static> {
    pool: WorkerPool<Dispatch<V>>,
}

impl<V: Send + 'static> ValuePool<V> {
    pub fn new(concurrency: usize) -> PoolResult<Self> {
        let config = Config {
            concurrency,
            ..Default::default()
        };
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> PoolResult<Self> {
        Self::with_observers(config, Vec::new())
    }

    pub fn with_observers(
        config: Config,
        observers: Vec<Arc<dyn PoolObserver>>,
    ) -> PoolResult<Self> {
        let pool = WorkerPool::with_observers(
            config,
            |dispatch: Dispatch<V>| {
                dispatch.run();
                Ok(())
            },
            observers,
        )?;
        Ok(Self { pool })
    }

    pub fn enqueue<F>(&self, value: V, callback: F) -> PoolResult<()>
    where
        F: FnOnce(V) + Send + 'static,
    {
        self.pool.enqueue(Dispatch {
            value,
            callback: Box::new(callback),
        })
    }

    delegate_pool!(Dispatch<V>);
}
