//! Fixed-size blocking worker pool on OS threads
//!
//! # Features
//! - FIFO queue with blocking dequeue and release-all on stop
//! - Start/stop lifecycle with observer notifications
//! - Drain-before-stop or stop after in-flight items
//! - Per-item error and panic isolation, logged through `tracing`
//! - Closure and value+callback front-ends, completion handles
//! - Metrics snapshots with failure counts

pub mod dispatch;
pub mod errors;
pub mod handle;
pub mod lifecycle;
pub mod model;
pub mod pool;
pub mod queue;
pub mod result;

pub use dispatch::{CallbackPool, ValuePool};
pub use lifecycle::{PoolObserver, PoolState, SubscriptionId};
pub use pool::{Config, ThreadPriority, WorkerPool};
