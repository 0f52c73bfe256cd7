use blocking_pool::{CallbackPool, Config, PoolState};
use std::{sync::Arc, time::Instant};
use tracing_subscriber::EnvFilter;


fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let observer: Arc<dyn blocking_pool::PoolObserver> = Arc::new(|pool: &str, state: PoolState| {
        tracing::info!(pool, %state, "lifecycle");
    });

    let pool = match CallbackPool::with_observers(Config::named("demo"), vec![observer]) {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("failed to build pool: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = pool.start() {
        eprintln!("failed to start pool: {err}");
        std::process::exit(1);
    }

    let now = Instant::now();
    let handles: Vec<_> = (0..10_000u64)
        .filter_map(|i| pool.spawn_with_handle(move || (0..=i).sum::<u64>()).ok())
        .collect();

    let total: u64 = handles
        .into_iter()
        .filter_map(|handle| handle.join().ok())
        .sum();

    let _ = pool.stop(true);
    let metrics = pool.metrics();
    println!(
        "total: {total}, processed: {}, failed: {}, elapsed: {:?}",
        metrics.processed_items,
        metrics.failed_items,
        now.elapsed()
    );
}
