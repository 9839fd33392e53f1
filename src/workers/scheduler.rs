// Periodic task runner shared by the payment workers
//
// - Fixed interval, first fire one period after start
// - Every fire spawns its own tick, so a slow tick never delays the timer;
//   overlap is resolved by each task's SingleFlight guard
// - Missed fires are skipped, never replayed in a burst
// - Stops when the shutdown channel flips to true or its sender is dropped

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// One scheduled run. Errors are handled (logged) inside the tick.
    async fn tick(&self);
}

pub fn spawn_periodic<T: PeriodicTask>(
    task: Arc<T>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("⏰ {} scheduled every {:?}", task.name(), period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let task = task.clone();
                    tokio::spawn(async move { task.tick().await });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("🛑 {} stopped", task.name());
    })
}
