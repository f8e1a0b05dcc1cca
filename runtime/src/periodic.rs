//! Fixed-interval background loops.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Run `task` every `period` until the shutdown broadcast fires.
///
/// The first run happens immediately so work missed while the process was down
/// is picked up at startup. A run that overruns its period delays the next one
/// instead of bunching ticks.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(task = name, period_secs = period.as_secs(), "Periodic task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::debug!(task = name, "Periodic task tick");
                    task().await;
                    metrics::counter!("periodic_runs_total", "task" => name).increment(1);
                }
                _ = shutdown.recv() => {
                    tracing::info!(task = name, "Periodic task stopping");
                    break;
                }
            }
        }
    })
}
