//! Background health scheduler
//!
//! One task drives a ticker; each tick snapshots the upstreams under the
//! read lock, releases it, and fans the checks out with bounded
//! concurrency. Results land in the registry's health state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ServiceRegistry;

/// Checks in flight at once during a pass.
const MAX_CONCURRENT_CHECKS: usize = 20;

/// Handle to the running health scheduler.
pub struct HealthScheduler {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl HealthScheduler {
    /// Start the scheduler. It exits promptly when `cancel` fires or
    /// [`HealthScheduler::stop`] is called.
    #[must_use]
    pub fn start(
        registry: Arc<ServiceRegistry>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        info!("Health scheduler stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        run_pass(&registry).await;
                    }
                }
            }
        });
        Self { cancel, handle }
    }

    /// Stop the scheduler and wait for the task to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

async fn run_pass(registry: &Arc<ServiceRegistry>) {
    // snapshot under the read lock, then release it before any I/O
    let upstreams = registry.upstream_snapshot();
    if upstreams.is_empty() {
        return;
    }
    debug!(services = upstreams.len(), "Health pass starting");

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CHECKS));
    let mut checks = JoinSet::new();
    for (key, upstream) in upstreams {
        if upstream.health_checker().is_none() {
            continue;
        }
        let registry = Arc::clone(registry);
        let semaphore = Arc::clone(&semaphore);
        checks.spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else { return };
            registry.check_one(&key, &upstream).await;
        });
    }
    while checks.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{DialPolicy, SafeDialer};
    use crate::upstream::Managers;

    #[tokio::test]
    async fn scheduler_stops_on_cancellation() {
        let registry = Arc::new(ServiceRegistry::new(
            Managers::new(),
            SafeDialer::new(DialPolicy::default()),
        ));
        let cancel = CancellationToken::new();
        let scheduler =
            HealthScheduler::start(Arc::clone(&registry), Duration::from_millis(10), cancel.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        // stop() must return promptly once the token fired
        tokio::time::timeout(Duration::from_secs(1), scheduler.stop()).await.unwrap();
    }
}
