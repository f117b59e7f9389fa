//! Autonomous idle loop: once the user has been quiet long enough, review
//! pending thought seeds with whichever model is free.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cognition::thought_seed::{SeedStore, review_seeds};
use crate::config::GaiaCfg;
use crate::io::ActivityClock;
use crate::models::ModelPool;
use crate::models::pool::{LITE, PRIME};

/// One review pass. Never waits on the pool: if lite and prime are both busy
/// the pass is skipped. Returns how many seeds were reviewed.
pub async fn review_cycle(pool: &ModelPool, seeds: &SeedStore) -> usize {
    let Some(lease) = pool.try_acquire(LITE).or_else(|| pool.try_acquire(PRIME)) else {
        tracing::debug!("no idle model, seed review skipped");
        return 0;
    };
    match review_seeds(lease.provider(), seeds).await {
        Ok(0) => 0,
        Ok(n) => {
            tracing::info!(reviewed = n, model = lease.name(), "idle seed review finished");
            n
        }
        Err(e) => {
            tracing::warn!(dir = %seeds.dir().display(), error = %e, "idle seed review failed");
            0
        }
    }
}

/// Spawn the idle loop. It polls every `idle_review_interval_secs` and runs
/// [`review_cycle`] when the clock has been idle for `idle_threshold_secs`.
pub fn spawn_idle_loop(
    pool: ModelPool,
    seeds: SeedStore,
    clock: ActivityClock,
    cfg: Arc<GaiaCfg>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cfg.idle_review_interval_secs.max(1));
        let threshold = Duration::from_secs(cfg.idle_threshold_secs);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("idle loop shutting down");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            if clock.idle_for() < threshold {
                continue;
            }
            review_cycle(&pool, &seeds).await;
        }
    })
}
