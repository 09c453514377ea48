//! Idle reaper.
//!
//! Background task that periodically sweeps the pending queue and forces
//! overdue sessions into the timeout resolution. The sweep interval is
//! fixed and independent of any single session's age, so the idle
//! threshold is a soft deadline: enforcement lags it by at most one sweep
//! interval plus per-entry jitter. Entries are resolved in spawned tasks,
//! so one slow moderation call never delays the rest of a sweep, and a
//! failing entry never aborts it.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::store::{now_millis, SessionStore};
use crate::verify::{Outcome, SessionManager};

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Wall-clock interval between sweeps.
    pub sweep_interval: Duration,
    /// Age past which a pending session is force-resolved.
    pub idle_threshold: Duration,
    /// Upper bound on the random per-entry delay, spreading moderation
    /// calls when many sessions expire in the same tick.
    pub max_jitter: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(15),
            idle_threshold: Duration::from_secs(120),
            max_jitter: Duration::from_millis(750),
        }
    }
}

/// Run the reaper sweep loop until shutdown is signalled.
pub async fn reaper_loop(
    manager: Arc<SessionManager>,
    store: Arc<dyn SessionStore>,
    config: ReaperConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.sweep_interval);
    let threshold_ms = config.idle_threshold.as_millis() as i64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let now = now_millis();
        for entry in store.scan_pending().await {
            let age_ms = now.saturating_sub(entry.created_at);
            if age_ms < threshold_ms {
                debug!(
                    group_id = entry.group_id,
                    user_id = entry.user_id,
                    age_ms,
                    "session still within idle threshold"
                );
                continue;
            }

            let jitter = random_jitter(config.max_jitter);
            let manager = manager.clone();
            tokio::spawn(async move {
                tokio::time::sleep(jitter).await;
                match manager
                    .resolve_by_timeout(entry.group_id, entry.user_id)
                    .await
                {
                    Ok(Outcome::TimedOut) => {}
                    // Another path won the race between scan and resolve.
                    Ok(Outcome::AlreadyHandled) => {
                        debug!(
                            group_id = entry.group_id,
                            user_id = entry.user_id,
                            "session resolved before timeout sweep reached it"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            group_id = entry.group_id,
                            user_id = entry.user_id,
                            error = %e,
                            "timeout resolution failed"
                        );
                    }
                }
            });
        }
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
