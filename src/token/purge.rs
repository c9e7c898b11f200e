//! Background purge of expired revocations and stale login records.

use std::{sync::Arc, time::Duration};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use super::SessionTokenService;
use crate::{oidc::replay::RECORD_RETENTION_SECONDS, store::ReplayStore, unix_now};

#[derive(Clone, Copy, Debug)]
pub struct PurgeConfig {
    interval: Duration,
}

impl PurgeConfig {
    #[must_use]
    pub fn new(interval_seconds: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_seconds.max(1)),
        }
    }
}

/// One purge pass; returns `(revoked, replay)` record counts.
pub async fn purge_once(
    tokens: &SessionTokenService,
    replay: &dyn ReplayStore,
) -> (u64, u64) {
    let revoked = tokens.purge_expired().await.unwrap_or_else(|err| {
        error!("Failed to purge revoked tokens: {err:#}");
        0
    });

    let cutoff = unix_now().saturating_sub(RECORD_RETENTION_SECONDS);
    let replayed = replay
        .purge_created_before(cutoff)
        .await
        .unwrap_or_else(|err| {
            error!("Failed to purge login records: {err:#}");
            0
        });

    (revoked, replayed)
}

/// Spawn the periodic purge task.
pub fn spawn_purge_worker(
    tokens: Arc<SessionTokenService>,
    replay: Arc<dyn ReplayStore>,
    config: PurgeConfig,
) {
    tokio::spawn(async move {
        let mut ticker = interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let (revoked, replayed) = purge_once(&tokens, replay.as_ref()).await;
            if revoked > 0 || replayed > 0 {
                info!(revoked, replayed, "purged expired records");
            } else {
                debug!("nothing to purge");
            }
        }
    });
}
