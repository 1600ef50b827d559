//! Periodic cleanup of expired and consumed one-time codes.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::data;
use crate::services::Service;
use crate::state::{ServiceStatus, ServiceStatusRegistry};

pub const SERVICE_NAME: &str = "otp_purge";

const PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OtpPurgeService {
    db_pool: PgPool,
    statuses: ServiceStatusRegistry,
    interval: Duration,
}

impl OtpPurgeService {
    pub fn new(db_pool: PgPool, statuses: ServiceStatusRegistry) -> Self {
        Self {
            db_pool,
            statuses,
            interval: PURGE_INTERVAL,
        }
    }

    fn spawn_purge(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let pool = self.db_pool.clone();
        let statuses = self.statuses.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = data::otp::purge_stale(&pool) => match result {
                    Ok(0) => {
                        trace!("No stale one-time codes");
                        statuses.set(SERVICE_NAME, ServiceStatus::Active);
                    }
                    Ok(count) => {
                        info!(count, "Purged stale one-time codes");
                        statuses.set(SERVICE_NAME, ServiceStatus::Active);
                    }
                    Err(e) => {
                        error!(error = ?e, "Failed to purge one-time codes");
                        statuses.set(SERVICE_NAME, ServiceStatus::Error);
                    }
                },
                _ = cancel.cancelled() => debug!("Purge cancelled"),
            }
        })
    }
}

#[async_trait]
impl Service for OtpPurgeService {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        self.statuses.set(SERVICE_NAME, ServiceStatus::Starting);
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut current: Option<(JoinHandle<()>, CancellationToken)> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some((ref handle, _)) = current
                        && !handle.is_finished()
                    {
                        trace!("Previous purge still running, skipping");
                        continue;
                    }
                    let cancel = CancellationToken::new();
                    current = Some((self.spawn_purge(cancel.clone()), cancel));
                }
                _ = shutdown_rx.recv() => {
                    if let Some((handle, cancel)) = current.take() {
                        cancel.cancel();
                        if time::timeout(DRAIN_TIMEOUT, handle).await.is_err() {
                            warn!("Purge did not stop within 5s, abandoning");
                        }
                    }
                    self.statuses.set(SERVICE_NAME, ServiceStatus::Disabled);
                    return Ok(());
                }
            }
        }
    }
}
