//! Periodic scan scheduling and bounded fan-out over the host catalog.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt as _, stream};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

use crate::catalog::HostCatalog;
use crate::processor::HostProcessor;
use crate::status::StatusStore;

/// Drives one scan per tick of `process_period`, skipping ticks that fire
/// while a scan is still in flight.
pub struct Monitor {
    catalog: Arc<HostCatalog>,
    statuses: Arc<StatusStore>,
    processor: Arc<HostProcessor>,
    period: Duration,
    concurrency: usize,
}

impl Monitor {
    pub fn new(
        catalog: Arc<HostCatalog>,
        statuses: Arc<StatusStore>,
        processor: Arc<HostProcessor>,
        period: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            catalog,
            statuses,
            processor,
            period,
            concurrency,
        }
    }

    /// Tick until `shutdown` resolves; an in-flight scan always runs to
    /// completion before the loop exits.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        // Overruns are dropped, not queued: a tick that fires mid-scan is
        // skipped rather than played back-to-back.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.scan().await,
                () = &mut shutdown => {
                    info!("shutdown signal received, stopping scans");
                    break;
                }
            }
        }
    }

    /// One full pass over the catalog.
    ///
    /// Reload failures keep the previous snapshot; every dispatched host ends
    /// with exactly one status write, and at most `process_concurrency` hosts
    /// are in flight at any moment.
    pub async fn scan(&self) {
        let reloaded = match self.catalog.reload().await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "failed to load hosts, scanning previous snapshot");
                false
            }
        };

        let hosts = self.catalog.snapshot().await;
        if reloaded {
            let names: HashSet<String> = hosts.iter().map(|h| h.name.clone()).collect();
            self.statuses.retain(&names).await;
        }

        debug!(hosts = hosts.len(), "starting scan");
        stream::iter(hosts)
            .for_each_concurrent(self.concurrency, |host| async move {
                self.processor.process(&host).await;
            })
            .await;
        debug!("scan finished");
    }
}
