//! Keeps the registry in step with editors starting and stopping.
//!
//! Each pass:
//! - rescans the status directory, registering new editors and dropping
//!   the ones whose status file is gone;
//! - probes instances marked down that discovery does not speak for, and
//!   marks them alive again when they accept a connection;
//! - forgets idle session pins.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{InstanceRegistry, InstanceStatus, discovery};
use crate::transport::ChannelOptions;

struct StatusSource {
    dir: PathBuf,
    stale_after: Duration,
}

pub struct Monitor {
    registry: Arc<InstanceRegistry>,
    options: ChannelOptions,
    pin_idle: Duration,
    source: Option<StatusSource>,
    /// Ids registered from the configuration; never unregistered here.
    fixed: HashSet<String>,
    /// Ids seen in the last successful scan.
    discovered: Mutex<HashSet<String>>,
}

impl Monitor {
    pub fn new(registry: Arc<InstanceRegistry>, options: ChannelOptions, pin_idle: Duration) -> Self {
        Self {
            registry,
            options,
            pin_idle,
            source: None,
            fixed: HashSet::new(),
            discovered: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_discovery(mut self, dir: PathBuf, stale_after: Duration) -> Self {
        self.source = Some(StatusSource { dir, stale_after });
        self
    }

    pub fn with_fixed(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.fixed.extend(ids);
        self
    }

    /// One maintenance pass.
    pub async fn refresh(&self) {
        if let Some(source) = &self.source {
            self.rescan(source).await;
        }
        self.probe_down().await;
        self.registry.prune_pins(self.pin_idle).await;
    }

    /// Refresh every `interval`, forever. Run it in its own task.
    pub async fn run(&self, interval: Duration) {
        info!(interval_ms = interval.as_millis() as u64, "Starting instance monitor");
        loop {
            tokio::time::sleep(interval).await;
            self.refresh().await;
        }
    }

    async fn rescan(&self, source: &StatusSource) {
        let found = match discovery::scan(&source.dir, source.stale_after, Utc::now()) {
            Ok(found) => found,
            Err(e) => {
                // Keep what we have; a transient read error should not drop editors.
                warn!(dir = %source.dir.display(), error = %format!("{:#}", e), "Instance discovery failed");
                return;
            }
        };
        debug!(dir = %source.dir.display(), count = found.len(), "Scanned status directory");

        let seen: HashSet<String> = found.iter().map(|d| d.info.id.clone()).collect();
        discovery::register_discovered(&self.registry, found, self.options).await;

        let mut discovered = self.discovered.lock().await;
        for gone in discovered.difference(&seen) {
            if self.fixed.contains(gone) {
                continue;
            }
            if self.registry.unregister(gone).await {
                info!(instance = %gone, "Status file removed, instance unregistered");
            }
        }
        *discovered = seen;
    }

    async fn probe_down(&self) {
        let discovered = self.discovered.lock().await.clone();
        for entry in self.registry.list().await {
            if entry.is_alive() || discovered.contains(&entry.info.id) {
                continue;
            }
            match entry.handle.probe().await {
                Ok(()) => {
                    self.registry
                        .set_status(&entry.info.id, InstanceStatus::Alive)
                        .await;
                }
                Err(e) => debug!(instance = %entry.info.id, error = %e, "Instance still unreachable"),
            }
        }
    }
}
