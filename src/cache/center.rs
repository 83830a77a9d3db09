//! Keep-warm center
//!
//! The center observes every live entry through a `Weak` reference and runs a
//! periodic scan that starts background refreshes on entries that are still in
//! use. It never decides an entry's lifetime: idle entries are only counted,
//! and removing them is the owning registry's job (`Registry::recycle`), which
//! the center can trigger on a schedule when `recycle_interval` is set.

use crate::cache::config::CenterConfig;
use crate::error::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Something the center can keep warm
pub(crate) trait KeepWarm: Send + Sync {
    fn is_idle(&self, now: DateTime<Utc>) -> bool;

    /// Start a background refresh attempt; must not block
    fn keep_warm(self: Arc<Self>);
}

/// Something that can drop its idle entries
pub(crate) trait Recycle: Send + Sync {
    fn recycle(&self) -> usize;
}

/// Summary of one keep-warm pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Entries a refresh attempt was started for
    pub warmed: usize,

    /// Entries skipped because they are idle
    pub idle: usize,

    /// Dead references dropped from the index
    pub pruned: usize,
}

struct Daemon {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Process-wide index of live entries plus the keep-warm daemon
pub struct Center {
    config: CenterConfig,
    entries: DashMap<Uuid, Weak<dyn KeepWarm>>,
    registries: DashMap<Uuid, (String, Weak<dyn Recycle>)>,
    daemon: Mutex<Option<Daemon>>,
}

impl std::fmt::Debug for Center {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Center")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .field("registries", &self.registries.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Center {
    /// Create a center. The daemon is not started until [`Center::start`].
    pub fn new(config: CenterConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            entries: DashMap::new(),
            registries: DashMap::new(),
            daemon: Mutex::new(None),
        }))
    }

    /// Spawn the keep-warm daemon on the current tokio runtime.
    /// Returns `false` if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut daemon = self.daemon.lock();
        if daemon.as_ref().is_some_and(|d| !d.task.is_finished()) {
            return false;
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_daemon(
            Arc::downgrade(self),
            self.config.scan_interval,
            self.config.recycle_interval,
            shutdown_rx,
        ));
        *daemon = Some(Daemon { shutdown, task });

        info!(
            "Started keep-warm daemon (scan interval: {:?}, recycle interval: {:?})",
            self.config.scan_interval, self.config.recycle_interval
        );
        true
    }

    /// Stop the daemon and wait for it to exit
    pub async fn stop(&self) {
        let daemon = self.daemon.lock().take();
        if let Some(Daemon { shutdown, task }) = daemon {
            let _ = shutdown.send(());
            if let Err(e) = task.await {
                warn!("Keep-warm daemon ended abnormally: {}", e);
            }
            info!("Stopped keep-warm daemon");
        }
    }

    pub fn is_running(&self) -> bool {
        self.daemon
            .lock()
            .as_ref()
            .is_some_and(|d| !d.task.is_finished())
    }

    pub fn config(&self) -> &CenterConfig {
        &self.config
    }

    /// Number of registered entries (including ones not yet pruned)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of registries that are still alive
    pub fn registry_names(&self) -> Vec<String> {
        self.registries
            .iter()
            .filter(|r| r.value().1.strong_count() > 0)
            .map(|r| r.value().0.clone())
            .collect()
    }

    /// One keep-warm pass over all live entries.
    ///
    /// Refreshes are spawned on the current tokio runtime; called outside one,
    /// entries are counted as warmed but no refresh starts.
    pub fn scan(&self) -> ScanReport {
        // Collect first: upgrading can hand us the last strong reference, and an
        // entry dropped here unregisters itself from `entries`.
        let snapshot: Vec<(Uuid, Weak<dyn KeepWarm>)> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        let now = Utc::now();
        let mut report = ScanReport::default();
        for (id, weak) in snapshot {
            match weak.upgrade() {
                Some(entry) if entry.is_idle(now) => report.idle += 1,
                Some(entry) => {
                    entry.keep_warm();
                    report.warmed += 1;
                }
                None => {
                    self.entries.remove(&id);
                    report.pruned += 1;
                }
            }
        }

        debug!(
            warmed = report.warmed,
            idle = report.idle,
            pruned = report.pruned,
            "keep-warm scan"
        );
        report
    }

    /// Ask every live registry to drop its idle entries
    pub fn recycle_all(&self) -> usize {
        let registries: Vec<(Uuid, Weak<dyn Recycle>)> = self
            .registries
            .iter()
            .map(|r| (*r.key(), r.value().1.clone()))
            .collect();

        let mut recycled = 0;
        for (id, weak) in registries {
            match weak.upgrade() {
                Some(registry) => recycled += registry.recycle(),
                None => {
                    self.registries.remove(&id);
                }
            }
        }

        if recycled > 0 {
            info!("Recycled {} idle entries", recycled);
        }
        recycled
    }

    pub(crate) fn register_entry(&self, id: Uuid, entry: Weak<dyn KeepWarm>) {
        self.entries.insert(id, entry);
    }

    pub(crate) fn unregister_entry(&self, id: &Uuid) {
        self.entries.remove(id);
    }

    pub(crate) fn register_registry(&self, id: Uuid, name: &str, registry: Weak<dyn Recycle>) {
        let shared = self
            .registries
            .iter()
            .any(|r| r.value().0 == name && r.value().1.strong_count() > 0);
        if shared {
            warn!(registry = name, "another live registry already uses this name");
        }
        self.registries.insert(id, (name.to_string(), registry));
    }
}

async fn run_daemon(
    center: Weak<Center>,
    scan_interval: Duration,
    recycle_interval: Option<Duration>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut scan = tokio::time::interval(scan_interval);
    scan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut recycle = recycle_interval.map(|interval| {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker
    });

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = scan.tick() => {
                let Some(center) = center.upgrade() else { break };
                center.scan();
            }
            _ = next_tick(&mut recycle) => {
                let Some(center) = center.upgrade() else { break };
                center.recycle_all();
            }
        }
    }

    debug!("keep-warm daemon exiting");
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
