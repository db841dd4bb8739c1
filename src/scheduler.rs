//! Periodic scrape cycles over all configured websites.
//!
//! The [`AutoScheduler`] is an explicit orchestrator object constructed once
//! at process start; there is no ambient global state. `initialize()` is
//! idempotent: the first call runs one immediate cycle and arms a recurring
//! timer, later calls return at once. A cycle fans out one runner task per
//! website with bounded concurrency; a tick that fires while a previous
//! cycle is still active is skipped entirely, never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::models::{LogStatus, NewLog, RunCounts, ScrapeLog, Website};
use crate::runner::SessionRunner;
use crate::session::SessionTracker;
use crate::store::{PostStore, WebsiteDirectory};

/// Default interval between scheduler cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

/// Cap on concurrently running per-website sessions within a cycle.
const MAX_CONCURRENT_RUNS: usize = 8;

/// Process-wide scrape scheduler.
pub struct AutoScheduler {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    directory: Arc<dyn WebsiteDirectory>,
    store: Arc<dyn PostStore>,
    tracker: Arc<SessionTracker>,
    runner: Arc<SessionRunner>,
    interval: Duration,
    initialized: AtomicBool,
    cycle_active: AtomicBool,
}

impl AutoScheduler {
    pub fn new(
        directory: Arc<dyn WebsiteDirectory>,
        store: Arc<dyn PostStore>,
        tracker: Arc<SessionTracker>,
        runner: Arc<SessionRunner>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                directory,
                store,
                tracker,
                runner,
                interval,
                initialized: AtomicBool::new(false),
                cycle_active: AtomicBool::new(false),
            }),
            shutdown_tx,
            timer: Mutex::new(None),
        }
    }

    /// Idempotent startup: the first call performs one immediate cycle and
    /// arms the recurring timer; any later call returns immediately.
    pub async fn initialize(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            info!("scheduler already initialized; ignoring");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            inner.try_run_cycle().await;

            let mut ticker = tokio::time::interval(inner.interval);
            // interval's first tick completes immediately; the immediate
            // cycle above already covered it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Detach the cycle so a slow run never delays the
                        // timer; overlap is handled by the active flag.
                        let inner = Arc::clone(&inner);
                        tokio::spawn(async move {
                            inner.try_run_cycle().await;
                        });
                    }
                    _ = shutdown_rx.changed() => {
                        info!("scheduler timer disarmed");
                        break;
                    }
                }
            }
        });
        *self.timer.lock().await = Some(handle);
        info!(interval_secs = self.inner.interval.as_secs(), "scheduler initialized");
    }

    /// Run one cycle outside the timer (manual trigger / `--once` mode).
    /// Returns `false` when a cycle was already active and this one was
    /// skipped.
    pub async fn run_cycle_now(&self) -> bool {
        self.inner.try_run_cycle().await
    }

    /// Status-query interface: live session snapshot store.
    pub fn tracker(&self) -> &Arc<SessionTracker> {
        &self.inner.tracker
    }

    /// Disarm the timer. In-flight runs are allowed to complete.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.timer.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "timer task ended abnormally");
            }
        }
    }
}

impl Inner {
    /// Run one cycle unless another is still active; an overlapping tick is
    /// skipped, not queued.
    async fn try_run_cycle(&self) -> bool {
        if self
            .cycle_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("previous cycle still active; skipping this tick");
            return false;
        }
        self.run_cycle().await;
        self.cycle_active.store(false, Ordering::SeqCst);
        true
    }

    #[instrument(level = "info", skip_all)]
    async fn run_cycle(&self) {
        self.tracker.evict_expired();

        let websites = match self.directory.list_websites().await {
            Ok(websites) => websites,
            Err(e) => {
                error!(error = %e, "could not list websites; cycle aborted");
                return;
            }
        };
        if websites.is_empty() {
            info!("no websites configured; nothing to scrape");
            return;
        }
        info!(count = websites.len(), "cycle started");

        let logs: Vec<ScrapeLog> = stream::iter(websites)
            .map(|website| {
                let runner = Arc::clone(&self.runner);
                let store = Arc::clone(&self.store);
                async move { run_one(runner, store, website).await }
            })
            .buffer_unordered(MAX_CONCURRENT_RUNS)
            .collect()
            .await;

        let errors = logs
            .iter()
            .filter(|l| l.status == LogStatus::Error)
            .count();
        let created: u32 = logs.iter().map(|l| l.counts.created).sum();
        info!(
            websites = logs.len(),
            errors,
            created,
            "cycle finished"
        );
    }
}

/// Run one website in its own task so a panicking runner is isolated and
/// recorded as a failed log, like any other internal fault.
async fn run_one(
    runner: Arc<SessionRunner>,
    store: Arc<dyn PostStore>,
    website: Website,
) -> ScrapeLog {
    let task_site = website.clone();
    let handle = tokio::spawn(async move { runner.run(&task_site).await });
    match handle.await {
        Ok(log) => log,
        Err(e) => {
            error!(website = %website.name, error = %e, "runner task aborted");
            let log = NewLog {
                website_id: website.id,
                status: LogStatus::Error,
                message: "internal fault: runner task aborted".to_string(),
                counts: RunCounts::default(),
            };
            match store.create_log(log).await {
                Ok(stored) => stored,
                Err(e) => {
                    error!(error = %e, "failed to persist abort log");
                    ScrapeLog {
                        id: 0,
                        website_id: website.id,
                        status: LogStatus::Error,
                        message: "internal fault: runner task aborted".to_string(),
                        counts: RunCounts::default(),
                        created_at: chrono::Utc::now(),
                    }
                }
            }
        }
    }
}
