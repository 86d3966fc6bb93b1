//! Endpoint Check Scheduler
//!
//! A cancellable tick loop that fans out one detached probe per endpoint on
//! every tick. At most one loop runs per [`Scheduler`]; the running loop is
//! owned by the [`SchedulerHandle`] returned from [`Scheduler::start`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use beacon_core::domain::endpoint::Endpoint;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::service::monitor::{MonitorError, MonitorService, Result};

pub struct Scheduler {
    monitor: MonitorService,
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(monitor: MonitorService, config: SchedulerConfig) -> Self {
        Self {
            monitor,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Load the endpoint set and start the tick loop.
    ///
    /// Fails with `AlreadyRunning` while a handle from a previous call is
    /// outstanding. The loop stops when the returned handle is stopped or
    /// dropped, or when `shutdown` fires.
    pub async fn start(&self, shutdown: &CancellationToken) -> Result<SchedulerHandle> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MonitorError::AlreadyRunning);
        }

        let endpoints = match self
            .monitor
            .load_and_sync_endpoints(&self.config.manifest_path)
            .await
        {
            Ok(endpoints) => endpoints,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        info!(
            "Starting endpoint checks for {} endpoint(s) every {:?}",
            endpoints.len(),
            self.config.check_interval
        );

        let cancel = shutdown.child_token();
        let task = tokio::spawn(run_loop(
            self.monitor.clone(),
            endpoints,
            self.config.check_interval,
            cancel.clone(),
        ));

        Ok(SchedulerHandle {
            cancel,
            task: Some(task),
            running: self.running.clone(),
        })
    }
}

async fn run_loop(
    monitor: MonitorService,
    endpoints: Vec<Endpoint>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                debug!("Dispatching {} endpoint check(s)", endpoints.len());
                for endpoint in &endpoints {
                    if cancel.is_cancelled() {
                        break;
                    }
                    tokio::spawn(probe_detached(
                        monitor.clone(),
                        endpoint.clone(),
                        cancel.clone(),
                    ));
                }
            }
        }
    }

    info!("Endpoint check scheduler stopped");
}

/// Probes are not interrupted once started; they are bounded by the probe timeout.
async fn probe_detached(monitor: MonitorService, endpoint: Endpoint, cancel: CancellationToken) {
    if cancel.is_cancelled() {
        return;
    }
    if let Err(e) = monitor.probe_and_record(&endpoint).await {
        warn!(endpoint_id = %endpoint.id, "Error checking {}: {}", endpoint.url, e);
    }
}

/// Owner of a running check loop
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl SchedulerHandle {
    /// Stop dispatching and wait for the loop to exit.
    ///
    /// Probes already in flight finish on their own.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Endpoint check loop ended abnormally: {}", e);
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Start/stop surface shared by request handlers
///
/// Holds the outstanding handle so start and stop are serialized.
pub struct SchedulerControl {
    scheduler: Scheduler,
    handle: Mutex<Option<SchedulerHandle>>,
    shutdown: CancellationToken,
}

impl SchedulerControl {
    pub fn new(scheduler: Scheduler, shutdown: CancellationToken) -> Self {
        Self {
            scheduler,
            handle: Mutex::new(None),
            shutdown,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut slot = self.handle.lock().await;
        if slot.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        *slot = Some(self.scheduler.start(&self.shutdown).await?);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut slot = self.handle.lock().await;
        let handle = slot.take().ok_or(MonitorError::NotRunning)?;
        handle.stop().await;
        info!("Endpoint checks stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }
}
