//! Periodic branch sweeps with notification of updated branches.
//!
//! One tokio task per running scheduler: a sweep runs immediately on start
//! and then on every interval tick until [`Scheduler::stop`] or the
//! process-wide shutdown broadcast. Git work runs on the blocking pool.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use git_watcher_core::contract::{NotificationPayload, Notifier, RepoUpdate};
use git_watcher_core::Manager;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Outcome of one sweep over the watched branches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub checked: usize,
    pub updated: Vec<String>,
    pub failed: Vec<String>,
    pub notified: bool,
}

#[derive(Clone)]
struct Checker {
    manager: Arc<Manager>,
    notifier: Arc<dyn Notifier>,
}

impl Checker {
    async fn run_check(&self) -> CheckSummary {
        let check_id = Uuid::new_v4();
        let span = info_span!("check", check_id = %check_id);
        self.sweep().instrument(span).await
    }

    async fn sweep(&self) -> CheckSummary {
        info!("Checking watched branches");
        let manager = Arc::clone(&self.manager);
        let results = match tokio::task::spawn_blocking(move || manager.check_all_branches()).await
        {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "Branch sweep task failed");
                return CheckSummary::default();
            }
        };

        let mut summary = CheckSummary {
            checked: results.len(),
            ..CheckSummary::default()
        };
        let repository = self.manager.main_repository().url.clone();
        let now = Utc::now();
        let mut payload = NotificationPayload::repository_update(String::new());

        for (branch, result) in results {
            match result {
                Ok(report) if report.updated => {
                    payload.repo_updates.insert(
                        branch.clone(),
                        RepoUpdate {
                            repository: repository.clone(),
                            branch: branch.clone(),
                            timestamp: now,
                            commit_hash: report.head.clone(),
                        },
                    );
                    summary.updated.push(branch);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(branch = %branch, error = %e, "Branch check failed");
                    summary.failed.push(branch);
                }
            }
        }

        if summary.updated.is_empty() {
            info!(checked = summary.checked, failed = summary.failed.len(), "No branches updated");
            return summary;
        }

        payload.message = format!(
            "Updated {} branches: [{}]",
            summary.updated.len(),
            summary.updated.join(" ")
        );
        match self.notifier.send_notification(&payload).await {
            Ok(()) => summary.notified = true,
            Err(e) => error!(error = %e, "Failed to send update notification"),
        }
        info!(
            checked = summary.checked,
            updated = ?summary.updated,
            failed = summary.failed.len(),
            notified = summary.notified,
            "Branch check finished"
        );
        summary
    }
}

struct RunningLoop {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    checker: Checker,
    interval: Duration,
    state: Mutex<Option<RunningLoop>>,
}

impl Scheduler {
    pub fn new(manager: Arc<Manager>, notifier: Arc<dyn Notifier>, interval: Duration) -> Self {
        Self {
            checker: Checker { manager, notifier },
            interval,
            state: Mutex::new(None),
        }
    }

    /// Starts the periodic loop. Fails if already running or the interval is zero.
    pub fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("scheduler interval must be greater than 0"));
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            return Err(anyhow!("scheduler is already running"));
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let checker = self.checker.clone();
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        checker.run_check().await;
                    }
                    _ = &mut stop_rx => {
                        info!("Scheduler stopped");
                        break;
                    }
                    _ = shutdown.recv() => {
                        info!("Scheduler received shutdown");
                        break;
                    }
                }
            }
        });

        info!(interval_secs = period.as_secs_f64(), "Scheduler started");
        *state = Some(RunningLoop {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    /// Stops the loop and waits for an in-flight check to finish.
    pub async fn stop(&self) {
        let running = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            let _ = running.stop.send(());
            if let Err(e) = running.handle.await {
                error!(error = %e, "Scheduler task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Runs one sweep in the background. Fails when the scheduler is not running.
    pub fn trigger_manual_check(&self) -> Result<JoinHandle<CheckSummary>> {
        if !self.is_running() {
            return Err(anyhow!("scheduler is not running"));
        }
        info!("Manual check triggered");
        let checker = self.checker.clone();
        Ok(tokio::spawn(async move { checker.run_check().await }))
    }

    /// Runs one sweep and waits for it.
    pub async fn run_check(&self) -> CheckSummary {
        self.checker.run_check().await
    }
}
