// Cron registry and scheduler lifecycle

use super::job_executor::JobExecutor;
use crate::errors::ScheduleError;
use crate::logging::Logger;
use crate::models::{Job, JobId};
use crate::notify::Notifier;
use crate::store::Store;
use crate::transfer::TransferExecutor;
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shared view of the cron registry: the underlying scheduler plus the
/// `JobId → entry-handle` table. The scheduler is the sole writer; executors
/// only read it to compute next firing times.
#[derive(Clone)]
pub struct RegistryHandle {
    scheduler: JobScheduler,
    entries: Arc<Mutex<HashMap<JobId, Uuid>>>,
}

impl RegistryHandle {
    /// Next firing time of the installed entry for a job, if any.
    pub async fn next_run_for(&self, job_id: JobId) -> Option<DateTime<Utc>> {
        let entry = { self.entries.lock().await.get(&job_id).copied() }?;
        let mut scheduler = self.scheduler.clone();
        scheduler.next_tick_for_job(entry).await.ok().flatten()
    }

    pub async fn is_scheduled(&self, job_id: JobId) -> bool {
        self.entries.lock().await.contains_key(&job_id)
    }

    pub async fn entry_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// Owns the cron loop and the outward control surface: install, remove,
/// run-now, stop, and log rotation.
pub struct Scheduler {
    store: Arc<dyn Store>,
    registry: RegistryHandle,
    executor: Arc<JobExecutor>,
    logger: Logger,
    shutdown_grace: Duration,
    stopped: AtomicBool,
}

impl Scheduler {
    /// Starts the cron loop and installs every enabled active job.
    pub async fn new(
        store: Arc<dyn Store>,
        transfer: Arc<TransferExecutor>,
        notifier: Arc<Notifier>,
        logger: Logger,
        shutdown_grace_seconds: u64,
    ) -> Result<Self, ScheduleError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| ScheduleError::Registry(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| ScheduleError::Registry(e.to_string()))?;

        let registry = RegistryHandle {
            scheduler,
            entries: Arc::new(Mutex::new(HashMap::new())),
        };
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&store),
            transfer,
            notifier,
            registry.clone(),
        ));

        let scheduler = Self {
            store,
            registry,
            executor,
            logger,
            shutdown_grace: Duration::from_secs(shutdown_grace_seconds),
            stopped: AtomicBool::new(false),
        };
        scheduler.load_jobs().await?;
        Ok(scheduler)
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Reads active jobs from the store, clears the entry table, and installs
    /// every enabled job.
    async fn load_jobs(&self) -> Result<(), ScheduleError> {
        let jobs = self.store.get_active_jobs().await?;
        info!(count = jobs.len(), "loading jobs");
        self.registry.entries.lock().await.clear();
        for mut job in jobs {
            if !job.is_enabled() {
                debug!(job_id = job.id, "job disabled, not scheduling");
                continue;
            }
            if let Err(e) = self.schedule_job(&mut job).await {
                error!(job_id = job.id, error = %e, "failed to schedule job");
            }
        }
        Ok(())
    }

    /// Installs (or replaces) the cron entry for a job and persists its next
    /// firing time. Disabled jobs only get their existing entry removed.
    pub async fn schedule_job(&self, job: &mut Job) -> Result<(), ScheduleError> {
        {
            let mut entries = self.registry.entries.lock().await;
            if let Some(existing) = entries.remove(&job.id) {
                if let Err(e) = self.registry.scheduler.remove(&existing).await {
                    warn!(job_id = job.id, error = %e, "failed to remove stale cron entry");
                }
            }

            if !job.is_enabled() {
                info!(job_id = job.id, "job disabled, no cron entry installed");
                return Ok(());
            }

            let normalized = normalize_schedule(&job.schedule);
            CronSchedule::from_str(&normalized).map_err(|e| {
                ScheduleError::InvalidCronExpression {
                    expression: job.schedule.clone(),
                    reason: e.to_string(),
                }
            })?;

            let executor = Arc::clone(&self.executor);
            let job_id = job.id;
            // Each tick dispatches the run on its own task so a registry
            // shutdown never cancels an in-flight run.
            let cron_job = CronJob::new_async(normalized.as_str(), move |_entry, _registry| {
                let executor = Arc::clone(&executor);
                Box::pin(async move {
                    tokio::spawn(async move {
                        executor.execute_job(job_id).await;
                    });
                })
            })
            .map_err(|e| ScheduleError::InvalidCronExpression {
                expression: job.schedule.clone(),
                reason: e.to_string(),
            })?;

            let entry = self
                .registry
                .scheduler
                .add(cron_job)
                .await
                .map_err(|e| ScheduleError::Registry(e.to_string()))?;
            entries.insert(job.id, entry);
            info!(job_id = job.id, schedule = %job.schedule, "job scheduled");
        }

        job.next_run = self.registry.next_run_for(job.id).await;
        if let Err(e) = self.store.update_job_status(job).await {
            warn!(job_id = job.id, error = %e, "failed to persist next run time");
        }
        Ok(())
    }

    /// Removes a job's cron entry; unknown jobs are a no-op.
    pub async fn unschedule_job(&self, job_id: JobId) {
        let mut entries = self.registry.entries.lock().await;
        match entries.remove(&job_id) {
            Some(entry) => {
                if let Err(e) = self.registry.scheduler.remove(&entry).await {
                    warn!(job_id, error = %e, "failed to remove cron entry");
                } else {
                    info!(job_id, "job unscheduled");
                }
            }
            None => debug!(job_id, "unschedule for unknown job ignored"),
        }
    }

    /// Dispatches a run immediately on a background task.
    pub fn run_job_now(&self, job_id: JobId) {
        info!(job_id, "on-demand run requested");
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            executor.execute_job(job_id).await;
        });
    }

    /// Stops the cron loop, waits up to the grace period for in-flight runs
    /// to drain, and closes the logger. Subsequent calls are no-ops; running
    /// children are never force-killed.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping scheduler");
        let mut scheduler = self.registry.scheduler.clone();
        if let Err(e) = scheduler.shutdown().await {
            error!(error = %e, "cron registry shutdown failed");
        }

        let deadline = Instant::now() + self.shutdown_grace;
        while self.executor.active_runs() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let remaining = self.executor.active_runs();
        if remaining > 0 {
            warn!(remaining, "grace period elapsed with runs still in flight");
        }
        self.logger.close();
        info!("scheduler stopped");
    }

    /// Forces a rotation of the log file sink.
    pub fn rotate_logs(&self) -> std::io::Result<()> {
        self.logger.rotate()
    }
}

/// 5-field expressions gain a leading seconds field; anything else passes
/// through untouched.
pub fn normalize_schedule(schedule: &str) -> String {
    let trimmed = schedule.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}
