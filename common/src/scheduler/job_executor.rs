// Orchestrates one job run: explicit configuration ordering, history
// creation, transfer execution, and run-timestamp persistence.

use super::engine::RegistryHandle;
use crate::models::{Job, JobHistory, JobId, TransferConfig};
use crate::notify::Notifier;
use crate::store::Store;
use crate::transfer::TransferExecutor;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct JobExecutor {
    store: Arc<dyn Store>,
    transfer: Arc<TransferExecutor>,
    notifier: Arc<Notifier>,
    registry: RegistryHandle,
    active: AtomicUsize,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        transfer: Arc<TransferExecutor>,
        notifier: Arc<Notifier>,
        registry: RegistryHandle,
    ) -> Self {
        Self {
            store,
            transfer,
            notifier,
            registry,
            active: AtomicUsize::new(0),
        }
    }

    /// Number of runs currently in flight; `stop()` drains on this.
    pub fn active_runs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Runs every configuration of a job, in the job's stored order. A
    /// missing job or an empty configuration set aborts with a log line and
    /// no side effects.
    pub async fn execute_job(&self, job_id: JobId) {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.execute_job_inner(job_id).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    async fn execute_job_inner(&self, job_id: JobId) {
        let mut job = match self.store.get_job(job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(job_id, error = %e, "job lookup failed, skipping run");
                return;
            }
        };
        let configs = match self.store.get_configs_for_job(job_id).await {
            Ok(configs) => configs,
            Err(e) => {
                error!(job_id, error = %e, "failed to load configurations");
                return;
            }
        };
        if configs.is_empty() {
            error!(job_id, "job has no transfer configurations");
            return;
        }
        let ordered = order_configs(&job, configs);

        job.last_run = Some(Utc::now());
        if let Err(e) = self.store.update_job_status(&job).await {
            warn!(job_id, error = %e, "failed to persist last run time");
        }

        let total = ordered.len();
        for (index, config) in ordered.iter().enumerate() {
            self.process_configuration(&job, config, index, total).await;
        }

        if let Some(next) = self.registry.next_run_for(job_id).await {
            job.next_run = Some(next);
            if let Err(e) = self.store.update_job_status(&job).await {
                warn!(job_id, error = %e, "failed to persist next run time");
            }
        }
    }

    async fn process_configuration(
        &self,
        job: &Job,
        config: &TransferConfig,
        index: usize,
        total: usize,
    ) {
        info!(
            job_id = job.id,
            config_id = config.id,
            step = index + 1,
            total,
            "processing configuration"
        );
        let mut history = JobHistory::started(job.id, config.id);
        if let Err(e) = self.store.create_job_history(&mut history).await {
            error!(
                job_id = job.id,
                config_id = config.id,
                error = %e,
                "failed to create history row, skipping configuration"
            );
            return;
        }
        self.notifier.notify(job, &history, config).await;
        self.transfer
            .execute_config_transfer(job, config, &mut history)
            .await;
    }
}

/// Walks `job.config_ids` in stored order, consuming matches from the loaded
/// set; configs the list does not mention are appended at the end. Stale ids
/// are tolerated.
pub(crate) fn order_configs(job: &Job, mut loaded: Vec<TransferConfig>) -> Vec<TransferConfig> {
    let mut ordered = Vec::with_capacity(loaded.len());
    for id in job.ordered_config_ids() {
        if let Some(pos) = loaded.iter().position(|c| c.id == id) {
            ordered.push(loaded.remove(pos));
        }
    }
    ordered.extend(loaded);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: u64) -> TransferConfig {
        TransferConfig {
            id,
            ..TransferConfig::default()
        }
    }

    #[test]
    fn test_explicit_order_is_preserved() {
        let job = Job {
            config_ids: vec![2, 1],
            ..Job::default()
        };
        let ordered = order_configs(&job, vec![config(1), config(2), config(3)]);
        let ids: Vec<_> = ordered.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_stale_ids_are_tolerated() {
        let job = Job {
            config_ids: vec![9, 1],
            ..Job::default()
        };
        let ordered = order_configs(&job, vec![config(1), config(2)]);
        let ids: Vec<_> = ordered.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_legacy_single_config_id() {
        let job = Job {
            config_id: Some(2),
            ..Job::default()
        };
        let ordered = order_configs(&job, vec![config(1), config(2)]);
        let ids: Vec<_> = ordered.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_duplicate_ids_consume_each_config_once() {
        let job = Job {
            config_ids: vec![1, 1, 2],
            ..Job::default()
        };
        let ordered = order_configs(&job, vec![config(1), config(2)]);
        let ids: Vec<_> = ordered.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
