// In-memory store used by the service binary and the test suite. Not a
// persistence layer; ids are assigned monotonically and nothing survives the
// process.

use super::{missing, Store};
use crate::errors::StoreError;
use crate::models::{
    ConfigId, FileMetadata, HistoryId, Job, JobHistory, JobId, NotificationService, ProviderId,
    RcloneCommand, RcloneFlag, StorageProvider, TransferConfig, UserId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// A notification record captured by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedNotification {
    pub user_id: UserId,
    pub job_id: JobId,
    pub history_id: HistoryId,
    pub kind: String,
    pub title: String,
    pub message: String,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    configs: HashMap<ConfigId, TransferConfig>,
    job_configs: HashMap<JobId, Vec<ConfigId>>,
    providers: HashMap<ProviderId, StorageProvider>,
    commands: HashMap<u64, RcloneCommand>,
    command_flags: HashMap<u64, HashMap<u64, RcloneFlag>>,
    services: Vec<NotificationService>,
    histories: HashMap<HistoryId, JobHistory>,
    file_metadata: Vec<FileMetadata>,
    notifications: Vec<CreatedNotification>,
    rclone_config_path: PathBuf,
    next_history_id: HistoryId,
    next_metadata_id: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let store = Self::default();
        {
            let mut inner = store.inner.write().unwrap();
            inner.rclone_config_path = PathBuf::from("rclone.conf");
            inner.next_history_id = 1;
            inner.next_metadata_id = 1;
        }
        store
    }

    pub fn insert_job(&self, job: Job) {
        self.inner.write().unwrap().jobs.insert(job.id, job);
    }

    pub fn insert_config(&self, config: TransferConfig) {
        self.inner.write().unwrap().configs.insert(config.id, config);
    }

    /// Associates a configuration with a job; `get_configs_for_job` returns
    /// associations in insertion order.
    pub fn link_config(&self, job_id: JobId, config_id: ConfigId) {
        self.inner
            .write()
            .unwrap()
            .job_configs
            .entry(job_id)
            .or_default()
            .push(config_id);
    }

    pub fn insert_config_for_job(&self, job_id: JobId, config: TransferConfig) {
        let config_id = config.id;
        self.insert_config(config);
        self.link_config(job_id, config_id);
    }

    pub fn insert_provider(&self, provider: StorageProvider) {
        self.inner
            .write()
            .unwrap()
            .providers
            .insert(provider.id, provider);
    }

    pub fn insert_command(&self, command: RcloneCommand) {
        self.inner
            .write()
            .unwrap()
            .commands
            .insert(command.id, command);
    }

    pub fn insert_command_flags(&self, command_id: u64, flags: Vec<RcloneFlag>) {
        let map = flags.into_iter().map(|f| (f.id, f)).collect();
        self.inner
            .write()
            .unwrap()
            .command_flags
            .insert(command_id, map);
    }

    pub fn insert_service(&self, service: NotificationService) {
        self.inner.write().unwrap().services.push(service);
    }

    pub fn insert_file_metadata(&self, mut metadata: FileMetadata) {
        let mut inner = self.inner.write().unwrap();
        if metadata.id == 0 {
            metadata.id = inner.next_metadata_id;
            inner.next_metadata_id += 1;
        }
        inner.file_metadata.push(metadata);
    }

    pub fn set_rclone_config_path(&self, path: PathBuf) {
        self.inner.write().unwrap().rclone_config_path = path;
    }

    // Assertion helpers for tests.

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.inner.read().unwrap().jobs.get(&id).cloned()
    }

    pub fn histories(&self) -> Vec<JobHistory> {
        let inner = self.inner.read().unwrap();
        let mut histories: Vec<_> = inner.histories.values().cloned().collect();
        histories.sort_by_key(|h| h.id);
        histories
    }

    pub fn file_metadata(&self) -> Vec<FileMetadata> {
        self.inner.read().unwrap().file_metadata.clone()
    }

    pub fn notifications(&self) -> Vec<CreatedNotification> {
        self.inner.read().unwrap().notifications.clone()
    }

    pub fn services(&self) -> Vec<NotificationService> {
        self.inner.read().unwrap().services.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_active_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().unwrap();
        let mut jobs: Vec<_> = inner.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StoreError> {
        self.inner
            .read()
            .unwrap()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("job", id))
    }

    async fn get_configs_for_job(&self, job_id: JobId) -> Result<Vec<TransferConfig>, StoreError> {
        let inner = self.inner.read().unwrap();
        let ids = inner.job_configs.get(&job_id).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| inner.configs.get(id).cloned())
            .collect())
    }

    async fn get_config_rclone_path(
        &self,
        _config: &TransferConfig,
    ) -> Result<PathBuf, StoreError> {
        Ok(self.inner.read().unwrap().rclone_config_path.clone())
    }

    async fn get_rclone_command(&self, id: u64) -> Result<RcloneCommand, StoreError> {
        self.inner
            .read()
            .unwrap()
            .commands
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("rclone command", id))
    }

    async fn get_rclone_command_flags(
        &self,
        command_id: u64,
    ) -> Result<HashMap<u64, RcloneFlag>, StoreError> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .command_flags
            .get(&command_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_storage_provider(&self, id: ProviderId) -> Result<StorageProvider, StoreError> {
        self.inner
            .read()
            .unwrap()
            .providers
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("storage provider", id))
    }

    async fn get_file_metadata_by_hash(&self, hash: &str) -> Result<FileMetadata, StoreError> {
        self.inner
            .read()
            .unwrap()
            .file_metadata
            .iter()
            .rev()
            .find(|m| m.file_hash == hash)
            .cloned()
            .ok_or_else(|| missing("file metadata with hash", hash))
    }

    async fn get_file_metadata_by_job_and_name(
        &self,
        job_id: JobId,
        name: &str,
    ) -> Result<FileMetadata, StoreError> {
        self.inner
            .read()
            .unwrap()
            .file_metadata
            .iter()
            .rev()
            .find(|m| m.job_id == job_id && m.file_name == name)
            .cloned()
            .ok_or_else(|| missing("file metadata for", format!("{job_id}/{name}")))
    }

    async fn get_notification_services(
        &self,
        enabled_only: bool,
    ) -> Result<Vec<NotificationService>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .services
            .iter()
            .filter(|s| !enabled_only || s.is_enabled)
            .cloned()
            .collect())
    }

    async fn update_job_status(&self, job: &Job) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        match inner.jobs.get_mut(&job.id) {
            Some(stored) => {
                stored.last_run = job.last_run;
                stored.next_run = job.next_run;
                Ok(())
            }
            None => Err(missing("job", job.id)),
        }
    }

    async fn create_job_history(&self, history: &mut JobHistory) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        history.id = inner.next_history_id;
        inner.next_history_id += 1;
        inner.histories.insert(history.id, history.clone());
        Ok(())
    }

    async fn update_job_history(&self, history: &JobHistory) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        if !inner.histories.contains_key(&history.id) {
            return Err(missing("job history", history.id));
        }
        inner.histories.insert(history.id, history.clone());
        Ok(())
    }

    async fn create_file_metadata(&self, metadata: &mut FileMetadata) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        metadata.id = inner.next_metadata_id;
        inner.next_metadata_id += 1;
        inner.file_metadata.push(metadata.clone());
        Ok(())
    }

    async fn create_job_notification(
        &self,
        user_id: UserId,
        job_id: JobId,
        history_id: HistoryId,
        kind: &str,
        title: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        self.inner
            .write()
            .unwrap()
            .notifications
            .push(CreatedNotification {
                user_id,
                job_id,
                history_id,
                kind: kind.to_string(),
                title: title.to_string(),
                message: message.to_string(),
            });
        Ok(())
    }

    async fn update_notification_service(
        &self,
        service: &NotificationService,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        match inner.services.iter_mut().find(|s| s.id == service.id) {
            Some(stored) => {
                stored.success_count = service.success_count;
                stored.failure_count = service.failure_count;
                stored.last_used = service.last_used;
                Ok(())
            }
            None => Err(missing("notification service", service.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileStatus, JobStatus};
    use chrono::Utc;

    fn sample_metadata(job_id: JobId, name: &str, hash: &str) -> FileMetadata {
        FileMetadata {
            id: 0,
            job_id,
            config_id: 1,
            file_name: name.to_string(),
            original_path: format!("/src/{name}"),
            file_size: 10,
            file_hash: hash.to_string(),
            creation_time: None,
            mod_time: None,
            processed_time: Utc::now(),
            destination_path: format!("/dst/{name}"),
            status: FileStatus::Processed,
            error_message: String::new(),
        }
    }

    #[tokio::test]
    async fn test_history_ids_are_assigned() {
        let store = MemoryStore::new();
        let mut first = JobHistory::started(1, 1);
        let mut second = JobHistory::started(1, 2);
        store.create_job_history(&mut first).await.unwrap();
        store.create_job_history(&mut second).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn test_history_update_roundtrip() {
        let store = MemoryStore::new();
        let mut history = JobHistory::started(1, 1);
        store.create_job_history(&mut history).await.unwrap();
        history.status = JobStatus::Completed;
        history.files_transferred = 3;
        store.update_job_history(&history).await.unwrap();
        assert_eq!(store.histories()[0].status, JobStatus::Completed);
        assert_eq!(store.histories()[0].files_transferred, 3);
    }

    #[tokio::test]
    async fn test_hash_lookup_miss_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get_file_metadata_by_hash("abc").await.unwrap_err();
        assert!(err.is_not_found());

        store.insert_file_metadata(sample_metadata(1, "a.txt", "abc"));
        let found = store.get_file_metadata_by_hash("abc").await.unwrap();
        assert_eq!(found.file_name, "a.txt");
    }

    #[tokio::test]
    async fn test_job_and_name_lookup_scoped_to_job() {
        let store = MemoryStore::new();
        store.insert_file_metadata(sample_metadata(1, "a.txt", "h1"));
        assert!(store
            .get_file_metadata_by_job_and_name(2, "a.txt")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(store
            .get_file_metadata_by_job_and_name(1, "a.txt")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_configs_for_job_follow_link_order() {
        let store = MemoryStore::new();
        store.insert_job(Job {
            id: 1,
            config_ids: vec![2, 1],
            ..Job::default()
        });
        store.insert_config_for_job(
            1,
            TransferConfig {
                id: 1,
                ..TransferConfig::default()
            },
        );
        store.insert_config_for_job(
            1,
            TransferConfig {
                id: 2,
                ..TransferConfig::default()
            },
        );
        let configs = store.get_configs_for_job(1).await.unwrap();
        let ids: Vec<_> = configs.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(store.get_configs_for_job(9).await.unwrap().is_empty());
    }
}
