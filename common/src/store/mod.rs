// Data-access contract consumed by the scheduler core. Persistence itself is
// an external collaborator; the core only reads and updates records through
// this trait.

mod memory;

pub use memory::{CreatedNotification, MemoryStore};

use crate::errors::StoreError;
use crate::models::{
    FileMetadata, HistoryId, Job, JobHistory, JobId, NotificationService, ProviderId,
    RcloneCommand, RcloneFlag, StorageProvider, TransferConfig, UserId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

/// The narrow data-access surface the core depends on. Lookup misses are
/// reported as [`StoreError::NotFound`]; callers decide whether a miss is an
/// error.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_active_jobs(&self) -> Result<Vec<Job>, StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Job, StoreError>;

    async fn get_configs_for_job(&self, job_id: JobId) -> Result<Vec<TransferConfig>, StoreError>;

    /// Path of the rclone config file defining this configuration's remote
    /// aliases.
    async fn get_config_rclone_path(&self, config: &TransferConfig)
        -> Result<PathBuf, StoreError>;

    async fn get_rclone_command(&self, id: u64) -> Result<RcloneCommand, StoreError>;

    /// Flag descriptors available to the given command, keyed by flag id.
    async fn get_rclone_command_flags(
        &self,
        command_id: u64,
    ) -> Result<HashMap<u64, RcloneFlag>, StoreError>;

    async fn get_storage_provider(&self, id: ProviderId) -> Result<StorageProvider, StoreError>;

    /// Any prior record with the given content hash, across jobs.
    async fn get_file_metadata_by_hash(&self, hash: &str) -> Result<FileMetadata, StoreError>;

    async fn get_file_metadata_by_job_and_name(
        &self,
        job_id: JobId,
        name: &str,
    ) -> Result<FileMetadata, StoreError>;

    async fn get_notification_services(
        &self,
        enabled_only: bool,
    ) -> Result<Vec<NotificationService>, StoreError>;

    /// Persists the scheduler-owned job fields (`last_run`, `next_run`).
    async fn update_job_status(&self, job: &Job) -> Result<(), StoreError>;

    /// Persists a new history row and assigns its id.
    async fn create_job_history(&self, history: &mut JobHistory) -> Result<(), StoreError>;

    async fn update_job_history(&self, history: &JobHistory) -> Result<(), StoreError>;

    /// Persists a new file-metadata row and assigns its id.
    async fn create_file_metadata(&self, metadata: &mut FileMetadata) -> Result<(), StoreError>;

    async fn create_job_notification(
        &self,
        user_id: UserId,
        job_id: JobId,
        history_id: HistoryId,
        kind: &str,
        title: &str,
        message: &str,
    ) -> Result<(), StoreError>;

    /// Persists the notifier-owned counters of a delivery service.
    async fn update_notification_service(
        &self,
        service: &NotificationService,
    ) -> Result<(), StoreError>;
}

/// Typed lookup miss with a uniform message shape.
pub fn missing(entity: &str, id: impl std::fmt::Display) -> StoreError {
    StoreError::NotFound(format!("{entity} {id}"))
}
