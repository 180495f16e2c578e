use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub type JobId = u64;
pub type ConfigId = u64;
pub type HistoryId = u64;
pub type ServiceId = u64;
pub type ProviderId = u64;
pub type UserId = u64;

// ============================================================================
// Job Models
// ============================================================================

/// Job represents a named schedule that runs one or more transfer
/// configurations when fired.
///
/// The tri-state booleans mirror nullable columns: `None` means the flag was
/// never set. `enabled` defaults to true when unset; the notify flags default
/// to false.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    /// 5- or 6-field cron expression.
    pub schedule: String,
    pub enabled: Option<bool>,
    /// Ordered list of transfer configurations this job processes.
    #[serde(default)]
    pub config_ids: Vec<ConfigId>,
    /// Legacy single-configuration reference, consulted only when
    /// `config_ids` is empty.
    pub config_id: Option<ConfigId>,
    pub webhook_enabled: Option<bool>,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub webhook_secret: String,
    /// JSON object of additional webhook request headers.
    #[serde(default)]
    pub webhook_headers: String,
    pub notify_on_success: Option<bool>,
    pub notify_on_failure: Option<bool>,
    pub created_by: UserId,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl Job {
    /// Unset means enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn webhook_enabled(&self) -> bool {
        self.webhook_enabled.unwrap_or(false)
    }

    pub fn notify_on_success(&self) -> bool {
        self.notify_on_success.unwrap_or(false)
    }

    pub fn notify_on_failure(&self) -> bool {
        self.notify_on_failure.unwrap_or(false)
    }

    /// The ordered configuration ids this job must process, falling back to
    /// the legacy single reference.
    pub fn ordered_config_ids(&self) -> Vec<ConfigId> {
        if !self.config_ids.is_empty() {
            return self.config_ids.clone();
        }
        self.config_id.into_iter().collect()
    }
}

// ============================================================================
// Transfer Configuration
// ============================================================================

/// Endpoint kinds understood by the transfer executor. Anything other than
/// `local` addresses a remote through its synthetic rclone alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndpointType {
    #[default]
    Local,
    Sftp,
    S3,
    Minio,
    B2,
    Ftp,
    Smb,
    Webdav,
    Gphotos,
    Gdrive,
}

impl EndpointType {
    /// Bucket-oriented endpoints embed the bucket before the path.
    pub fn uses_bucket(&self) -> bool {
        matches!(self, EndpointType::S3 | EndpointType::Minio | EndpointType::B2)
    }

    pub fn is_local(&self) -> bool {
        matches!(self, EndpointType::Local)
    }
}

/// One source → destination transfer definition consumed by a single rclone
/// command.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransferConfig {
    pub id: ConfigId,
    pub name: String,
    pub source_type: EndpointType,
    #[serde(default)]
    pub source_path: String,
    pub source_bucket: Option<String>,
    pub source_provider_id: Option<ProviderId>,
    pub destination_type: EndpointType,
    #[serde(default)]
    pub destination_path: String,
    pub dest_bucket: Option<String>,
    pub destination_provider_id: Option<ProviderId>,
    /// Glob selecting source files; empty or `*` matches everything.
    #[serde(default)]
    pub file_pattern: String,
    /// Optional destination-filename pattern, see `transfer::pattern`.
    #[serde(default)]
    pub output_pattern: String,
    pub archive_enabled: bool,
    #[serde(default)]
    pub archive_path: String,
    pub delete_after_transfer: bool,
    pub skip_processed_files: bool,
    /// Free-form extra rclone flags, whitespace-separated.
    #[serde(default)]
    pub rclone_flags: String,
    /// Optional reference to a named rclone verb; `copyto` when unset.
    pub command_id: Option<u64>,
    /// JSON list of selected flag ids.
    #[serde(default)]
    pub command_flags: String,
    /// JSON map of flag id → value.
    #[serde(default)]
    pub command_flag_values: String,
    pub max_concurrent_transfers: i32,
}

impl TransferConfig {
    /// Worker-pool size for file-by-file transfers. Values ≤ 0 clamp to 1,
    /// and Google Photos on either side forces serial transfers.
    pub fn effective_concurrency(&self) -> usize {
        if self.source_type == EndpointType::Gphotos
            || self.destination_type == EndpointType::Gphotos
        {
            return 1;
        }
        if self.max_concurrent_transfers <= 0 {
            1
        } else {
            self.max_concurrent_transfers as usize
        }
    }

    /// True when the file pattern restricts the listing.
    pub fn has_file_pattern(&self) -> bool {
        !self.file_pattern.is_empty() && self.file_pattern != "*"
    }
}

/// A named rclone verb selectable per configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcloneCommand {
    pub id: u64,
    pub name: String,
}

/// Descriptor for one rclone flag selectable per configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcloneFlag {
    pub id: u64,
    /// Flag name without the leading dashes, e.g. `transfers`.
    pub name: String,
    pub is_boolean: bool,
    pub default_value: Option<String>,
}

/// Provider record holding connection credentials, possibly encrypted at
/// rest. Only the four secret fields are relevant to the executor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageProvider {
    pub id: ProviderId,
    pub name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
}

// ============================================================================
// Run History
// ============================================================================

/// Terminal and in-flight states of one (job, config) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    CompletedWithErrors,
    CompletedWithArchiveError,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::CompletedWithArchiveError => "completed_with_archive_error",
            JobStatus::Failed => "failed",
        }
    }
}

/// One run of one (Job, Config) pair. Created as `running`, finalized exactly
/// once by the transfer executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistory {
    pub id: HistoryId,
    pub job_id: JobId,
    pub config_id: ConfigId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub files_transferred: i64,
    pub bytes_transferred: i64,
    #[serde(default)]
    pub error_message: String,
}

impl JobHistory {
    pub fn started(job_id: JobId, config_id: ConfigId) -> Self {
        Self {
            id: 0,
            job_id,
            config_id,
            start_time: Utc::now(),
            end_time: None,
            status: JobStatus::Running,
            files_transferred: 0,
            bytes_transferred: 0,
            error_message: String::new(),
        }
    }
}

// ============================================================================
// File Metadata
// ============================================================================

/// Outcome of processing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Processed,
    Archived,
    Deleted,
    ArchivedAndDeleted,
    Error,
}

impl FileStatus {
    /// Terminal-processed statuses satisfy the dedup check; `error` does not.
    pub fn is_terminal_processed(&self) -> bool {
        !matches!(self, FileStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Processed => "processed",
            FileStatus::Archived => "archived",
            FileStatus::Deleted => "deleted",
            FileStatus::ArchivedAndDeleted => "archived_and_deleted",
            FileStatus::Error => "error",
        }
    }
}

/// One record per file actually processed, success or error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: u64,
    pub job_id: JobId,
    pub config_id: ConfigId,
    pub file_name: String,
    pub original_path: String,
    pub file_size: i64,
    /// Preferred algorithm order: SHA-1, MD5, SHA-256, CRC32. Empty when
    /// rclone reported none; dedup is keyed on non-empty values only.
    #[serde(default)]
    pub file_hash: String,
    pub creation_time: Option<DateTime<Utc>>,
    pub mod_time: Option<DateTime<Utc>>,
    pub processed_time: DateTime<Utc>,
    pub destination_path: String,
    pub status: FileStatus,
    #[serde(default)]
    pub error_message: String,
}

// ============================================================================
// Notification Services
// ============================================================================

/// Event classes a notification service can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JobStart,
    JobComplete,
    JobError,
    JobStatus,
}

impl EventType {
    /// Derives the event class from a run status.
    pub fn from_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Running => EventType::JobStart,
            JobStatus::Completed | JobStatus::CompletedWithErrors => EventType::JobComplete,
            JobStatus::Failed => EventType::JobError,
            _ => EventType::JobStatus,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::JobStart => "job_start",
            EventType::JobComplete => "job_complete",
            EventType::JobError => "job_error",
            EventType::JobStatus => "job_status",
        }
    }

    /// Human-readable event name used in payloads.
    pub fn display_name(&self) -> &'static str {
        match self {
            EventType::JobStart => "Job Started",
            EventType::JobComplete => "Job Completed",
            EventType::JobError => "Job Failed",
            EventType::JobStatus => "job_status",
        }
    }
}

/// Delivery channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Email,
    Webhook,
    Pushbullet,
    Ntfy,
    Gotify,
    Pushover,
}

/// Retry behavior of a notification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicy {
    #[default]
    None,
    Simple,
    Exponential,
}

impl RetryPolicy {
    /// Maximum delivery attempts for this policy.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryPolicy::None => 1,
            RetryPolicy::Simple => 4,
            RetryPolicy::Exponential => 6,
        }
    }

    /// Per-request timeout for this policy.
    pub fn timeout(&self) -> Duration {
        match self {
            RetryPolicy::None => Duration::from_secs(10),
            RetryPolicy::Simple => Duration::from_secs(15),
            RetryPolicy::Exponential => Duration::from_secs(30),
        }
    }

    /// Backoff before attempt `n + 1`, doubling from one second.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(1u64 << attempt.saturating_sub(1).min(30))
    }
}

/// A globally configured delivery endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationService {
    pub id: ServiceId,
    pub name: String,
    pub service_type: ServiceType,
    pub is_enabled: bool,
    pub event_triggers: Vec<EventType>,
    /// Type-specific configuration map.
    #[serde(default)]
    pub config: HashMap<String, String>,
    /// Optional JSON-shaped template replacing the default webhook payload.
    pub payload_template: Option<String>,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_used: Option<DateTime<Utc>>,
}

impl NotificationService {
    pub fn triggers_on(&self, event: EventType) -> bool {
        self.event_triggers.contains(&event)
    }
}
