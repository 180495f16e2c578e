// Error handling framework

use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("cron registry error: {0}")]
    Registry(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Transfer execution errors
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("failed to spawn rclone: {0}")]
    Spawn(String),

    #[error("failed to create filter file: {0}")]
    FilterFile(String),

    #[error("failed to parse lsjson output: {0}")]
    ListingParse(String),

    #[error("credential decryption failed: {0}")]
    Credentials(#[from] CredentialError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Notification dispatch errors
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("provider rejected notification: {0}")]
    ProviderRejected(String),
}

/// Credential handling errors
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("no encryption key configured")]
    NoKey,

    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("malformed encrypted value: {0}")]
    Malformed(String),

    #[error("decryption failed")]
    DecryptFailed,
}

/// Errors surfaced by the data-store contract
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("store operation failed: {0}")]
    OperationFailed(String),
}

impl StoreError {
    /// True when the error is a plain lookup miss rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Metadata lookup errors
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("no history found for file {file} in job {job}")]
    NoHistory { file: String, job: u64 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
