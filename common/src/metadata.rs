// Dedup lookups against prior runs

use crate::errors::{MetadataError, StoreError};
use crate::models::{FileMetadata, JobId};
use crate::store::Store;
use std::sync::Arc;
use tracing::error;

/// Answers "have we already moved this file?" for the transfer executor.
pub struct MetadataHandler {
    store: Arc<dyn Store>,
}

impl MetadataHandler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Looks up any prior record with the given content hash, across jobs.
    /// An empty hash never matches. A store miss is not an error; anything
    /// else is logged and surfaced.
    pub async fn has_file_been_processed(
        &self,
        job_id: JobId,
        hash: &str,
    ) -> Result<(bool, Option<FileMetadata>), StoreError> {
        if hash.is_empty() {
            return Ok((false, None));
        }
        match self.store.get_file_metadata_by_hash(hash).await {
            Ok(prior) => Ok((true, Some(prior))),
            Err(e) if e.is_not_found() => Ok((false, None)),
            Err(e) => {
                error!(job_id, hash, error = %e, "file hash lookup failed");
                Err(e)
            }
        }
    }

    /// Looks up the processing history of a filename within one job. A miss
    /// is an error whose message callers treat as "proceed".
    pub async fn check_file_processing_history(
        &self,
        job_id: JobId,
        file_name: &str,
    ) -> Result<FileMetadata, MetadataError> {
        match self
            .store
            .get_file_metadata_by_job_and_name(job_id, file_name)
            .await
        {
            Ok(prior) => Ok(prior),
            Err(e) if e.is_not_found() => Err(MetadataError::NoHistory {
                file: file_name.to_string(),
                job: job_id,
            }),
            Err(e) => Err(MetadataError::Store(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileStatus;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn handler_with(metadata: Vec<FileMetadata>) -> MetadataHandler {
        let store = MemoryStore::new();
        for m in metadata {
            store.insert_file_metadata(m);
        }
        MetadataHandler::new(Arc::new(store))
    }

    fn record(job_id: JobId, name: &str, hash: &str, status: FileStatus) -> FileMetadata {
        FileMetadata {
            id: 0,
            job_id,
            config_id: 1,
            file_name: name.to_string(),
            original_path: format!("/in/{name}"),
            file_size: 1,
            file_hash: hash.to_string(),
            creation_time: None,
            mod_time: None,
            processed_time: Utc::now(),
            destination_path: format!("/out/{name}"),
            status,
            error_message: String::new(),
        }
    }

    #[tokio::test]
    async fn test_empty_hash_bypasses_dedup() {
        let handler = handler_with(vec![record(1, "a.txt", "", FileStatus::Processed)]);
        let (processed, prior) = handler.has_file_been_processed(1, "").await.unwrap();
        assert!(!processed);
        assert!(prior.is_none());
    }

    #[tokio::test]
    async fn test_hash_miss_is_not_processed() {
        let handler = handler_with(vec![]);
        let (processed, prior) = handler.has_file_been_processed(1, "deadbeef").await.unwrap();
        assert!(!processed);
        assert!(prior.is_none());
    }

    #[tokio::test]
    async fn test_hash_hit_returns_prior_across_jobs() {
        let handler = handler_with(vec![record(42, "a.txt", "deadbeef", FileStatus::Archived)]);
        let (processed, prior) = handler.has_file_been_processed(1, "deadbeef").await.unwrap();
        assert!(processed);
        assert_eq!(prior.unwrap().job_id, 42);
    }

    #[tokio::test]
    async fn test_history_miss_message() {
        let handler = handler_with(vec![]);
        let err = handler
            .check_file_processing_history(9, "data.bin")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no history found for file data.bin in job 9");
    }

    #[tokio::test]
    async fn test_history_hit_returns_record() {
        let handler = handler_with(vec![record(9, "data.bin", "h", FileStatus::Processed)]);
        let prior = handler
            .check_file_processing_history(9, "data.bin")
            .await
            .unwrap();
        assert_eq!(prior.file_name, "data.bin");
    }
}
