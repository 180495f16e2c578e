// Notification payload construction

use crate::models::{EventType, Job, JobHistory, JobStatus, TransferConfig};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

fn rfc3339(time: chrono::DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// The job-level webhook body.
pub fn webhook_payload(job: &Job, history: &JobHistory, config: &TransferConfig) -> Value {
    let mut payload = Map::new();
    payload.insert("event_type".into(), json!("job_execution"));
    payload.insert("job_id".into(), json!(job.id));
    payload.insert("job_name".into(), json!(job.name));
    payload.insert("config_id".into(), json!(config.id));
    payload.insert("config_name".into(), json!(config.name));
    payload.insert("status".into(), json!(history.status.as_str()));
    payload.insert("start_time".into(), json!(rfc3339(history.start_time)));
    if let Some(end) = history.end_time {
        payload.insert("end_time".into(), json!(rfc3339(end)));
        let duration = (end - history.start_time).num_milliseconds() as f64 / 1000.0;
        payload.insert("duration_seconds".into(), json!(duration));
    }
    payload.insert("history_id".into(), json!(history.id));
    payload.insert("bytes_transferred".into(), json!(history.bytes_transferred));
    payload.insert("files_transferred".into(), json!(history.files_transferred));
    if !history.error_message.is_empty() {
        payload.insert("error_message".into(), json!(history.error_message));
    }
    payload.insert(
        "source".into(),
        json!({"type": config.source_type, "path": config.source_path}),
    );
    payload.insert(
        "destination".into(),
        json!({"type": config.destination_type, "path": config.destination_path}),
    );
    Value::Object(payload)
}

/// The default notification-service payload, also used as the templating
/// context.
pub fn service_payload(
    job: &Job,
    history: &JobHistory,
    config: &TransferConfig,
    event: EventType,
    message: &str,
) -> Value {
    let mut job_map = Map::new();
    job_map.insert("id".into(), json!(job.id));
    job_map.insert("name".into(), json!(job.name));
    job_map.insert("status".into(), json!(history.status.as_str()));
    job_map.insert("event".into(), json!(event.display_name()));
    job_map.insert("message".into(), json!(message));
    job_map.insert("started_at".into(), json!(rfc3339(history.start_time)));
    if let Some(end) = history.end_time {
        job_map.insert("completed_at".into(), json!(rfc3339(end)));
        let duration = (end - history.start_time).num_milliseconds() as f64 / 1000.0;
        job_map.insert("duration_seconds".into(), json!(duration));
    }
    job_map.insert("config_id".into(), json!(config.id));
    job_map.insert("config_name".into(), json!(config.name));
    job_map.insert("transfer_bytes".into(), json!(history.bytes_transferred));
    job_map.insert("file_count".into(), json!(history.files_transferred));

    json!({
        "event": event.display_name(),
        "job": Value::Object(job_map),
        "instance": {
            "id": "gomft",
            "name": "GoMFT",
            "version": "1.0",
            "environment": "production"
        },
        "timestamp": rfc3339(Utc::now()),
    })
}

/// Human-readable one-line summary of a run, used for notification records
/// and default message bodies.
pub fn summary_message(job: &Job, history: &JobHistory) -> String {
    match history.status {
        JobStatus::Running => format!("Job {} started", job.name),
        JobStatus::Failed => {
            if history.error_message.is_empty() {
                format!("Job {} failed", job.name)
            } else {
                format!("Job {} failed: {}", job.name, history.error_message)
            }
        }
        _ => format!(
            "Job {} finished with status {}: {} files, {} bytes transferred",
            job.name,
            history.status.as_str(),
            history.files_transferred,
            history.bytes_transferred
        ),
    }
}

/// Title of the job-level notification record.
pub fn record_title(job: &Job, event: EventType) -> String {
    format!("{}: {}", event.display_name(), job.name)
}
