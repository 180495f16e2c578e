// Multi-channel notification fan-out

mod channels;
mod payload;
mod signing;
mod template;

pub use channels::{EmailTransport, LogEmailTransport};
pub use payload::{service_payload, summary_message, webhook_payload};
pub use signing::sign_sha256_hex;
pub use template::{render_template, replace_variables};

use crate::models::{EventType, Job, JobHistory, JobStatus, NotificationService, TransferConfig};
use crate::store::Store;
use chrono::Utc;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const JOB_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Dispatches run events to the job-level webhook and every matching global
/// delivery service. Failures never propagate into the run; the notifier only
/// logs them and counts them against the service.
pub struct Notifier {
    store: Arc<dyn Store>,
    client: Client,
    email: Arc<dyn EmailTransport>,
}

impl Notifier {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            client: Client::new(),
            email: Arc::new(LogEmailTransport),
        }
    }

    pub fn with_email_transport(mut self, email: Arc<dyn EmailTransport>) -> Self {
        self.email = email;
        self
    }

    /// Creates the job-level notification record, then dispatches the job
    /// webhook and the global fan-out. The single entry point for run events.
    pub async fn notify(&self, job: &Job, history: &JobHistory, config: &TransferConfig) {
        let event = EventType::from_status(history.status);
        let message = payload::summary_message(job, history);
        let title = payload::record_title(job, event);
        if let Err(e) = self
            .store
            .create_job_notification(
                job.created_by,
                job.id,
                history.id,
                event.as_str(),
                &title,
                &message,
            )
            .await
        {
            warn!(job_id = job.id, error = %e, "failed to create job notification record");
        }

        self.send_notifications(job, history, config).await;
    }

    /// Job webhook plus global service fan-out.
    pub async fn send_notifications(
        &self,
        job: &Job,
        history: &JobHistory,
        config: &TransferConfig,
    ) {
        self.send_job_webhook(job, history, config).await;
        self.dispatch_services(job, history, config).await;
    }

    async fn send_job_webhook(&self, job: &Job, history: &JobHistory, config: &TransferConfig) {
        if !job.webhook_enabled() || job.webhook_url.is_empty() {
            return;
        }
        // Completion events the job owner opted out of are suppressed.
        if history.status == JobStatus::Completed && !job.notify_on_success() {
            debug!(job_id = job.id, "webhook suppressed: success notifications disabled");
            return;
        }
        if history.status == JobStatus::Failed && !job.notify_on_failure() {
            debug!(job_id = job.id, "webhook suppressed: failure notifications disabled");
            return;
        }

        let payload = payload::webhook_payload(job, history, config);
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                error!(job_id = job.id, error = %e, "failed to serialize webhook payload");
                return;
            }
        };

        let mut request = self
            .client
            .post(&job.webhook_url)
            .timeout(JOB_WEBHOOK_TIMEOUT)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::USER_AGENT, "GoMFT-Webhook/1.0");

        // Extra headers are a JSON object; a blob that fails to parse is
        // silently ignored.
        if !job.webhook_headers.is_empty() {
            if let Ok(serde_json::Value::Object(headers)) =
                serde_json::from_str::<serde_json::Value>(&job.webhook_headers)
            {
                for (key, value) in headers {
                    if let Some(value) = value.as_str() {
                        request = request.header(key, value.to_string());
                    }
                }
            }
        }

        if !job.webhook_secret.is_empty() {
            match sign_sha256_hex(&job.webhook_secret, &body) {
                Ok(signature) => {
                    request = request.header("X-Hub-Signature-256", signature);
                }
                Err(e) => {
                    error!(job_id = job.id, error = %e, "failed to sign webhook payload");
                    return;
                }
            }
        }

        match request.body(body).send().await {
            Ok(response) if response.status().is_success() => {
                info!(job_id = job.id, url = %job.webhook_url, "job webhook delivered");
            }
            Ok(response) => {
                error!(
                    job_id = job.id,
                    url = %job.webhook_url,
                    status = response.status().as_u16(),
                    "job webhook rejected"
                );
            }
            Err(e) => {
                error!(job_id = job.id, url = %job.webhook_url, error = %e, "job webhook failed");
            }
        }
    }

    async fn dispatch_services(&self, job: &Job, history: &JobHistory, config: &TransferConfig) {
        let services = match self.store.get_notification_services(true).await {
            Ok(services) => services,
            Err(e) => {
                error!(error = %e, "failed to load notification services");
                return;
            }
        };
        let event = EventType::from_status(history.status);
        let message = payload::summary_message(job, history);
        let context = payload::service_payload(job, history, config, event, &message);

        for mut service in services {
            if !service.triggers_on(event) {
                continue;
            }
            let result = self.dispatch(&service, &context).await;
            match &result {
                Ok(()) => {
                    service.success_count += 1;
                    debug!(service = %service.name, event = event.as_str(), "notification delivered");
                }
                Err(e) => {
                    service.failure_count += 1;
                    error!(service = %service.name, event = event.as_str(), error = %e, "notification failed");
                }
            }
            service.last_used = Some(Utc::now());
            if let Err(e) = self.store.update_notification_service(&service).await {
                warn!(service = %service.name, error = %e, "failed to persist service counters");
            }
        }
    }

    async fn dispatch(
        &self,
        service: &NotificationService,
        context: &serde_json::Value,
    ) -> Result<(), crate::errors::NotifyError> {
        use crate::models::ServiceType;

        match service.service_type {
            ServiceType::Email => {
                channels::dispatch_email(self.email.as_ref(), service, context).await
            }
            ServiceType::Webhook => {
                channels::dispatch_webhook(&self.client, service, context).await
            }
            ServiceType::Pushbullet => {
                channels::dispatch_pushbullet(&self.client, service, context).await
            }
            ServiceType::Ntfy => channels::dispatch_ntfy(&self.client, service, context).await,
            ServiceType::Gotify => channels::dispatch_gotify(&self.client, service, context).await,
            ServiceType::Pushover => {
                channels::dispatch_pushover(&self.client, service, context).await
            }
        }
    }
}
