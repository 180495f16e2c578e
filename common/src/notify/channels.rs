// Delivery channel implementations

use super::signing::sign_sha256_hex;
use super::template::{render_template, replace_variables};
use crate::errors::NotifyError;
use crate::models::NotificationService;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const PUSH_TIMEOUT: Duration = Duration::from_secs(10);
const PUSHBULLET_URL: &str = "https://api.pushbullet.com/v2/pushes";
const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";
const NTFY_DEFAULT_SERVER: &str = "https://ntfy.sh";

const DEFAULT_TITLE_TEMPLATE: &str = "GoMFT: {{job.event}} - {{job.name}}";
const DEFAULT_BODY_TEMPLATE: &str = "{{job.message}}";

fn config_value<'a>(service: &'a NotificationService, key: &str) -> Option<&'a str> {
    service
        .config
        .get(key)
        .map(|s| s.as_str())
        .filter(|s| !s.is_empty())
}

fn require<'a>(service: &'a NotificationService, key: &str) -> Result<&'a str, NotifyError> {
    config_value(service, key).ok_or_else(|| NotifyError::MissingField(key.to_string()))
}

fn title_and_body(service: &NotificationService, context: &Value) -> (String, String) {
    let title_template =
        config_value(service, "title_template").unwrap_or(DEFAULT_TITLE_TEMPLATE);
    let body_template = config_value(service, "body_template").unwrap_or(DEFAULT_BODY_TEMPLATE);
    (
        replace_variables(title_template, context),
        replace_variables(body_template, context),
    )
}

fn check_2xx(status: StatusCode, body: String) -> Result<(), NotifyError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(NotifyError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        })
    }
}

// ============================================================================
// Email
// ============================================================================

/// The SMTP send lives outside the core; the channel only validates the
/// service configuration and hands the message over.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(
        &self,
        host: &str,
        port: u16,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError>;
}

/// Default transport that only logs the hand-off.
pub struct LogEmailTransport;

#[async_trait]
impl EmailTransport for LogEmailTransport {
    async fn send(
        &self,
        host: &str,
        port: u16,
        _from: &str,
        to: &str,
        subject: &str,
        _body: &str,
    ) -> Result<(), NotifyError> {
        debug!(host, port, to, subject, "email notification handed to transport");
        Ok(())
    }
}

pub async fn dispatch_email(
    transport: &dyn EmailTransport,
    service: &NotificationService,
    context: &Value,
) -> Result<(), NotifyError> {
    let host = require(service, "smtp_host")?;
    let port_raw = require(service, "smtp_port")?;
    let port: u16 = port_raw
        .parse()
        .map_err(|_| NotifyError::InvalidFieldValue {
            field: "smtp_port".to_string(),
            reason: format!("'{port_raw}' is not a valid port number"),
        })?;
    let from = require(service, "from_email")?;
    let to = require(service, "to_email")?;

    let (subject, body) = title_and_body(service, context);
    transport.send(host, port, from, to, &subject, &body).await
}

// ============================================================================
// Webhook
// ============================================================================

pub async fn dispatch_webhook(
    client: &Client,
    service: &NotificationService,
    context: &Value,
) -> Result<(), NotifyError> {
    let url = require(service, "webhook_url")?;
    let method = config_value(service, "method")
        .and_then(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
        .unwrap_or(Method::POST);

    let payload = service
        .payload_template
        .as_deref()
        .and_then(|template| render_template(template, context))
        .unwrap_or_else(|| context.clone());
    let body = serde_json::to_vec(&payload).map_err(|e| NotifyError::RequestFailed(e.to_string()))?;

    let attempts = service.retry_policy.attempts();
    let timeout = service.retry_policy.timeout();
    let mut last_error = NotifyError::RequestFailed("no attempts made".to_string());

    for attempt in 1..=attempts {
        let mut request = client
            .request(method.clone(), url)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.clone());

        if let Some(headers) = config_value(service, "headers") {
            request = apply_custom_headers(request, headers);
        }
        if !service.secret_key.is_empty() {
            let signature = sign_sha256_hex(&service.secret_key, &body)?;
            request = request.header("X-GoMFT-Signature", signature);
        }

        let result = match request.send().await {
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                check_2xx(status, text)
            }
            Err(e) => Err(NotifyError::RequestFailed(e.to_string())),
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(
                    service = %service.name,
                    attempt,
                    attempts,
                    error = %e,
                    "webhook notification attempt failed"
                );
                last_error = e;
                if attempt < attempts {
                    tokio::time::sleep(service.retry_policy.backoff(attempt)).await;
                }
            }
        }
    }
    Err(last_error)
}

fn apply_custom_headers(
    mut request: reqwest::RequestBuilder,
    headers_json: &str,
) -> reqwest::RequestBuilder {
    // A headers blob that fails to parse is ignored.
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(headers_json) else {
        return request;
    };
    for (key, value) in map {
        let Some(value) = value.as_str() else { continue };
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            request = request.header(name, value);
        }
    }
    request
}

// ============================================================================
// Pushbullet
// ============================================================================

pub async fn dispatch_pushbullet(
    client: &Client,
    service: &NotificationService,
    context: &Value,
) -> Result<(), NotifyError> {
    let api_key = require(service, "api_key")?;
    let (title, body) = title_and_body(service, context);

    let mut push = json!({
        "type": "note",
        "title": title,
        "body": body,
    });
    if let Some(device) = config_value(service, "device_iden") {
        push["device_iden"] = json!(device);
    }

    let response = client
        .post(PUSHBULLET_URL)
        .timeout(PUSH_TIMEOUT)
        .header("Access-Token", api_key)
        .json(&push)
        .send()
        .await
        .map_err(|e| NotifyError::RequestFailed(e.to_string()))?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    check_2xx(status, text)
}

// ============================================================================
// Ntfy
// ============================================================================

pub async fn dispatch_ntfy(
    client: &Client,
    service: &NotificationService,
    context: &Value,
) -> Result<(), NotifyError> {
    let server = config_value(service, "server")
        .unwrap_or(NTFY_DEFAULT_SERVER)
        .trim_end_matches('/');
    let topic = require(service, "topic")?;
    let priority = config_value(service, "priority")
        .and_then(|p| p.parse::<i64>().ok())
        .map(|p| p.clamp(1, 5))
        .unwrap_or(3);
    let (title, message) = title_and_body(service, context);

    let mut request = client
        .post(format!("{server}/{topic}"))
        .timeout(PUSH_TIMEOUT)
        .json(&json!({
            "topic": topic,
            "title": title,
            "message": message,
            "priority": priority,
        }));
    if let Some(username) = config_value(service, "username") {
        request = request.basic_auth(username, config_value(service, "password"));
    }

    let response = request
        .send()
        .await
        .map_err(|e| NotifyError::RequestFailed(e.to_string()))?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    check_2xx(status, text)
}

// ============================================================================
// Gotify
// ============================================================================

pub async fn dispatch_gotify(
    client: &Client,
    service: &NotificationService,
    context: &Value,
) -> Result<(), NotifyError> {
    let url = require(service, "url")?.trim_end_matches('/');
    let token = require(service, "token")?;
    let priority = config_value(service, "priority")
        .and_then(|p| p.parse::<i64>().ok())
        .unwrap_or(5);
    let (title, message) = title_and_body(service, context);

    let response = client
        .post(format!("{url}/message"))
        .timeout(PUSH_TIMEOUT)
        .header("X-Gotify-Key", token)
        .json(&json!({
            "title": title,
            "message": message,
            "priority": priority,
        }))
        .send()
        .await
        .map_err(|e| NotifyError::RequestFailed(e.to_string()))?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    check_2xx(status, text)
}

// ============================================================================
// Pushover
// ============================================================================

pub async fn dispatch_pushover(
    client: &Client,
    service: &NotificationService,
    context: &Value,
) -> Result<(), NotifyError> {
    let token = require(service, "api_token")?;
    let user = require(service, "user_key")?;
    let priority = config_value(service, "priority")
        .and_then(|p| p.parse::<i64>().ok())
        .map(|p| p.clamp(-2, 2))
        .unwrap_or(0);
    let sound = config_value(service, "sound").unwrap_or("pushover");
    let (title, message) = title_and_body(service, context);

    let mut form = vec![
        ("token", token.to_string()),
        ("user", user.to_string()),
        ("title", title),
        ("message", message),
        ("priority", priority.to_string()),
        ("sound", sound.to_string()),
    ];
    if let Some(device) = config_value(service, "device") {
        form.push(("device", device.to_string()));
    }

    let response = client
        .post(PUSHOVER_URL)
        .timeout(PUSH_TIMEOUT)
        .form(&form)
        .send()
        .await
        .map_err(|e| NotifyError::RequestFailed(e.to_string()))?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    interpret_pushover_response(status, text)
}

/// Pushover reports logical failures inside a 2xx response: success requires
/// `status == 1`, otherwise the first element of `errors` is the reason.
fn interpret_pushover_response(status: StatusCode, text: String) -> Result<(), NotifyError> {
    check_2xx(status, text.clone())?;
    let parsed: Value =
        serde_json::from_str(&text).map_err(|e| NotifyError::RequestFailed(e.to_string()))?;
    if parsed.get("status").and_then(Value::as_i64) == Some(1) {
        Ok(())
    } else {
        let reason = parsed
            .get("errors")
            .and_then(Value::as_array)
            .and_then(|errors| errors.first())
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        Err(NotifyError::ProviderRejected(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, RetryPolicy, ServiceType};
    use std::collections::HashMap;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(config: &[(&str, &str)]) -> NotificationService {
        NotificationService {
            id: 1,
            name: "test".to_string(),
            service_type: ServiceType::Webhook,
            is_enabled: true,
            event_triggers: vec![EventType::JobComplete],
            config: config
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            payload_template: None,
            secret_key: String::new(),
            retry_policy: RetryPolicy::None,
            success_count: 0,
            failure_count: 0,
            last_used: None,
        }
    }

    fn context() -> Value {
        json!({
            "event": "Job Completed",
            "job": {"name": "nightly", "event": "Job Completed", "message": "3 files moved"}
        })
    }

    #[tokio::test]
    async fn test_webhook_posts_default_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(body_string_contains("Job Completed"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service(&[("webhook_url", &format!("{}/hook", server.uri()))]);
        let client = Client::new();
        dispatch_webhook(&client, &svc, &context()).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_signs_body_when_secret_set() {
        let server = MockServer::start().await;
        let body = serde_json::to_vec(&context()).unwrap();
        let expected = sign_sha256_hex("shh", &body).unwrap();
        Mock::given(method("POST"))
            .and(header("X-GoMFT-Signature", expected.as_str()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut svc = service(&[("webhook_url", &server.uri())]);
        svc.secret_key = "shh".to_string();
        dispatch_webhook(&Client::new(), &svc, &context())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_custom_headers_and_method() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(header("X-Custom", "yes"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service(&[
            ("webhook_url", &server.uri()),
            ("method", "put"),
            ("headers", r#"{"X-Custom": "yes"}"#),
        ]);
        dispatch_webhook(&Client::new(), &svc, &context())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_garbled_headers_are_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service(&[("webhook_url", &server.uri()), ("headers", "{not json")]);
        dispatch_webhook(&Client::new(), &svc, &context())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_template_overrides_payload() {
        let server = MockServer::start().await;
        Mock::given(body_string_contains("custom nightly"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut svc = service(&[("webhook_url", &server.uri())]);
        svc.payload_template = Some(r#"{"text": "custom {{job.name}}"}"#.to_string());
        dispatch_webhook(&Client::new(), &svc, &context())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_none_policy_does_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service(&[("webhook_url", &server.uri())]);
        let err = dispatch_webhook(&Client::new(), &svc, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::UnexpectedStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_webhook_missing_url() {
        let svc = service(&[]);
        let err = dispatch_webhook(&Client::new(), &svc, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::MissingField(f) if f == "webhook_url"));
    }

    #[tokio::test]
    async fn test_email_validation() {
        let transport = LogEmailTransport;
        let svc = service(&[
            ("smtp_host", "mail.example.com"),
            ("smtp_port", "587"),
            ("from_email", "gomft@example.com"),
            ("to_email", "ops@example.com"),
        ]);
        dispatch_email(&transport, &svc, &context()).await.unwrap();

        let svc = service(&[
            ("smtp_host", "mail.example.com"),
            ("smtp_port", "not-a-port"),
            ("from_email", "gomft@example.com"),
            ("to_email", "ops@example.com"),
        ]);
        let err = dispatch_email(&transport, &svc, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::InvalidFieldValue { field, .. } if field == "smtp_port"));

        let svc = service(&[("smtp_host", "mail.example.com")]);
        let err = dispatch_email(&transport, &svc, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::MissingField(_)));
    }

    #[test]
    fn test_pushover_logical_failure_extracts_first_error() {
        let body = json!({
            "status": 0,
            "errors": ["user identifier is invalid", "second"]
        })
        .to_string();
        let err = interpret_pushover_response(StatusCode::OK, body).unwrap_err();
        assert!(
            matches!(err, NotifyError::ProviderRejected(reason) if reason == "user identifier is invalid")
        );
    }

    #[test]
    fn test_pushover_success_requires_status_one() {
        let ok = json!({"status": 1, "request": "abc"}).to_string();
        interpret_pushover_response(StatusCode::OK, ok).unwrap();

        let err =
            interpret_pushover_response(StatusCode::INTERNAL_SERVER_ERROR, String::new())
                .unwrap_err();
        assert!(matches!(err, NotifyError::UnexpectedStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_ntfy_posts_to_topic_with_priority_clamped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/alerts"))
            .and(body_string_contains("\"priority\":5"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service(&[
            ("server", &server.uri()),
            ("topic", "alerts"),
            ("priority", "9"),
        ]);
        dispatch_ntfy(&Client::new(), &svc, &context()).await.unwrap();
    }

    #[tokio::test]
    async fn test_gotify_posts_message_with_key_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .and(header("X-Gotify-Key", "tok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service(&[("url", &server.uri()), ("token", "tok")]);
        dispatch_gotify(&Client::new(), &svc, &context())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pushbullet_requires_api_key() {
        let svc = service(&[]);
        let err = dispatch_pushbullet(&Client::new(), &svc, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::MissingField(f) if f == "api_key"));
    }
}
