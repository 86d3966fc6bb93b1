//! Notification gateway
//!
//! Outbound HTML notifications. Production deployments post to an HTTP mail
//! relay; without one configured, notifications are written to the log.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("No recipients given")]
    NoRecipients,

    #[error("Relay request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Relay rejected message (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Capability to deliver an HTML message
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_html(
        &self,
        subject: &str,
        html_body: &str,
        recipients: &[String],
    ) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    subject: &'a str,
    html: &'a str,
    to: &'a [String],
}

/// Posts messages as JSON to an HTTP mail relay
#[derive(Debug, Clone)]
pub struct HttpRelayNotifier {
    relay_url: String,
    client: Client,
}

impl HttpRelayNotifier {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for HttpRelayNotifier {
    async fn send_html(
        &self,
        subject: &str,
        html_body: &str,
        recipients: &[String],
    ) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        let response = self
            .client
            .post(&self.relay_url)
            .json(&RelayMessage {
                subject,
                html: html_body,
                to: recipients,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        tracing::info!("Email sent successfully for the subject: {}", subject);
        Ok(())
    }
}

/// Writes messages to the log instead of delivering them
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_html(
        &self,
        subject: &str,
        html_body: &str,
        recipients: &[String],
    ) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        tracing::info!(
            "Notification '{}' to {} ({} bytes, no relay configured)",
            subject,
            recipients.join(", "),
            html_body.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/send", addr)
    }

    #[tokio::test]
    async fn test_relay_posts_subject_body_and_recipients() {
        let received = Arc::new(Mutex::new(None::<Value>));
        let sink = received.clone();
        let app = Router::new().route(
            "/send",
            post(move |Json(body): Json<Value>| async move {
                *sink.lock().unwrap() = Some(body);
                StatusCode::ACCEPTED
            }),
        );
        let notifier = HttpRelayNotifier::new(serve(app).await);

        notifier
            .send_html("Pipeline Triggered", "<p>hi</p>", &["ops@corp".to_string()])
            .await
            .unwrap();

        let body = received.lock().unwrap().clone().unwrap();
        assert_eq!(body["subject"], "Pipeline Triggered");
        assert_eq!(body["html"], "<p>hi</p>");
        assert_eq!(body["to"][0], "ops@corp");
    }

    #[tokio::test]
    async fn test_relay_error_status_is_reported() {
        let app = Router::new().route("/send", post(|| async { StatusCode::BAD_GATEWAY }));
        let notifier = HttpRelayNotifier::new(serve(app).await);

        let err = notifier
            .send_html("s", "b", &["ops@corp".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Rejected { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_empty_recipient_list_is_refused() {
        let err = LogNotifier.send_html("s", "b", &[]).await.unwrap_err();
        assert!(matches!(err, NotifyError::NoRecipients));
    }
}
