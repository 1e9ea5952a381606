//! Push notifications.
//!
//! Delivery goes through a [`Notifier`]. Requests never wait on it:
//! [`dispatch`] spawns the send after the triggering change has committed and
//! only logs the outcome.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub tokens: Vec<String>,
}

impl PushMessage {
    pub fn invitation(
        challenge_title: &str,
        custom_message: Option<&str>,
        owner_name: &str,
        tokens: Vec<String>,
    ) -> Self {
        let body = match custom_message.filter(|m| !m.trim().is_empty()) {
            Some(message) => message.to_string(),
            None => format!("{} invited you to a challenge!", owner_name),
        };
        Self {
            title: challenge_title.to_string(),
            body,
            tokens,
        }
    }

    pub fn deadline_reminder(challenge_title: &str, tokens: Vec<String>) -> Self {
        Self {
            title: challenge_title.to_string(),
            body: "Your challenge is ending soon. Remember to mark it complete!".to_string(),
            tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub success_count: u32,
    pub failure_count: u32,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<DeliveryReport>;
}

/// Sends nothing; used when no push gateway is configured
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, message: &PushMessage) -> Result<DeliveryReport> {
        debug!(
            "Push gateway not configured, dropping '{}' for {} devices",
            message.title,
            message.tokens.len()
        );
        Ok(DeliveryReport::default())
    }
}

/// Multicast over an HTTP push gateway
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, message: &PushMessage) -> Result<DeliveryReport> {
        let mut request = self.client.post(&self.url).json(message);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Push gateway returned HTTP {}", response.status());
        }
        Ok(response.json().await?)
    }
}

/// Fire-and-forget delivery. Messages without tokens are dropped.
pub fn dispatch(notifier: Arc<dyn Notifier>, message: PushMessage) {
    if message.tokens.is_empty() {
        return;
    }

    tokio::spawn(async move {
        match notifier.send(&message).await {
            Ok(report) => info!(
                "Push '{}': {} delivered, {} failed",
                message.title, report.success_count, report.failure_count
            ),
            Err(e) => warn!("Push '{}' failed: {}", message.title, e),
        }
    });
}


#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_invitation_body() {
        let default = PushMessage::invitation("Gym", None, "Maya", vec![]);
        assert_eq!(default.title, "Gym");
        assert_eq!(default.body, "Maya invited you to a challenge!");

        let custom = PushMessage::invitation("Gym", Some("Leg day!"), "Maya", vec![]);
        assert_eq!(custom.body, "Leg day!");

        let blank = PushMessage::invitation("Gym", Some("  "), "Maya", vec![]);
        assert_eq!(blank.body, "Maya invited you to a challenge!");
    }

    #[tokio::test]
    async fn test_http_notifier_reports_counts() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/push")
                .header("authorization", "Bearer secret")
                .json_body(serde_json::json!({
                    "title": "Gym",
                    "body": "Maya invited you to a challenge!",
                    "tokens": ["a", "b"]
                }));
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"successCount": 1, "failureCount": 1}"#);
        });

        let notifier = HttpNotifier::new(server.url("/push"), Some("secret".to_string())).unwrap();
        let message =
            PushMessage::invitation("Gym", None, "Maya", vec!["a".to_string(), "b".to_string()]);
        let report = notifier.send(&message).await.unwrap();

        mock.assert();
        assert_eq!(
            report,
            DeliveryReport {
                success_count: 1,
                failure_count: 1
            }
        );
    }

    #[tokio::test]
    async fn test_http_notifier_gateway_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/push");
            then.status(503);
        });

        let notifier = HttpNotifier::new(server.url("/push"), None).unwrap();
        let message = PushMessage::deadline_reminder("Gym", vec!["a".to_string()]);
        let err = notifier.send(&message).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_dispatch_skips_empty_token_list() {
        let recorder = Arc::new(testing::RecordingNotifier::default());
        dispatch(recorder.clone(), PushMessage::invitation("Gym", None, "Maya", vec![]));
        dispatch(
            recorder.clone(),
            PushMessage::invitation("Gym", None, "Maya", vec!["t".to_string()]),
        );

        let sent = recorder.wait_for(1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].tokens, vec!["t".to_string()]);
    }
}
