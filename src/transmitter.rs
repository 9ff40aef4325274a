//! Outbound alert transmission.
//!
//! One POST per call, one classification per attempt. Retrying is the
//! control loop's business (in practice: the operator pressing again or
//! connectivity coming back), so nothing here loops.

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;

use crate::constants::HTTP_REQUEST_TIMEOUT;

/// Result of one transmission attempt. Not persisted anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// The push service accepted the alert (HTTP 200).
    Delivered,
    /// The push service answered with a non-200 status.
    Rejected(u16),
    /// DNS/TLS/connection-level failure before any status arrived.
    TransportError,
}

/// The seam the control loop transmits through.
pub trait AlertTransmit: Send {
    /// Send one alert and classify what happened.
    fn send_alert(&self) -> AlertOutcome;
}

/// POSTs the fixed alarm payload to the push endpoint over TLS.
pub struct AlertTransmitter {
    client: Client,
    url: String,
    server_key: String,
    topic: String,
}

impl std::fmt::Debug for AlertTransmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertTransmitter")
            .field("url", &self.url)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl AlertTransmitter {
    /// Build a transmitter for `https://<push_host>/fcm/send`.
    pub fn new(
        push_host: &str,
        server_key: impl Into<String>,
        topic: impl Into<String>,
    ) -> Result<Self> {
        Self::with_url(format!("https://{push_host}/fcm/send"), server_key, topic)
    }

    /// Build against an explicit endpoint URL (tests point this at a local
    /// mock server).
    pub fn with_url(
        url: String,
        server_key: impl Into<String>,
        topic: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .context("failed to create HTTP client for alert transmitter")?;

        Ok(Self {
            client,
            url,
            server_key: server_key.into(),
            topic: topic.into(),
        })
    }
}

impl AlertTransmit for AlertTransmitter {
    fn send_alert(&self) -> AlertOutcome {
        let payload = serde_json::json!({
            "to": format!("/topics/{}", self.topic),
            "data": { "message": "ALARM" },
        });

        match self
            .client
            .post(&self.url)
            .header("Authorization", format!("key={}", self.server_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
        {
            Ok(response) if response.status() == StatusCode::OK => {
                if let Ok(body) = response.text() {
                    log::debug!("Push endpoint answered: {body}");
                }
                AlertOutcome::Delivered
            }
            Ok(response) => AlertOutcome::Rejected(response.status().as_u16()),
            Err(e) => {
                log::warn!("Alert transmission failed before a response: {e}");
                AlertOutcome::TransportError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// The blocking client must be built and driven off the async runtime.
    async fn send_via(url: String) -> AlertOutcome {
        tokio::task::spawn_blocking(move || {
            let transmitter =
                AlertTransmitter::with_url(url, "test-key", "medical_alert").unwrap();
            transmitter.send_alert()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_delivered_on_200_with_expected_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fcm/send"))
            .and(header("Authorization", "key=test-key"))
            .and(header("Content-Type", "application/json"))
            .and(body_json(serde_json::json!({
                "to": "/topics/medical_alert",
                "data": { "message": "ALARM" },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"message_id\":1}"))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = send_via(format!("{}/fcm/send", server.uri())).await;
        assert_eq!(outcome, AlertOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_rejected_carries_the_status_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fcm/send"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let outcome = send_via(format!("{}/fcm/send", server.uri())).await;
        assert_eq!(outcome, AlertOutcome::Rejected(500));
    }

    #[tokio::test]
    async fn test_auth_failure_is_rejected_not_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fcm/send"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let outcome = send_via(format!("{}/fcm/send", server.uri())).await;
        assert_eq!(outcome, AlertOutcome::Rejected(401));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_transport_error() {
        // Nothing listens on port 9; connection is refused immediately.
        let outcome = send_via("http://127.0.0.1:9/fcm/send".to_string()).await;
        assert_eq!(outcome, AlertOutcome::TransportError);
    }
}
