// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the WasenderAPI "send message" endpoint.
//!
//! One call is one request. Throttle responses are reported as
//! [`SendFailure::Throttled`] so the queue can pace the retry.

use std::time::Duration;

use async_trait::async_trait;
use parley_config::model::EgressConfig;
use parley_core::{Identity, MessageSender, ParleyError, SendFailure};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::Serialize;
use tracing::debug;

const SEND_PATH: &str = "/api/send-message";

/// Longest slice of an error body kept in error messages.
const BODY_EXCERPT: usize = 300;

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    to: &'a str,
    text: &'a str,
}

/// Provider client for text messages.
#[derive(Clone)]
pub struct WasenderClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl std::fmt::Debug for WasenderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasenderClient")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl WasenderClient {
    /// Creates a client for `base_url` authenticated with a bearer `token`.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, ParleyError> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|e| ParleyError::Config(format!("invalid egress token header value: {e}")))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ParleyError::Egress {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            url: format!("{}{SEND_PATH}", base_url.trim_end_matches('/')),
            timeout,
        })
    }

    /// Builds the client from `[egress]`; the token is required here.
    pub fn from_config(config: &EgressConfig) -> Result<Self, ParleyError> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ParleyError::Config("egress.token is not set".into()))?;
        Self::new(&config.base_url, token, config.request_timeout())
    }
}

/// HTML in an API error body means the base URL points at a website.
fn looks_like_html(body: &str) -> bool {
    let lower = body.trim_start().to_ascii_lowercase();
    lower.starts_with("<!doctype html") || lower.contains("<html")
}

/// Retry hint from the JSON body (`retry_after`), then the `Retry-After` header.
///
/// Hints too large for a [`Duration`] saturate; the queue caps the wait.
fn retry_after_hint(headers: &HeaderMap, body: &str) -> Option<Duration> {
    let from_body = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| match &v["retry_after"] {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        });
    let from_header = || {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok())
    };
    from_body
        .or_else(from_header)
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT).collect()
}

#[async_trait]
impl MessageSender for WasenderClient {
    fn name(&self) -> &str {
        "wasender"
    }

    async fn send_text(&self, to: &Identity, text: &str) -> Result<(), SendFailure> {
        let response = self
            .client
            .post(&self.url)
            .json(&SendMessageRequest {
                to: to.as_str(),
                text,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ParleyError::Timeout {
                        duration: self.timeout,
                    }
                } else {
                    ParleyError::Egress {
                        message: format!("send-message request failed: {e}"),
                        source: Some(Box::new(e)),
                    }
                }
            })?;

        let status = response.status();
        debug!(status = %status, to = %to, "send-message response received");
        if status.is_success() {
            return Ok(());
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();

        // A 429 is a throttle even when a proxy answers it with an HTML page.
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SendFailure::Throttled {
                retry_after: retry_after_hint(&headers, &body),
            });
        }

        if looks_like_html(&body) {
            return Err(ParleyError::Egress {
                message: format!(
                    "provider returned HTML (status {status}); check egress.base_url points at the API"
                ),
                source: None,
            }
            .into());
        }

        Err(ParleyError::Egress {
            message: format!("send-message failed: {status} {}", excerpt(&body)),
            source: None,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> WasenderClient {
        WasenderClient::new(&server.uri(), "tok-123", Duration::from_secs(5)).unwrap()
    }

    fn to() -> Identity {
        Identity::new("+5215512345678")
    }

    #[tokio::test]
    async fn posts_text_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/send-message"))
            .and(header("authorization", "Bearer tok-123"))
            .and(body_json(serde_json::json!({"to": "+5215512345678", "text": "hola"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).send_text(&to(), "hola").await.unwrap();
    }

    #[tokio::test]
    async fn throttle_hint_read_from_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(serde_json::json!({"message": "slow down", "retry_after": 2}))
                    .insert_header("retry-after", "9"),
            )
            .mount(&server)
            .await;

        match client(&server).send_text(&to(), "hola").await {
            Err(SendFailure::Throttled { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(2)));
            }
            other => panic!("expected throttle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn throttle_hint_falls_back_to_header_then_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let c = client(&server);
        assert!(matches!(
            c.send_text(&to(), "a").await,
            Err(SendFailure::Throttled { retry_after: Some(d) }) if d == Duration::from_secs(3)
        ));
        assert!(matches!(
            c.send_text(&to(), "b").await,
            Err(SendFailure::Throttled { retry_after: None })
        ));
    }

    #[tokio::test]
    async fn oversized_body_hint_saturates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_string(r#"{"retry_after": 1e300}"#)
                    .insert_header("content-type", "application/json"),
            )
            .mount(&server)
            .await;

        match client(&server).send_text(&to(), "hola").await {
            Err(SendFailure::Throttled { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::MAX));
            }
            other => panic!("expected throttle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_header_hint_saturates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1e300"))
            .mount(&server)
            .await;

        match client(&server).send_text(&to(), "hola").await {
            Err(SendFailure::Throttled { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::MAX));
            }
            other => panic!("expected throttle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn html_throttle_page_is_still_a_throttle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_string("<!DOCTYPE html><html><body>Too Many Requests</body></html>")
                    .insert_header("retry-after", "4"),
            )
            .mount(&server)
            .await;

        assert!(matches!(
            client(&server).send_text(&to(), "hola").await,
            Err(SendFailure::Throttled { retry_after: Some(d) }) if d == Duration::from_secs(4)
        ));
    }

    #[test]
    fn hints_are_parsed_without_panicking() {
        let headers = HeaderMap::new();
        assert_eq!(
            retry_after_hint(&headers, r#"{"retry_after": "1.5"}"#),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            retry_after_hint(&headers, r#"{"retry_after": 18446744073709551616}"#),
            Some(Duration::MAX)
        );
        assert_eq!(retry_after_hint(&headers, r#"{"retry_after": -3}"#), None);
        assert_eq!(retry_after_hint(&headers, r#"{"retry_after": "inf"}"#), None);
        assert_eq!(retry_after_hint(&headers, "<html>"), None);
    }

    #[tokio::test]
    async fn html_body_is_misconfiguration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_string("<!DOCTYPE html><html><body>Not Found</body></html>"),
            )
            .mount(&server)
            .await;

        match client(&server).send_text(&to(), "hola").await {
            Err(SendFailure::Failed(e)) => assert!(e.to_string().contains("HTML")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_errors_are_not_throttles() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"message":"bad token"}"#))
            .mount(&server)
            .await;

        match client(&server).send_text(&to(), "hola").await {
            Err(SendFailure::Failed(e)) => {
                assert!(e.to_string().contains("401"));
                assert!(e.to_string().contains("bad token"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn missing_token_is_config_error() {
        let err = WasenderClient::from_config(&EgressConfig::default()).unwrap_err();
        assert!(matches!(err, ParleyError::Config(_)));
    }

    #[test]
    fn debug_hides_token() {
        let c = WasenderClient::new("https://api.example", "secret-token", Duration::from_secs(1))
            .unwrap();
        assert!(!format!("{c:?}").contains("secret-token"));
    }

    #[test]
    fn html_detection() {
        assert!(looks_like_html("  <!doctype html><p>"));
        assert!(looks_like_html("<HTML>"));
        assert!(!looks_like_html(r#"{"error":"x"}"#));
    }
}
