//! Gmail delivery adapter.
//!
//! Implements the delivery capability on top of the Gmail REST API using an
//! OAuth access token obtained elsewhere.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mailmerge::gmail::{GmailClient, GmailDelivery};
//! use mailmerge::{dispatch, DeliveryMode, DispatchOptions};
//!
//! let client = GmailClient::new(access_token);
//! let delivery = GmailDelivery::new(client, DeliveryMode::Draft);
//! let results = dispatch(&messages, &delivery, &DispatchOptions::default()).await?;
//! ```
//!
//! Both modes post an RFC 2822 message, base64url-encoded, to
//! `users/me/messages/send` (now) or `users/me/drafts` (draft). Gmail has no
//! API for scheduled send, so drafts are the "later" option.

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::dispatch::{Delivery, DeliveryMode, DeliveryReceipt};
use crate::error::{DeliveryError, DeliveryResult};
use crate::personalize::PersonalizedMessage;
use crate::template::{text_to_html, wrap_in_html_document};

/// Public Gmail REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Gmail response for messages.send and drafts.create
#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: Option<String>,
}

/// Gmail error response
#[derive(Debug, Deserialize)]
struct GmailErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Gmail API client bound to one access token.
#[derive(Clone)]
pub struct GmailClient {
    access_token: String,
    api_base: String,
    http: reqwest::Client,
}

impl GmailClient {
    /// Create a new client with an explicit access token
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            http: build_http_client(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }

    /// Point the client at another endpoint (proxies, tests)
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = build_http_client(timeout);
        self
    }

    /// Send a message immediately. Returns the Gmail message id.
    pub async fn send_now(&self, to: &str, subject: &str, html_body: &str) -> DeliveryResult<String> {
        let raw = build_raw_message(to, subject, html_body, None);
        self.post("users/me/messages/send", json!({ "raw": raw })).await
    }

    /// Store a message as a draft. Returns the Gmail draft id.
    pub async fn save_as_draft(&self, to: &str, subject: &str, html_body: &str) -> DeliveryResult<String> {
        let raw = build_raw_message(to, subject, html_body, None);
        self.post("users/me/drafts", json!({ "message": { "raw": raw } }))
            .await
    }

    async fn post(&self, path: &str, body: Value) -> DeliveryResult<String> {
        let url = format!("{}/{}", self.api_base, path);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let text = response.text().await.map_err(request_error)?;

        if !status.is_success() {
            let message = serde_json::from_str::<GmailErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}: {}", status, text));

            return Err(if status == reqwest::StatusCode::UNAUTHORIZED {
                DeliveryError::Unauthorized(message)
            } else {
                DeliveryError::ApiError(message)
            });
        }

        let created: CreatedResponse =
            serde_json::from_str(&text).map_err(|e| DeliveryError::InvalidResponse(e.to_string()))?;

        created
            .id
            .ok_or_else(|| DeliveryError::InvalidResponse("missing id".to_string()))
    }
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

fn request_error(e: reqwest::Error) -> DeliveryError {
    if e.is_timeout() {
        DeliveryError::Timeout
    } else {
        DeliveryError::RequestFailed(e.to_string())
    }
}

/// How message bodies are handed to Gmail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    /// Plain text: escaped, line breaks kept, wrapped in the default document
    #[default]
    Text,
    /// Already HTML: sent as-is
    Html,
}

impl BodyFormat {
    pub fn render(self, body: &str) -> String {
        match self {
            BodyFormat::Text => wrap_in_html_document(&text_to_html(body)),
            BodyFormat::Html => body.to_string(),
        }
    }
}

/// [`Delivery`] bound to a Gmail client and a mode.
#[derive(Clone)]
pub struct GmailDelivery {
    client: GmailClient,
    mode: DeliveryMode,
    body_format: BodyFormat,
}

impl GmailDelivery {
    pub fn new(client: GmailClient, mode: DeliveryMode) -> Self {
        Self {
            client,
            mode,
            body_format: BodyFormat::default(),
        }
    }

    pub fn with_body_format(mut self, body_format: BodyFormat) -> Self {
        self.body_format = body_format;
        self
    }
}

#[async_trait]
impl Delivery for GmailDelivery {
    async fn deliver(&self, message: &PersonalizedMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let html = self.body_format.render(&message.body);
        let to = &message.recipient_address;

        let id = match self.mode {
            DeliveryMode::Now => self.client.send_now(to, &message.subject, &html).await?,
            DeliveryMode::Draft => {
                self.client
                    .save_as_draft(to, &message.subject, &html)
                    .await?
            }
        };

        Ok(DeliveryReceipt::with_id(id))
    }
}

/// Build an RFC 2822 HTML message and base64url-encode it (no padding).
///
/// Header values are stripped of line breaks; a non-ASCII subject is
/// RFC 2047 encoded.
pub fn build_raw_message(to: &str, subject: &str, html_body: &str, from: Option<&str>) -> String {
    let mut lines = Vec::with_capacity(6);

    if let Some(from) = from {
        lines.push(format!("From: {}", header_value(from)));
    }
    lines.push(format!("To: {}", header_value(to)));
    lines.push(format!("Subject: {}", encode_subject(&header_value(subject))));
    lines.push("MIME-Version: 1.0".to_string());
    lines.push("Content-Type: text/html; charset=\"UTF-8\"".to_string());
    lines.push(String::new());
    lines.push(html_body.to_string());

    URL_SAFE_NO_PAD.encode(lines.join("\r\n"))
}

fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn encode_subject(subject: &str) -> String {
    if subject.is_ascii() {
        subject.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> String {
        String::from_utf8(URL_SAFE_NO_PAD.decode(raw).unwrap()).unwrap()
    }

    #[test]
    fn test_raw_message_layout() {
        let raw = build_raw_message("ann@x.com", "Hi Ann", "<p>Hello</p>", None);
        let text = decode(&raw);

        assert_eq!(
            text,
            "To: ann@x.com\r\nSubject: Hi Ann\r\nMIME-Version: 1.0\r\n\
             Content-Type: text/html; charset=\"UTF-8\"\r\n\r\n<p>Hello</p>"
        );
    }

    #[test]
    fn test_raw_message_is_url_safe_without_padding() {
        let raw = build_raw_message("a@x.com", "??>>??", "ÿÿÿ>>>", Some("me@x.com"));

        assert!(!raw.contains('+'));
        assert!(!raw.contains('/'));
        assert!(!raw.ends_with('='));
        assert!(decode(&raw).starts_with("From: me@x.com\r\nTo: a@x.com"));
    }

    #[test]
    fn test_header_injection_stripped() {
        let text = decode(&build_raw_message("a@x.com\r\nBcc: evil@x.com", "S", "B", None));
        assert!(text.starts_with("To: a@x.com  Bcc: evil@x.com\r\n"));
    }

    #[test]
    fn test_non_ascii_subject_encoded() {
        let text = decode(&build_raw_message("a@x.com", "Café", "B", None));
        assert!(text.contains("Subject: =?UTF-8?B?Q2Fmw6k=?="));
    }

    #[test]
    fn test_body_format_render() {
        assert_eq!(BodyFormat::Html.render("<b>x</b>"), "<b>x</b>");

        let html = BodyFormat::Text.render("a < b\nc");
        assert!(html.contains("a &lt; b<br>c"));
        assert!(html.starts_with("<!DOCTYPE html>"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_failure() {
        // Port 9 (discard) on localhost is closed on test machines
        let client = GmailClient::new("token")
            .with_api_base("http://127.0.0.1:9/gmail/v1")
            .with_timeout(Duration::from_secs(2));

        let err = client.send_now("a@x.com", "S", "B").await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::RequestFailed(_) | DeliveryError::Timeout
        ));
    }

    /// Local stand-in for the Gmail API; returns its base URL.
    async fn mock_gmail() -> String {
        use axum::{http::StatusCode, routing::post, Json, Router};

        let app = Router::new()
            .route(
                "/gmail/v1/users/me/messages/send",
                post(|Json(body): Json<Value>| async move {
                    match body["raw"].as_str() {
                        Some(_) => (
                            StatusCode::UNAUTHORIZED,
                            r#"{"error":{"code":401,"message":"Invalid Credentials"}}"#,
                        ),
                        None => (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded"),
                    }
                }),
            )
            .route(
                "/gmail/v1/users/me/drafts",
                post(|Json(body): Json<Value>| async move {
                    if body["message"]["raw"].as_str().is_some_and(|raw| !raw.is_empty()) {
                        (StatusCode::OK, r#"{"id":"r-1","message":{"id":"m-1"}}"#)
                    } else {
                        (StatusCode::BAD_REQUEST, "no raw")
                    }
                }),
            )
            .route(
                "/other/v1/users/me/drafts",
                post(|| async { (StatusCode::OK, r#"{"message":{"id":"m-2"}}"#) }),
            )
            .route(
                "/other/v1/users/me/messages/send",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded") }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_server_responses_map_to_delivery_errors() {
        let base = mock_gmail().await;
        let gmail = GmailClient::new("expired").with_api_base(&format!("{}/gmail/v1", base));
        let other = GmailClient::new("token").with_api_base(&format!("{}/other/v1/", base));

        let err = gmail.send_now("a@x.com", "S", "B").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Unauthorized(ref m) if m == "Invalid Credentials"));

        let id = gmail.save_as_draft("a@x.com", "S", "B").await.unwrap();
        assert_eq!(id, "r-1");

        let err = other.send_now("a@x.com", "S", "B").await.unwrap_err();
        match err {
            DeliveryError::ApiError(message) => {
                assert!(message.starts_with("HTTP 500"));
                assert!(message.ends_with("upstream exploded"));
            }
            other => panic!("expected API error, got {:?}", other),
        }

        let err = other.save_as_draft("a@x.com", "S", "B").await.unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidResponse(ref m) if m == "missing id"));
    }

}
