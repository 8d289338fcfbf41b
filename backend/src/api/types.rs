//! REST API request and response bodies.
//!
//! Everything is camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::dispatch::{BatchSummary, DeliveryMode, DispatchResult};
use crate::gmail::BodyFormat;
use crate::parser::{Row, Table};
use crate::personalize::PersonalizedMessage;
use crate::pipeline::CsvInfo;
use crate::store::StoredTemplate;
use crate::template::Template;
use crate::validation::ValidationReport;

/// Response to a recipients upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientsResponse {
    pub csv_info: CsvInfo,
    pub table: Table,
    /// Column used for addresses (given or guessed)
    pub email_column: Option<String>,
    /// Absent when no address column could be determined
    pub validation: Option<ValidationReport>,
}

/// Render a template against rows without sending anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub template: Template,
    pub rows: Vec<Row>,
    pub email_column: String,
    /// Available columns; defaults to the keys of the first row
    #[serde(default)]
    pub headers: Option<Vec<String>>,
}

impl PreviewRequest {
    pub fn columns(&self) -> Vec<String> {
        match &self.headers {
            Some(headers) => headers.clone(),
            None => self
                .rows
                .first()
                .map(|row| row.keys().cloned().collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub messages: Vec<PersonalizedMessage>,
    pub unbound_placeholders: Vec<String>,
    pub unused_columns: Vec<String>,
}

/// A single message sent immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub body_format: BodyFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message_id: String,
}

/// One already-personalized message of a bulk request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEmail {
    #[serde(alias = "to")]
    pub recipient_address: String,
    pub subject: String,
    pub body: String,
}

impl From<BulkEmail> for PersonalizedMessage {
    fn from(email: BulkEmail) -> Self {
        PersonalizedMessage {
            recipient_address: email.recipient_address,
            subject: email.subject,
            body: email.body,
            source_row: Row::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSendRequest {
    pub emails: Vec<BulkEmail>,
    #[serde(default)]
    pub mode: DeliveryMode,
    /// Any value turns the batch into drafts
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body_format: BodyFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSendResponse {
    pub batch_id: String,
    /// Mode actually used after schedule resolution
    pub mode: DeliveryMode,
    pub total: usize,
    pub sent_count: usize,
    pub failed_count: usize,
    pub results: Vec<DispatchResult>,
}

impl BulkSendResponse {
    pub fn new(batch_id: String, mode: DeliveryMode, summary: BatchSummary) -> Self {
        Self {
            batch_id,
            mode,
            total: summary.total,
            sent_count: summary.sent_count,
            failed_count: summary.failed_count,
            results: summary.results,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateListResponse {
    pub templates: Vec<StoredTemplate>,
}

/// Body of `PUT /api/templates/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveTemplateRequest {
    pub template: Template,
}

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
    })
}
