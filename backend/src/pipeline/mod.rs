//! High-level pipeline API: recipients file to dispatched batch.
//!
//! Combines the steps: parsing, validation, personalization and dispatch.
//!
//! # Example
//!
//! ```rust,ignore
//! use mailmerge::pipeline::{prepare_file, send_prepared};
//! use mailmerge::gmail::{GmailClient, GmailDelivery};
//! use mailmerge::{DeliveryMode, DispatchOptions, Template};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let template = Template::new("Hi {{First Name}}", "Dear {{First Name}}, ...");
//!     let prepared = prepare_file("recipients.csv", &template, "Email")?;
//!
//!     let delivery = GmailDelivery::new(GmailClient::new(token), DeliveryMode::Draft);
//!     let summary = send_prepared(&prepared, &delivery, &DispatchOptions::default()).await?;
//!
//!     println!("{} sent, {} failed", summary.sent_count, summary.failed_count);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::api::logs::{log_batch_progress, log_error, log_info, log_info_indent, log_success, log_warning};
use crate::dispatch::{dispatch_with_progress, BatchSummary, Delivery, DispatchOptions};
use crate::error::{PipelineError, PipelineResult};
use crate::parser::{parse_bytes_auto, parse_file_auto, ParseResult, Table};
use crate::personalize::{find_unbound_placeholders, personalize_all, PersonalizedMessage};
use crate::template::Template;
use crate::validation::{validate, ValidationReport};

/// CSV file information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvInfo {
    pub encoding: String,
    pub delimiter: char,
    pub headers: Vec<String>,
    pub row_count: usize,
}

impl CsvInfo {
    pub fn describe(table: &Table, encoding: &str, delimiter: char) -> Self {
        Self {
            encoding: encoding.to_string(),
            delimiter,
            headers: table.headers.clone(),
            row_count: table.rows.len(),
        }
    }
}

/// Everything known about a batch before anything is sent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedBatch {
    pub csv_info: CsvInfo,
    pub table: Table,
    pub report: ValidationReport,
    /// Template placeholders with no matching column
    pub unbound_placeholders: Vec<String>,
    /// One message per row, row order
    pub messages: Vec<PersonalizedMessage>,
}

impl PreparedBatch {
    /// Blocking validation errors stop the batch here.
    pub fn ensure_dispatchable(&self) -> PipelineResult<()> {
        if self.report.is_valid {
            Ok(())
        } else {
            Err(PipelineError::Validation(self.report.errors.clone()))
        }
    }
}

/// Parse, validate and personalize a recipients file.
pub fn prepare_file(
    path: impl AsRef<Path>,
    template: &Template,
    address_column: &str,
) -> PipelineResult<PreparedBatch> {
    let parse_result = parse_file_auto(path)?;
    Ok(prepare(parse_result, template, address_column))
}

/// Same as [`prepare_file`] for uploaded bytes.
pub fn prepare_bytes(bytes: &[u8], template: &Template, address_column: &str) -> PreparedBatch {
    prepare(parse_bytes_auto(bytes), template, address_column)
}

/// Validate and personalize already-parsed recipients.
pub fn prepare(parse_result: ParseResult, template: &Template, address_column: &str) -> PreparedBatch {
    let ParseResult {
        table,
        encoding,
        delimiter,
    } = parse_result;

    log_info("📖 Reading recipients...");
    log_success(format!("Detected encoding: {}", encoding));
    log_success(format!("Detected separator: '{}'", format_delimiter(delimiter)));
    log_success(format!("Read {} rows, {} columns", table.rows.len(), table.headers.len()));
    for err in table.parse_errors.iter().take(5) {
        log_warning(err.clone());
    }

    let csv_info = CsvInfo::describe(&table, &encoding, delimiter);

    log_info(format!("✔️  Validating \"{}\" column...", address_column));
    let report = validate(&table, address_column);
    print_validation_report(&report);

    let unbound_placeholders = find_unbound_placeholders(template, &table.headers);
    if !unbound_placeholders.is_empty() {
        log_warning(format!(
            "Placeholders with no matching column: {}",
            unbound_placeholders.join(", ")
        ));
    }

    let messages = personalize_all(template, &table.rows, address_column);
    log_success(format!("Personalized {} messages", messages.len()));

    PreparedBatch {
        csv_info,
        table,
        report,
        unbound_placeholders,
        messages,
    }
}

/// Dispatch a prepared batch if validation allows it.
pub async fn send_prepared<D>(
    prepared: &PreparedBatch,
    delivery: &D,
    options: &DispatchOptions,
) -> PipelineResult<BatchSummary>
where
    D: Delivery + ?Sized,
{
    prepared.ensure_dispatchable()?;
    let batch_id = Uuid::new_v4().to_string();
    run_batch(&batch_id, &prepared.messages, delivery, options).await
}

/// Dispatch messages, streaming progress to the log broadcaster.
pub async fn run_batch<D>(
    batch_id: &str,
    messages: &[PersonalizedMessage],
    delivery: &D,
    options: &DispatchOptions,
) -> PipelineResult<BatchSummary>
where
    D: Delivery + ?Sized,
{
    log_info(format!(
        "📨 Dispatching batch {} ({} messages, {}ms pacing)...",
        batch_id,
        messages.len(),
        options.pacing_interval.as_millis()
    ));

    let results = dispatch_with_progress(messages, delivery, options, |progress, result| {
        log_batch_progress(batch_id, progress, result);
    })
    .await
    .map_err(|e| {
        log_error(format!("Batch rejected: {}", e));
        e
    })?;

    let summary = BatchSummary::from_results(results);
    if summary.failed_count == 0 {
        log_success(format!("All {} messages delivered", summary.total));
    } else {
        log_warning(format!(
            "{} delivered, {} failed",
            summary.sent_count, summary.failed_count
        ));
    }

    Ok(summary)
}

/// Format delimiter for display
pub fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "TAB".to_string(),
        c => c.to_string(),
    }
}

fn print_validation_report(report: &ValidationReport) {
    if report.is_valid {
        log_success("All recipient addresses valid");
    } else {
        log_error(format!("{} blocking error(s)", report.errors.len()));
        for err in report.errors.iter().take(5) {
            log_info_indent(err.clone(), 1);
        }
    }
    if !report.warnings.is_empty() {
        log_warning(format!("{} warning(s)", report.warnings.len()));
        for warning in report.warnings.iter().take(5) {
            log_info_indent(warning.clone(), 1);
        }
    }
}
