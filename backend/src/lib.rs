//! # Mailmerge - personalized batch email from tabular recipient lists
//!
//! Mailmerge turns a CSV of recipients and a `{{placeholder}}` template into
//! one message per row, then sends (or drafts) them through Gmail with
//! controlled pacing and per-recipient failure reporting.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//! │  CSV File   │──▶│   Parser    │──▶│  Validator  │──▶│ Personalize │──▶│  Dispatch   │
//! │ (ISO/UTF8)  │   │ (auto-enc)  │   │  (emails)   │   │ (template)  │   │ (paced, 1x) │
//! └─────────────┘   └─────────────┘   └─────────────┘   └─────────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mailmerge::{parse, validate, personalize_all, Template};
//!
//! let table = parse("Email,First Name\nann@x.com,Ann\n");
//! assert!(validate(&table, "Email").is_valid);
//!
//! let template = Template::new("Hi {{First Name}}", "Dear {{First Name}}, ...");
//! let messages = personalize_all(&template, &table.rows, "Email");
//! assert_eq!(messages[0].subject, "Hi Ann");
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`parser`] - CSV parsing with auto-detection
//! - [`validation`] - Recipient address checks
//! - [`template`] - Placeholder extraction and substitution
//! - [`personalize`] - One message per recipient row
//! - [`dispatch`] - Paced sequential batch delivery
//! - [`gmail`] - Gmail REST delivery adapter
//! - [`store`] - Named template persistence
//! - [`config`] - Environment configuration
//! - [`pipeline`] - End-to-end orchestration
//! - [`api`] - HTTP API server

// Core modules
pub mod error;
pub mod config;

// Recipients
pub mod parser;
pub mod validation;

// Templates
pub mod template;
pub mod personalize;
pub mod store;

// Delivery
pub mod dispatch;
pub mod gmail;

// Orchestration
pub mod pipeline;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError,
    CsvError,
    DeliveryError,
    DispatchError,
    PipelineError,
    ServerError,
    StoreError,
};

// =============================================================================
// Re-exports - CSV Parsing
// =============================================================================

pub use parser::{
    parse,
    parse_with_delimiter,
    parse_bytes_auto,
    parse_file_auto,
    detect_encoding,
    detect_delimiter,
    delimiter_byte,
    decode_content,
    ParseResult,
    Row,
    Table,
};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{guess_address_column, is_valid_address, validate, ValidationReport};

// =============================================================================
// Re-exports - Templates
// =============================================================================

pub use template::{
    extract_placeholders,
    extract_from_template,
    substitute,
    insert_placeholder,
    text_to_html,
    wrap_in_html_document,
    InsertionTarget,
    Placeholder,
    Template,
};

pub use personalize::{
    personalize,
    personalize_all,
    preview,
    find_unbound_placeholders,
    unused_columns,
    PersonalizedMessage,
};

// =============================================================================
// Re-exports - Dispatch
// =============================================================================

pub use dispatch::{
    dispatch,
    dispatch_with_progress,
    check_batch_size,
    BatchProgress,
    BatchSummary,
    Delivery,
    DeliveryFn,
    DeliveryMode,
    DeliveryReceipt,
    DispatchOptions,
    DispatchResult,
};

pub use gmail::{build_raw_message, BodyFormat, GmailClient, GmailDelivery};

// =============================================================================
// Re-exports - Store, Config, Pipeline
// =============================================================================

pub use store::{FileTemplateStore, StoredTemplate, TemplateStore};

pub use config::Config;

pub use pipeline::{
    prepare,
    prepare_bytes,
    prepare_file,
    run_batch,
    send_prepared,
    CsvInfo,
    PreparedBatch,
};

// Server
pub mod server {
    pub use crate::api::server::start_server;
}
