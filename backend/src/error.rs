//! Error types for the Mailmerge pipeline.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`CsvError`] - Reading recipient files
//! - [`DeliveryError`] - One recipient's delivery attempt
//! - [`DispatchError`] - Whole-batch rejections
//! - [`StoreError`] - Template store errors
//! - [`ConfigError`] - Environment configuration
//! - [`PipelineError`] - Top-level orchestration errors
//! - [`ServerError`] - HTTP server errors
//!
//! Structural parse problems and validation findings are *not* errors here:
//! they are collected as strings on [`crate::parser::Table`] and
//! [`crate::validation::ValidationReport`] and never abort processing.
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// CSV Errors
// =============================================================================

/// Errors while reading recipient data.
///
/// Parsing itself is total; only getting the bytes can fail.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to decode the file contents.
    #[error("Failed to decode content: {0}")]
    EncodingError(String),

    /// Failed to write CSV text.
    #[error("Failed to write CSV: {0}")]
    WriteError(String),
}

// =============================================================================
// Delivery Errors
// =============================================================================

/// Failure of a single delivery attempt.
///
/// Always recorded on that recipient's [`crate::dispatch::DispatchResult`],
/// never propagated to the batch.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// The delivery service rejected the message.
    #[error("API error: {0}")]
    ApiError(String),

    /// The credential was refused.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Response could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Request timed out.
    #[error("Request timed out")]
    Timeout,

    /// Anything else reported by a delivery implementation.
    #[error("{0}")]
    Other(String),
}

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Batch-level rejections. Raised before any message is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Nothing to send.
    #[error("No messages provided")]
    EmptyBatch,

    /// Over the configured ceiling.
    #[error("Batch of {size} messages exceeds the maximum of {max} per batch")]
    BatchTooLarge { size: usize, max: usize },
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the template store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Template not found.
    #[error("Template not found: {0}")]
    NotFound(String),

    /// Template name is unusable.
    #[error("Invalid template name: {0:?}")]
    InvalidName(String),

    /// IO error.
    #[error("Store IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error.
    #[error("Store JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

// =============================================================================
// Config Errors
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required variable not set.
    #[error("Missing {0} environment variable")]
    MissingEnvVar(String),

    /// Variable set but unparsable.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// This is the main error type returned by [`crate::pipeline::prepare_file`]
/// and [`crate::pipeline::run_batch`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// CSV reading error.
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),

    /// Batch rejected.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Template store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Recipient validation found blocking errors.
    #[error("Recipient validation failed with {} error(s): {}", .0.len(), .0.join("; "))]
    Validation(Vec<String>),
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Single-message delivery failed.
    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or empty bearer token.
    #[error("Not authenticated")]
    Unauthorized,

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for CSV operations.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for a single delivery.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Result type for dispatch operations.
pub type DispatchOutcome<T> = Result<T, DispatchError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
