//! Error types for the resume intake daemon.

use std::time::Duration;

/// Top-level error type for the daemon.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Inbox error: {0}")]
    Inbox(#[from] InboxError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Configuration-related errors. Fatal at startup: the daemon refuses to
/// run on a missing or non-positive setting rather than limping along.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Inbox transport errors (IMAP connect/fetch faults).
#[derive(Debug, thiserror::Error)]
pub enum InboxError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("Failed to fetch message {uid}: {reason}")]
    Fetch { uid: String, reason: String },

    #[error("Attachment {handle} is no longer available")]
    AttachmentGone { handle: String },
}

/// Document rendering errors. An unreadable document is not a fault of the
/// pipeline; the classifier treats it as a rejection input.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Unreadable document {filename}: {reason}")]
    Unreadable { filename: String, reason: String },

    #[error("Unsupported attachment type {mime_type} for {filename}")]
    UnsupportedType { filename: String, mime_type: String },
}

/// LLM provider errors (the model transport).
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Structured-extraction errors. Schema checks live in the extractor;
/// retry policy lives in the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Extracted record violates schema: {field}: {message}")]
    SchemaViolation { field: String, message: String },

    #[error("Model output is not parseable as a candidate record: {0}")]
    Unparseable(String),

    #[error("Model transport fault: {0}")]
    Transport(#[from] LlmError),
}

/// Ledger storage errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to open ledger: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Output-sink errors. Retryable: a record is never marked Processed until
/// the sink write has succeeded.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to prepare sink at {path}: {reason}")]
    Create { path: String, reason: String },

    #[error("Failed to append to {path}: {reason}")]
    Append { path: String, reason: String },
}

/// Result type alias for the daemon.
pub type Result<T> = std::result::Result<T, Error>;
