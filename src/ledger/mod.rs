//! Dedup/state ledger: the durable record of per-message outcomes.
//!
//! The ledger is the single source of truth for "have we handled this
//! message": terminal outcomes survive restarts and must never be
//! re-processed, while `Failed` entries stay eligible until the attempt
//! ceiling is reached. Injected into the orchestrator as a trait so tests
//! can substitute an in-memory database.

mod libsql_backend;
mod migrations;

pub use libsql_backend::LibSqlLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Terminal-or-retryable outcome of processing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A candidate record was written to the sink.
    Processed,
    /// Every attachment was affirmatively judged not-a-resume.
    RejectedNotResume,
    /// Attempts failed; eligible for retry on a later pass.
    Failed,
    /// Attempt ceiling reached; permanently abandoned.
    Skipped,
}

impl Outcome {
    /// Terminal outcomes are never overwritten and never re-processed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Failed)
    }

    /// Short label for logs and storage.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::RejectedNotResume => "rejected_not_resume",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// One ledger row, keyed by `message_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub message_id: String,
    pub outcome: Outcome,
    /// Failed attempt cycles accumulated across all passes.
    pub attempt_count: u32,
    pub last_attempt_at: DateTime<Utc>,
    /// Most recent failure reason, for operator triage.
    pub last_error: Option<String>,
}

/// Durable per-message outcome store.
///
/// `record_outcome` is idempotent for repeated identical outcomes and
/// monotonic for terminal ones: once a message is `Processed`,
/// `RejectedNotResume`, or `Skipped`, a later `Failed` write is ignored.
/// Attempt metadata is last-write-wins.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Look up the entry for a message, if any.
    async fn get(&self, message_id: &str) -> Result<Option<LedgerEntry>, LedgerError>;

    /// True when the message already has a terminal outcome.
    async fn has_processed(&self, message_id: &str) -> Result<bool, LedgerError>;

    /// Record the outcome of an attempt (creating the entry on first sight).
    async fn record_outcome(
        &self,
        message_id: &str,
        outcome: Outcome,
        attempt_count: u32,
        last_error: Option<&str>,
    ) -> Result<(), LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_is_the_only_retryable_outcome() {
        assert!(Outcome::Processed.is_terminal());
        assert!(Outcome::RejectedNotResume.is_terminal());
        assert!(Outcome::Skipped.is_terminal());
        assert!(!Outcome::Failed.is_terminal());
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(Outcome::Processed.label(), "processed");
        assert_eq!(Outcome::RejectedNotResume.label(), "rejected_not_resume");
        assert_eq!(Outcome::Failed.label(), "failed");
        assert_eq!(Outcome::Skipped.label(), "skipped");
    }
}
