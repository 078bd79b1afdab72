//! Shared types for the intake pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Inbound message ─────────────────────────────────────────────────

/// A candidate-application message pulled from the inbox.
///
/// The inbox adapter converts its native format into this struct; the
/// orchestrator drives each attachment through classify → extract.
/// Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique, stable ID (transport-native or generated UUID). The dedup key.
    pub message_id: String,
    /// Subject line.
    pub subject: String,
    /// Sender address, kept for the rejection audit trail.
    pub sender: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
    /// Attachments, in the order the message carried them.
    pub attachments: Vec<AttachmentRef>,
}

/// Reference to one attachment of an inbound message.
///
/// Holds metadata only; the bytes are pulled through
/// `InboxSource::fetch_attachment` for the duration of one processing
/// attempt and dropped afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Original filename as sent.
    pub filename: String,
    /// MIME type as declared by the message (may lie; rendering decides).
    pub mime_type: String,
    /// Opaque handle the inbox adapter resolves to raw bytes.
    pub handle: String,
}

// ── Classification ──────────────────────────────────────────────────

/// Why a document was rejected by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The model judged it a non-resume (invoice, cover letter, ...).
    NotAResume,
    /// Text could not be rendered or was blank.
    Unreadable,
    /// The message carried nothing to classify.
    Empty,
}

impl RejectReason {
    /// Short label for logs and the rejection audit trail.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotAResume => "not_a_resume",
            Self::Unreadable => "unreadable",
            Self::Empty => "empty",
        }
    }
}

/// Verdict on one rendered document.
#[derive(Debug, Clone)]
pub struct Classification {
    pub is_resume: bool,
    /// Model rationale (document type + reasoning), for logs and audit rows.
    pub rationale: String,
    /// Set when `is_resume` is false.
    pub reject_reason: Option<RejectReason>,
}

impl Classification {
    pub fn accepted(rationale: impl Into<String>) -> Self {
        Self {
            is_resume: true,
            rationale: rationale.into(),
            reject_reason: None,
        }
    }

    pub fn rejected(reason: RejectReason, rationale: impl Into<String>) -> Self {
        Self {
            is_resume: false,
            rationale: rationale.into(),
            reject_reason: Some(reason),
        }
    }
}

// ── Candidate record ────────────────────────────────────────────────

/// Review status of an extracted candidate. Every new record starts as
/// `New`; later transitions belong to whoever consumes the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateStatus {
    #[default]
    New,
    Reviewed,
    Rejected,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Reviewed => "Reviewed",
            Self::Rejected => "Rejected",
        }
    }
}

/// The validated output unit: one row per accepted resume.
///
/// `name`, `email`, and `summary` are never empty — the extractor fails
/// instead of emitting a partial record. `phone`, `skills`, and
/// `experience` are best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub name: String,
    pub email: String,
    /// Best-effort; empty string when the resume lists none.
    #[serde(default)]
    pub phone: String,
    /// Top skills, in resume order.
    pub skills: Vec<String>,
    /// Free-form experience descriptor ("5 years", "fresher", ...).
    pub experience: String,
    /// 1-3 sentence generated synopsis.
    pub summary: String,
    pub status: CandidateStatus,
    /// Back-reference to the `InboundMessage` this was extracted from.
    pub source_message_id: String,
    pub extracted_at: DateTime<Utc>,
}

// ── Rejection audit ─────────────────────────────────────────────────

/// One row of the rejection audit trail (messages that terminated as
/// `RejectedNotResume`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionRow {
    pub recorded_at: DateTime<Utc>,
    pub message_id: String,
    pub sender: String,
    /// Filename of the last attachment inspected; empty when the message
    /// had none.
    pub filename: String,
    pub reason: String,
    pub rationale: String,
}

// ── Pass summary ────────────────────────────────────────────────────

/// Counters for one orchestration pass, for logging and tests.
#[derive(Debug, Clone)]
pub struct PassSummary {
    /// Correlates all log lines of one pass.
    pub pass_id: Uuid,
    /// Messages the inbox returned for this pass.
    pub fetched: usize,
    /// Messages that produced a candidate record.
    pub accepted: usize,
    /// Messages terminally rejected as not-a-resume.
    pub rejected: usize,
    /// Messages that failed and stay eligible for the next pass.
    pub failed: usize,
    /// Messages permanently skipped this pass (attempt ceiling reached).
    pub skipped: usize,
    /// True when shutdown interrupted the pass before all messages ran.
    pub interrupted: bool,
}

impl PassSummary {
    pub fn new(pass_id: Uuid, fetched: usize) -> Self {
        Self {
            pass_id,
            fetched,
            accepted: 0,
            rejected: 0,
            failed: 0,
            skipped: 0,
            interrupted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_defaults_to_new() {
        assert_eq!(CandidateStatus::default(), CandidateStatus::New);
        assert_eq!(CandidateStatus::default().as_str(), "New");
    }

    #[test]
    fn reject_reason_labels() {
        assert_eq!(RejectReason::NotAResume.label(), "not_a_resume");
        assert_eq!(RejectReason::Unreadable.label(), "unreadable");
        assert_eq!(RejectReason::Empty.label(), "empty");
    }

    #[test]
    fn classification_constructors() {
        let ok = Classification::accepted("looks like a resume");
        assert!(ok.is_resume);
        assert!(ok.reject_reason.is_none());

        let no = Classification::rejected(RejectReason::NotAResume, "invoice");
        assert!(!no.is_resume);
        assert_eq!(no.reject_reason, Some(RejectReason::NotAResume));
    }

    #[test]
    fn candidate_record_serializes_status_by_name() {
        let record = CandidateRecord {
            name: "Rahul Kumar".into(),
            email: "rahul@email.com".into(),
            phone: String::new(),
            skills: vec!["Rust".into(), "SQL".into()],
            experience: "3 years".into(),
            summary: "Backend engineer with systems focus.".into(),
            status: CandidateStatus::New,
            source_message_id: "m-1".into(),
            extracted_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "New");
        assert_eq!(json["skills"][0], "Rust");
    }

    #[test]
    fn pass_summary_starts_clean() {
        let summary = PassSummary::new(Uuid::new_v4(), 7);
        assert_eq!(summary.fetched, 7);
        assert_eq!(summary.accepted, 0);
        assert!(!summary.interrupted);
    }
}
