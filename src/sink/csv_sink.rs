//! CSV file sink.
//!
//! Appends one row per record to `candidates.csv` / `rejected.csv` under
//! the configured output directory. Headers are written when a file is
//! created (or found empty), every append is flushed before returning,
//! and the blocking file I/O runs on the blocking pool.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::SinkError;
use crate::pipeline::types::{CandidateRecord, RejectionRow};

use super::RecordSink;

const CANDIDATES_FILE: &str = "candidates.csv";
const REJECTIONS_FILE: &str = "rejected.csv";

const CANDIDATE_HEADERS: [&str; 9] = [
    "name",
    "email",
    "phone",
    "skills",
    "experience",
    "summary",
    "status",
    "source_message_id",
    "extracted_at",
];

const REJECTION_HEADERS: [&str; 6] = [
    "recorded_at",
    "message_id",
    "sender",
    "filename",
    "reason",
    "rationale",
];

/// Append-only CSV sink rooted at one output directory.
pub struct CsvSink {
    candidates_path: PathBuf,
    rejections_path: PathBuf,
}

impl CsvSink {
    /// Create the output directory (if needed) and bind the file paths.
    pub fn new(output_dir: &Path) -> Result<Self, SinkError> {
        std::fs::create_dir_all(output_dir).map_err(|e| SinkError::Create {
            path: output_dir.display().to_string(),
            reason: format!("Failed to create output directory: {e}"),
        })?;

        Ok(Self {
            candidates_path: output_dir.join(CANDIDATES_FILE),
            rejections_path: output_dir.join(REJECTIONS_FILE),
        })
    }

    pub fn candidates_path(&self) -> &Path {
        &self.candidates_path
    }

    pub fn rejections_path(&self) -> &Path {
        &self.rejections_path
    }
}

#[async_trait]
impl RecordSink for CsvSink {
    async fn append_row(&self, record: &CandidateRecord) -> Result<(), SinkError> {
        let fields = candidate_fields(record);
        append_on_blocking_pool(self.candidates_path.clone(), &CANDIDATE_HEADERS, fields).await?;
        debug!(
            email = %record.email,
            path = %self.candidates_path.display(),
            "Appended candidate row"
        );
        Ok(())
    }

    async fn append_rejection(&self, row: &RejectionRow) -> Result<(), SinkError> {
        let fields = rejection_fields(row);
        append_on_blocking_pool(self.rejections_path.clone(), &REJECTION_HEADERS, fields).await?;
        debug!(
            message_id = %row.message_id,
            reason = %row.reason,
            "Appended rejection audit row"
        );
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

async fn append_on_blocking_pool(
    path: PathBuf,
    headers: &'static [&'static str],
    fields: Vec<String>,
) -> Result<(), SinkError> {
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || append_record(&path, headers, &fields))
        .await
        .map_err(|e| SinkError::Append {
            path: display,
            reason: format!("Blocking write task failed: {e}"),
        })??;
    Ok(())
}

fn append_record(path: &Path, headers: &[&str], fields: &[String]) -> Result<(), SinkError> {
    // Zero-length files get headers too; a crash between create and the
    // first append must not leave a headerless file forever.
    let needs_headers = match std::fs::metadata(path) {
        Ok(meta) => meta.len() == 0,
        Err(_) => true,
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| append_err(path, format!("Failed to open: {e}")))?;

    let mut writer = csv::Writer::from_writer(file);
    if needs_headers {
        writer
            .write_record(headers)
            .map_err(|e| append_err(path, format!("Failed to write headers: {e}")))?;
    }
    writer
        .write_record(fields)
        .map_err(|e| append_err(path, format!("Failed to write row: {e}")))?;
    writer
        .flush()
        .map_err(|e| append_err(path, format!("Failed to flush: {e}")))?;
    Ok(())
}

fn append_err(path: &Path, reason: String) -> SinkError {
    SinkError::Append {
        path: path.display().to_string(),
        reason,
    }
}

fn candidate_fields(record: &CandidateRecord) -> Vec<String> {
    vec![
        record.name.clone(),
        record.email.clone(),
        record.phone.clone(),
        record.skills.join(", "),
        record.experience.clone(),
        record.summary.clone(),
        record.status.as_str().to_string(),
        record.source_message_id.clone(),
        record.extracted_at.to_rfc3339(),
    ]
}

fn rejection_fields(row: &RejectionRow) -> Vec<String> {
    vec![
        row.recorded_at.to_rfc3339(),
        row.message_id.clone(),
        row.sender.clone(),
        row.filename.clone(),
        row.reason.clone(),
        row.rationale.clone(),
    ]
}
