//! Output sinks for accepted candidates and rejection audit rows.

mod csv_sink;

pub use csv_sink::CsvSink;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::pipeline::types::{CandidateRecord, RejectionRow};

/// Append-only destination for pipeline output.
///
/// The orchestrator appends a row and only then marks the message
/// terminal in the ledger, so a sink failure keeps the message
/// retryable. Implementations must tolerate duplicate appends of the
/// same record after a crash between write and mark.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Append one accepted candidate.
    async fn append_row(&self, record: &CandidateRecord) -> Result<(), SinkError>;

    /// Append one rejection audit row.
    async fn append_rejection(&self, row: &RejectionRow) -> Result<(), SinkError>;
}
