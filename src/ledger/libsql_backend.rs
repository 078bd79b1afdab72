//! libSQL ledger backend.
//!
//! Single-connection async backend over a local database file (or
//! `:memory:` for tests). Outcome monotonicity is enforced here so no
//! caller can downgrade a terminal entry.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{info, warn};

use crate::error::LedgerError;

use super::migrations;
use super::{Ledger, LedgerEntry, Outcome};

/// libSQL-backed `Ledger`.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlLedger {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlLedger {
    /// Open (or create) a local ledger file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LedgerError::Open(format!("Failed to create ledger directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| LedgerError::Open(format!("Failed to open ledger database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| LedgerError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Ledger opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory ledger (for tests).
    pub async fn new_memory() -> Result<Self, LedgerError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| LedgerError::Open(format!("Failed to create in-memory ledger: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| LedgerError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

#[async_trait]
impl Ledger for LibSqlLedger {
    async fn get(&self, message_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let mut rows = self
            .conn
            .query(
                "SELECT message_id, outcome, attempt_count, last_attempt_at, last_error
                 FROM ledger WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| LedgerError::Query(format!("Failed to query ledger: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| LedgerError::Query(format!("Failed to read ledger row: {e}")))?;

        match row {
            Some(row) => Ok(Some(row_to_entry(&row)?)),
            None => Ok(None),
        }
    }

    async fn has_processed(&self, message_id: &str) -> Result<bool, LedgerError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM ledger
                 WHERE message_id = ?1
                   AND outcome IN ('processed', 'rejected_not_resume', 'skipped')",
                params![message_id],
            )
            .await
            .map_err(|e| LedgerError::Query(format!("Failed to query ledger: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| LedgerError::Query(format!("Failed to read ledger row: {e}")))?;

        match row {
            Some(row) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| LedgerError::Query(format!("Failed to parse count: {e}")))?;
                Ok(count > 0)
            }
            None => Ok(false),
        }
    }

    async fn record_outcome(
        &self,
        message_id: &str,
        outcome: Outcome,
        attempt_count: u32,
        last_error: Option<&str>,
    ) -> Result<(), LedgerError> {
        if let Some(existing) = self.get(message_id).await? {
            // Terminal outcomes are monotonic; a later Failed (or any other
            // different outcome) must not clobber them.
            if existing.outcome.is_terminal() && existing.outcome != outcome {
                warn!(
                    message_id,
                    current = existing.outcome.label(),
                    attempted = outcome.label(),
                    "Ignoring outcome write for terminal ledger entry"
                );
                return Ok(());
            }
        }

        let now = Utc::now().to_rfc3339();
        let last_error: Option<String> = last_error.map(str::to_string);
        self.conn
            .execute(
                "INSERT INTO ledger (message_id, outcome, attempt_count, last_attempt_at, last_error, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(message_id) DO UPDATE SET
                     outcome = excluded.outcome,
                     attempt_count = excluded.attempt_count,
                     last_attempt_at = excluded.last_attempt_at,
                     last_error = excluded.last_error,
                     updated_at = excluded.updated_at",
                params![
                    message_id,
                    outcome.label(),
                    i64::from(attempt_count),
                    now.clone(),
                    last_error,
                    now
                ],
            )
            .await
            .map_err(|e| LedgerError::Query(format!("Failed to record outcome: {e}")))?;
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn row_to_entry(row: &libsql::Row) -> Result<LedgerEntry, LedgerError> {
    let message_id: String = row
        .get(0)
        .map_err(|e| LedgerError::Query(format!("Failed to read message_id: {e}")))?;
    let outcome_str: String = row
        .get(1)
        .map_err(|e| LedgerError::Query(format!("Failed to read outcome: {e}")))?;
    let attempt_count: i64 = row
        .get(2)
        .map_err(|e| LedgerError::Query(format!("Failed to read attempt_count: {e}")))?;
    let last_attempt_str: String = row
        .get(3)
        .map_err(|e| LedgerError::Query(format!("Failed to read last_attempt_at: {e}")))?;
    let last_error: Option<String> = row.get(4).ok();

    Ok(LedgerEntry {
        message_id,
        outcome: str_to_outcome(&outcome_str),
        attempt_count: u32::try_from(attempt_count).unwrap_or(0),
        last_attempt_at: parse_datetime(&last_attempt_str),
        last_error,
    })
}

/// Parse an outcome label from the DB. Unknown strings map to `Failed`,
/// the only retryable state, so a corrupt row can never block retries
/// forever nor fake a terminal outcome.
fn str_to_outcome(s: &str) -> Outcome {
    match s {
        "processed" => Outcome::Processed,
        "rejected_not_resume" => Outcome::RejectedNotResume,
        "skipped" => Outcome::Skipped,
        _ => Outcome::Failed,
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_and_get_roundtrip() {
        let ledger = LibSqlLedger::new_memory().await.unwrap();
        ledger
            .record_outcome("m1", Outcome::Failed, 2, Some("model timeout"))
            .await
            .unwrap();

        let entry = ledger.get("m1").await.unwrap().unwrap();
        assert_eq!(entry.message_id, "m1");
        assert_eq!(entry.outcome, Outcome::Failed);
        assert_eq!(entry.attempt_count, 2);
        assert_eq!(entry.last_error.as_deref(), Some("model timeout"));
        assert!(entry.last_attempt_at > DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn missing_message_is_none() {
        let ledger = LibSqlLedger::new_memory().await.unwrap();
        assert!(ledger.get("nope").await.unwrap().is_none());
        assert!(!ledger.has_processed("nope").await.unwrap());
    }

    #[tokio::test]
    async fn has_processed_covers_terminal_outcomes_only() {
        let ledger = LibSqlLedger::new_memory().await.unwrap();
        ledger
            .record_outcome("done", Outcome::Processed, 0, None)
            .await
            .unwrap();
        ledger
            .record_outcome("invoice", Outcome::RejectedNotResume, 0, None)
            .await
            .unwrap();
        ledger
            .record_outcome("hopeless", Outcome::Skipped, 9, Some("ceiling"))
            .await
            .unwrap();
        ledger
            .record_outcome("flaky", Outcome::Failed, 3, Some("unparseable"))
            .await
            .unwrap();

        assert!(ledger.has_processed("done").await.unwrap());
        assert!(ledger.has_processed("invoice").await.unwrap());
        assert!(ledger.has_processed("hopeless").await.unwrap());
        assert!(!ledger.has_processed("flaky").await.unwrap());
    }

    #[tokio::test]
    async fn recording_same_outcome_twice_is_idempotent() {
        let ledger = LibSqlLedger::new_memory().await.unwrap();
        ledger
            .record_outcome("m1", Outcome::Processed, 0, None)
            .await
            .unwrap();
        ledger
            .record_outcome("m1", Outcome::Processed, 0, None)
            .await
            .unwrap();

        let entry = ledger.get("m1").await.unwrap().unwrap();
        assert_eq!(entry.outcome, Outcome::Processed);
        assert_eq!(entry.attempt_count, 0);
    }

    #[tokio::test]
    async fn terminal_outcome_not_overwritten_by_failed() {
        let ledger = LibSqlLedger::new_memory().await.unwrap();
        ledger
            .record_outcome("m1", Outcome::Processed, 1, None)
            .await
            .unwrap();
        ledger
            .record_outcome("m1", Outcome::Failed, 5, Some("late fault"))
            .await
            .unwrap();

        let entry = ledger.get("m1").await.unwrap().unwrap();
        assert_eq!(entry.outcome, Outcome::Processed);
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(entry.last_error, None);
    }

    #[tokio::test]
    async fn failed_upgrades_to_processed() {
        let ledger = LibSqlLedger::new_memory().await.unwrap();
        ledger
            .record_outcome("m1", Outcome::Failed, 3, Some("unparseable"))
            .await
            .unwrap();
        ledger
            .record_outcome("m1", Outcome::Processed, 3, None)
            .await
            .unwrap();

        let entry = ledger.get("m1").await.unwrap().unwrap();
        assert_eq!(entry.outcome, Outcome::Processed);
    }

    #[tokio::test]
    async fn failed_attempt_metadata_is_last_write_wins() {
        let ledger = LibSqlLedger::new_memory().await.unwrap();
        ledger
            .record_outcome("m1", Outcome::Failed, 3, Some("first pass"))
            .await
            .unwrap();
        ledger
            .record_outcome("m1", Outcome::Failed, 6, Some("second pass"))
            .await
            .unwrap();

        let entry = ledger.get("m1").await.unwrap().unwrap();
        assert_eq!(entry.attempt_count, 6);
        assert_eq!(entry.last_error.as_deref(), Some("second pass"));
    }

    #[tokio::test]
    async fn skipped_is_sticky() {
        let ledger = LibSqlLedger::new_memory().await.unwrap();
        ledger
            .record_outcome("m1", Outcome::Skipped, 9, Some("ceiling reached"))
            .await
            .unwrap();
        ledger
            .record_outcome("m1", Outcome::Failed, 10, None)
            .await
            .unwrap();

        let entry = ledger.get("m1").await.unwrap().unwrap();
        assert_eq!(entry.outcome, Outcome::Skipped);
        assert_eq!(entry.attempt_count, 9);
    }

    #[tokio::test]
    async fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let ledger = LibSqlLedger::new_local(&path).await.unwrap();
            ledger
                .record_outcome("m4", Outcome::Processed, 0, None)
                .await
                .unwrap();
        }

        let reopened = LibSqlLedger::new_local(&path).await.unwrap();
        assert!(reopened.has_processed("m4").await.unwrap());
        assert!(reopened.get("m5").await.unwrap().is_none());
    }
}
