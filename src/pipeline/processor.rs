//! Intake processor — drives one poll pass over the inbox.
//!
//! **Core invariant: at most one resolution per message.** The ledger is
//! consulted before any model call and written before a message is
//! considered done; the candidate row is appended before the terminal
//! mark so a crash can duplicate a row but never lose one.
//!
//! Flow per message:
//! 1. Ledger gate (terminal entries are never reprocessed)
//! 2. Per attachment: fetch → render → classify → extract → append
//! 3. Failed cycles retry with jittered exponential backoff, bounded
//!    per pass and by a cross-pass ceiling
//! 4. Outcome recorded: Processed / RejectedNotResume / Failed / Skipped

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::IntakeConfig;
use crate::error::Result;
use crate::inbox::InboxSource;
use crate::ledger::{Ledger, Outcome};
use crate::pipeline::classifier::DocumentClassifier;
use crate::pipeline::extractor::CandidateExtractor;
use crate::pipeline::types::{
    AttachmentRef, InboundMessage, PassSummary, RejectReason, RejectionRow,
};
use crate::render;
use crate::sink::RecordSink;

/// Growth cap for the backoff ladder: base, 2x, 4x, then flat.
const BACKOFF_MAX_SHIFT: u32 = 2;

/// Outcome of one processing cycle over a single attachment.
enum CycleOutcome {
    /// Candidate row appended; the message is done.
    Accepted,
    /// The attachment is not a usable resume; try the next one.
    Rejected {
        reason: RejectReason,
        rationale: String,
    },
    /// Something faulted; consumes one attempt and may retry.
    Faulted { error: String },
}

/// The orchestrator: owns one poll pass end to end.
///
/// Collaborators come in as trait objects so tests can script them.
/// The checkpoint lives here (not in the ledger) because it is a fetch
/// optimization, not a correctness boundary — the ledger gate alone
/// guarantees dedup.
pub struct IntakeProcessor {
    inbox: Arc<dyn InboxSource>,
    classifier: DocumentClassifier,
    extractor: CandidateExtractor,
    ledger: Arc<dyn Ledger>,
    sink: Arc<dyn RecordSink>,
    config: IntakeConfig,
    checkpoint: Mutex<Option<DateTime<Utc>>>,
}

impl IntakeProcessor {
    pub fn new(
        inbox: Arc<dyn InboxSource>,
        classifier: DocumentClassifier,
        extractor: CandidateExtractor,
        ledger: Arc<dyn Ledger>,
        sink: Arc<dyn RecordSink>,
        config: IntakeConfig,
    ) -> Self {
        Self {
            inbox,
            classifier,
            extractor,
            ledger,
            sink,
            config,
            checkpoint: Mutex::new(None),
        }
    }

    /// Current fetch checkpoint (None until the first pass completes).
    pub async fn checkpoint(&self) -> Option<DateTime<Utc>> {
        *self.checkpoint.lock().await
    }

    /// Run one intake pass: list, gate, process, record, advance checkpoint.
    ///
    /// Messages are processed sequentially; one message's failure never
    /// halts the pass. The shutdown flag is observed between messages —
    /// the in-flight message always runs to a recorded outcome.
    pub async fn run_pass(&self, shutdown: &AtomicBool) -> Result<PassSummary> {
        let pass_id = Uuid::new_v4();
        let pass_started = Utc::now();
        let since = *self.checkpoint.lock().await;

        let messages = self
            .inbox
            .list_new_messages(&self.config.subject_filter, since)
            .await?;
        let mut summary = PassSummary::new(pass_id, messages.len());
        info!(
            pass_id = %pass_id,
            fetched = messages.len(),
            since = ?since,
            "Intake pass started"
        );

        // Oldest received_at among messages still unresolved when the pass
        // ends; the next SINCE window must not slide past them.
        let mut oldest_unresolved: Option<DateTime<Utc>> = None;

        for (index, message) in messages.iter().enumerate() {
            if shutdown.load(Ordering::Relaxed) {
                info!(
                    pass_id = %pass_id,
                    remaining = messages.len() - index,
                    "Shutdown requested, interrupting pass"
                );
                summary.interrupted = true;
                for unread in &messages[index..] {
                    note_unresolved(&mut oldest_unresolved, unread.received_at);
                }
                break;
            }

            let entry = match self.ledger.get(&message.message_id).await {
                Ok(entry) => entry,
                Err(e) => {
                    error!(
                        message_id = %message.message_id,
                        error = %e,
                        "Ledger lookup failed, leaving message for next pass"
                    );
                    summary.failed += 1;
                    note_unresolved(&mut oldest_unresolved, message.received_at);
                    continue;
                }
            };

            if let Some(ref entry) = entry {
                if entry.outcome.is_terminal() {
                    debug!(
                        message_id = %message.message_id,
                        outcome = entry.outcome.label(),
                        "Already resolved, skipping"
                    );
                    continue;
                }
                // A crash can leave a Failed entry sitting at the ceiling.
                if entry.attempt_count >= self.config.max_attempts {
                    error!(
                        message_id = %message.message_id,
                        attempts = entry.attempt_count,
                        "Attempt ceiling already reached, permanently skipping message"
                    );
                    let outcome = self
                        .record(
                            &message.message_id,
                            Outcome::Skipped,
                            entry.attempt_count,
                            entry.last_error.as_deref(),
                        )
                        .await;
                    tally(&mut summary, outcome);
                    if !outcome.is_terminal() {
                        note_unresolved(&mut oldest_unresolved, message.received_at);
                    }
                    continue;
                }
            }

            let prior_attempts = entry.map(|e| e.attempt_count).unwrap_or(0);
            let outcome = self
                .process_message(pass_id, message, prior_attempts, shutdown)
                .await;
            tally(&mut summary, outcome);
            if !outcome.is_terminal() {
                note_unresolved(&mut oldest_unresolved, message.received_at);
            }
        }

        let new_checkpoint = oldest_unresolved.unwrap_or(pass_started);
        *self.checkpoint.lock().await = Some(new_checkpoint);

        info!(
            pass_id = %pass_id,
            fetched = summary.fetched,
            accepted = summary.accepted,
            rejected = summary.rejected,
            failed = summary.failed,
            skipped = summary.skipped,
            interrupted = summary.interrupted,
            checkpoint = %new_checkpoint,
            "Intake pass complete"
        );
        Ok(summary)
    }

    /// Drive one message to a recorded outcome. Never errors: every
    /// failure path degrades to a `Failed` (retryable) resolution.
    async fn process_message(
        &self,
        pass_id: Uuid,
        message: &InboundMessage,
        prior_attempts: u32,
        shutdown: &AtomicBool,
    ) -> Outcome {
        info!(
            pass_id = %pass_id,
            message_id = %message.message_id,
            sender = %message.sender,
            attachments = message.attachments.len(),
            prior_attempts,
            "Processing message"
        );

        if message.attachments.is_empty() {
            return self
                .finish_rejected(
                    message,
                    prior_attempts,
                    String::new(),
                    RejectReason::Empty,
                    "message carried no attachments".to_string(),
                )
                .await;
        }

        // Failed cycles this pass, shared across attachments.
        let mut failures: u32 = 0;
        let mut last_error: Option<String> = None;
        let mut last_rejection: Option<(String, RejectReason, String)> = None;

        'attachments: for attachment in &message.attachments {
            loop {
                match self.run_cycle(message, attachment).await {
                    CycleOutcome::Accepted => {
                        return self
                            .record(
                                &message.message_id,
                                Outcome::Processed,
                                prior_attempts + failures,
                                None,
                            )
                            .await;
                    }
                    CycleOutcome::Rejected { reason, rationale } => {
                        debug!(
                            message_id = %message.message_id,
                            filename = %attachment.filename,
                            reason = reason.label(),
                            "Attachment rejected"
                        );
                        last_rejection = Some((attachment.filename.clone(), reason, rationale));
                        continue 'attachments;
                    }
                    CycleOutcome::Faulted { error: fault } => {
                        failures += 1;
                        let total = prior_attempts + failures;
                        warn!(
                            message_id = %message.message_id,
                            filename = %attachment.filename,
                            attempt = failures,
                            total_attempts = total,
                            error = %fault,
                            "Processing cycle failed"
                        );
                        last_error = Some(fault);

                        if total >= self.config.max_attempts {
                            error!(
                                message_id = %message.message_id,
                                attempts = total,
                                last_error = ?last_error,
                                "Attempt ceiling reached, permanently skipping message"
                            );
                            return self
                                .record(
                                    &message.message_id,
                                    Outcome::Skipped,
                                    total,
                                    last_error.as_deref(),
                                )
                                .await;
                        }
                        if failures >= self.config.max_retries {
                            break 'attachments;
                        }
                        // A requested shutdown ends the retry ladder early;
                        // the Failed record keeps the message eligible.
                        if shutdown.load(Ordering::Relaxed) {
                            break 'attachments;
                        }
                        tokio::time::sleep(backoff_delay(self.config.retry_backoff, failures))
                            .await;
                    }
                }
            }
        }

        if failures > 0 {
            return self
                .record(
                    &message.message_id,
                    Outcome::Failed,
                    prior_attempts + failures,
                    last_error.as_deref(),
                )
                .await;
        }

        // No failures and nothing accepted: every attachment was rejected.
        let (filename, reason, rationale) = last_rejection.unwrap_or((
            String::new(),
            RejectReason::NotAResume,
            "no attachment classified as a resume".to_string(),
        ));
        self.finish_rejected(message, prior_attempts, filename, reason, rationale)
            .await
    }

    /// One full attempt over one attachment: fetch → render → classify →
    /// extract → append.
    async fn run_cycle(
        &self,
        message: &InboundMessage,
        attachment: &AttachmentRef,
    ) -> CycleOutcome {
        let bytes = match self.inbox.fetch_attachment(attachment).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return CycleOutcome::Faulted {
                    error: format!("attachment fetch: {e}"),
                };
            }
        };

        let filename = attachment.filename.clone();
        let mime_type = attachment.mime_type.clone();
        let rendered =
            tokio::task::spawn_blocking(move || render::render_text(&bytes, &mime_type, &filename))
                .await;
        let text = match rendered {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                return CycleOutcome::Rejected {
                    reason: RejectReason::Unreadable,
                    rationale: e.to_string(),
                };
            }
            Err(e) => {
                return CycleOutcome::Faulted {
                    error: format!("render task: {e}"),
                };
            }
        };

        let verdict = match self.classifier.classify(&text).await {
            Ok(verdict) => verdict,
            Err(e) => {
                return CycleOutcome::Faulted {
                    error: format!("classification: {e}"),
                };
            }
        };
        if !verdict.is_resume {
            return CycleOutcome::Rejected {
                reason: verdict.reject_reason.unwrap_or(RejectReason::NotAResume),
                rationale: verdict.rationale,
            };
        }

        let record = match self.extractor.extract(&text, &message.message_id).await {
            Ok(record) => record,
            Err(e) => {
                return CycleOutcome::Faulted {
                    error: format!("extraction: {e}"),
                };
            }
        };

        match self.sink.append_row(&record).await {
            Ok(()) => {
                info!(
                    message_id = %message.message_id,
                    name = %record.name,
                    email = %record.email,
                    "Candidate extracted and appended"
                );
                CycleOutcome::Accepted
            }
            Err(e) => CycleOutcome::Faulted {
                error: format!("sink append: {e}"),
            },
        }
    }

    /// Terminal rejection: audit row (best effort) then ledger mark.
    async fn finish_rejected(
        &self,
        message: &InboundMessage,
        attempts: u32,
        filename: String,
        reason: RejectReason,
        rationale: String,
    ) -> Outcome {
        info!(
            message_id = %message.message_id,
            reason = reason.label(),
            rationale = %rationale,
            "Message rejected"
        );

        let row = RejectionRow {
            recorded_at: Utc::now(),
            message_id: message.message_id.clone(),
            sender: message.sender.clone(),
            filename,
            reason: reason.label().to_string(),
            rationale,
        };
        if let Err(e) = self.sink.append_rejection(&row).await {
            warn!(
                message_id = %message.message_id,
                error = %e,
                "Failed to append rejection audit row"
            );
        }

        self.record(
            &message.message_id,
            Outcome::RejectedNotResume,
            attempts,
            None,
        )
        .await
    }

    /// Write an outcome to the ledger. A write failure downgrades the
    /// resolution to `Failed` so the next pass picks the message up again.
    async fn record(
        &self,
        message_id: &str,
        outcome: Outcome,
        attempts: u32,
        last_error: Option<&str>,
    ) -> Outcome {
        match self
            .ledger
            .record_outcome(message_id, outcome, attempts, last_error)
            .await
        {
            Ok(()) => outcome,
            Err(e) => {
                error!(
                    message_id,
                    outcome = outcome.label(),
                    error = %e,
                    "Failed to record outcome in ledger"
                );
                Outcome::Failed
            }
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn tally(summary: &mut PassSummary, outcome: Outcome) {
    match outcome {
        Outcome::Processed => summary.accepted += 1,
        Outcome::RejectedNotResume => summary.rejected += 1,
        Outcome::Failed => summary.failed += 1,
        Outcome::Skipped => summary.skipped += 1,
    }
}

fn note_unresolved(oldest: &mut Option<DateTime<Utc>>, received_at: DateTime<Utc>) {
    match oldest {
        Some(current) if *current <= received_at => {}
        _ => *oldest = Some(received_at),
    }
}

/// Jittered exponential backoff: base, 2x, 4x, then flat, plus up to
/// one second of jitter.
fn backoff_delay(base: Duration, failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(BACKOFF_MAX_SHIFT);
    let scaled = base.saturating_mul(1u32 << shift);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
    scaled + jitter
}
