//! Background intake poller — runs serialized passes on a timer.
//!
//! One task, one pass at a time. The interval uses delayed missed-tick
//! behavior, so a pass that outlives its slot pushes the next pass back
//! instead of stacking passes. The shutdown flag is observed within a
//! quarter second while idle and between messages while a pass runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::pipeline::processor::IntakeProcessor;

/// How often the idle poller re-checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Spawn the background poll loop.
///
/// Each tick runs one full intake pass. Returns a `JoinHandle` and the
/// shutdown flag; setting the flag stops the loop after the in-flight
/// message (never mid-message).
pub fn spawn_intake_poller(
    processor: Arc<IntakeProcessor>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            "Intake poller started"
        );

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flag_poll = tokio::time::interval(SHUTDOWN_POLL);

        // The first tick fires immediately.
        loop {
            tokio::select! {
                biased;
                _ = flag_poll.tick() => {
                    if shutdown.load(Ordering::Relaxed) {
                        info!("Intake poller shutting down");
                        return;
                    }
                }
                _ = tick.tick() => {
                    if shutdown.load(Ordering::Relaxed) {
                        info!("Intake poller shutting down");
                        return;
                    }

                    match processor.run_pass(&shutdown).await {
                        Ok(summary) => {
                            if summary.interrupted {
                                info!("Intake poller stopped after interrupted pass");
                                return;
                            }
                        }
                        Err(e) => {
                            // Transient inbox faults ride out here; the
                            // next tick retries from the same checkpoint.
                            error!(error = %e, "Intake pass failed");
                        }
                    }

                    if shutdown.load(Ordering::Relaxed) {
                        info!("Intake poller shutting down after pass");
                        return;
                    }
                }
            }
        }
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntakeConfig;
    use crate::error::{InboxError, LlmError, SinkError};
    use crate::inbox::InboxSource;
    use crate::ledger::LibSqlLedger;
    use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
    use crate::pipeline::classifier::DocumentClassifier;
    use crate::pipeline::extractor::CandidateExtractor;
    use crate::pipeline::types::{AttachmentRef, CandidateRecord, InboundMessage, RejectionRow};
    use crate::sink::RecordSink;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::AtomicUsize;

    struct CountingInbox {
        list_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl InboxSource for CountingInbox {
        async fn list_new_messages(
            &self,
            _subject_filter: &str,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Vec<InboundMessage>, InboxError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn fetch_attachment(
            &self,
            attachment: &AttachmentRef,
        ) -> Result<Vec<u8>, InboxError> {
            Err(InboxError::AttachmentGone {
                handle: attachment.handle.clone(),
            })
        }
    }

    struct NoopLlm;

    #[async_trait::async_trait]
    impl LlmProvider for NoopLlm {
        fn model_name(&self) -> &str {
            "mock-noop"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: "{}".to_string(),
                input_tokens: 0,
                output_tokens: 0,
            })
        }
    }

    struct NoopSink;

    #[async_trait::async_trait]
    impl RecordSink for NoopSink {
        async fn append_row(&self, _record: &CandidateRecord) -> Result<(), SinkError> {
            Ok(())
        }

        async fn append_rejection(&self, _row: &RejectionRow) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn poller_runs_passes_and_stops_on_flag() {
        let inbox = Arc::new(CountingInbox {
            list_calls: AtomicUsize::new(0),
        });
        let llm = Arc::new(NoopLlm);
        let ledger = Arc::new(LibSqlLedger::new_memory().await.unwrap());

        let processor = Arc::new(IntakeProcessor::new(
            inbox.clone(),
            DocumentClassifier::new(llm.clone()),
            CandidateExtractor::new(llm),
            ledger,
            Arc::new(NoopSink),
            IntakeConfig::default(),
        ));

        let (handle, shutdown) = spawn_intake_poller(processor, Duration::from_millis(50));

        // Give it time for at least two passes.
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.store(true, Ordering::Relaxed);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poller should stop promptly")
            .expect("poller task should not panic");

        assert!(inbox.list_calls.load(Ordering::SeqCst) >= 2);
    }
}
