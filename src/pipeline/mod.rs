//! Resume intake pipeline.
//!
//! Every polled message flows through:
//! 1. `InboxSource::list_new_messages()` — transport I/O
//! 2. Ledger gate — terminal messages are never reprocessed
//! 3. `DocumentClassifier::classify()` — resume / not-a-resume verdict
//! 4. `CandidateExtractor::extract()` — validated structured record
//! 5. `RecordSink::append_row()` then ledger mark — write before terminal
//!
//! **No partial output exists.** A message either yields one complete
//! candidate row, an audited rejection, or stays eligible for retry.

pub mod classifier;
pub mod extractor;
pub mod poller;
pub mod processor;
pub mod types;

pub use classifier::DocumentClassifier;
pub use extractor::CandidateExtractor;
pub use poller::spawn_intake_poller;
pub use processor::IntakeProcessor;
