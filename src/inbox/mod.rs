//! Inbox access for the intake pipeline.

pub mod imap;

pub use imap::{ImapConfig, ImapInbox};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::InboxError;
use crate::pipeline::types::{AttachmentRef, InboundMessage};

/// Message source the orchestrator polls.
///
/// Two operations only: list candidate messages and resolve an attachment
/// handle to raw bytes. Everything else about the transport stays behind
/// this trait, so tests can script an inbox without a server.
#[async_trait]
pub trait InboxSource: Send + Sync {
    /// List messages whose subject matches `subject_filter`, received at or
    /// after `since` (`None` scans the whole mailbox, e.g. on cold start).
    ///
    /// Listing must be repeatable: the ledger, not this call, decides what
    /// gets processed, so returning an already-handled message is harmless.
    async fn list_new_messages(
        &self,
        subject_filter: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<InboundMessage>, InboxError>;

    /// Resolve an attachment reference to its raw bytes.
    async fn fetch_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, InboxError>;
}
