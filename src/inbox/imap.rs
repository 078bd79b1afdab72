//! IMAP inbox adapter.
//!
//! Raw IMAP over TLS (blocking, run in `spawn_blocking`). Messages are
//! searched by subject and receipt date rather than `\Seen` flags: the
//! ledger is the dedup authority, so a crash between fetch and ledger
//! write can never lose a message, only re-list it.

use std::collections::HashMap;
use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use uuid::Uuid;

use crate::error::{ConfigError, InboxError};
use crate::pipeline::types::{AttachmentRef, InboundMessage};

use super::InboxSource;

// ── Configuration ───────────────────────────────────────────────────

/// IMAP connection settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
}

impl ImapConfig {
    /// Build config from `INTAKE_IMAP_*` environment variables.
    /// Host, username, and password are required; the daemon cannot run
    /// without an inbox.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("INTAKE_IMAP_HOST")
            .map_err(|_| ConfigError::MissingEnvVar("INTAKE_IMAP_HOST".into()))?;

        let port: u16 = match std::env::var("INTAKE_IMAP_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "INTAKE_IMAP_PORT".into(),
                message: format!("expected a port number, got {raw:?}"),
            })?,
            Err(_) => 993,
        };

        let username = std::env::var("INTAKE_IMAP_USERNAME")
            .map_err(|_| ConfigError::MissingEnvVar("INTAKE_IMAP_USERNAME".into()))?;
        let password = std::env::var("INTAKE_IMAP_PASSWORD")
            .map_err(|_| ConfigError::MissingEnvVar("INTAKE_IMAP_PASSWORD".into()))?;
        let mailbox = std::env::var("INTAKE_IMAP_MAILBOX").unwrap_or_else(|_| "INBOX".into());

        Ok(Self {
            host,
            port,
            username,
            password,
            mailbox,
        })
    }
}

// ── Inbox adapter ───────────────────────────────────────────────────

/// IMAP-backed `InboxSource`.
///
/// Attachment bytes arrive with the RFC822 fetch; they are parked in an
/// in-memory cache keyed by an opaque handle and served (repeatably, so
/// retries can re-fetch) by `fetch_attachment`. The cache is replaced
/// wholesale on every listing, so it never outlives the pass that
/// filled it.
pub struct ImapInbox {
    config: ImapConfig,
    attachments: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl ImapInbox {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            attachments: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl InboxSource for ImapInbox {
    async fn list_new_messages(
        &self,
        subject_filter: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<InboundMessage>, InboxError> {
        let config = self.config.clone();
        let command = build_search_command(subject_filter, since);

        let fetched = tokio::task::spawn_blocking(move || fetch_messages_imap(&config, &command))
            .await
            .map_err(|e| InboxError::Protocol(format!("fetch task panicked: {e}")))??;

        let mut cache = HashMap::new();
        let mut messages = Vec::with_capacity(fetched.len());
        for raw in fetched {
            let mut attachments = Vec::with_capacity(raw.attachments.len());
            for (index, (filename, mime_type, bytes)) in raw.attachments.into_iter().enumerate() {
                let handle = format!("{}#{index}", raw.message_id);
                cache.insert(handle.clone(), bytes);
                attachments.push(AttachmentRef {
                    filename,
                    mime_type,
                    handle,
                });
            }
            messages.push(InboundMessage {
                message_id: raw.message_id,
                subject: raw.subject,
                sender: raw.sender,
                received_at: raw.received_at,
                attachments,
            });
        }

        *self.attachments.lock().unwrap_or_else(|e| e.into_inner()) = cache;
        Ok(messages)
    }

    async fn fetch_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, InboxError> {
        self.attachments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&attachment.handle)
            .cloned()
            .ok_or_else(|| InboxError::AttachmentGone {
                handle: attachment.handle.clone(),
            })
    }
}

// ── IMAP wire ───────────────────────────────────────────────────────

/// One message as pulled off the wire, before conversion.
struct RawFetchedMessage {
    message_id: String,
    subject: String,
    sender: String,
    received_at: DateTime<Utc>,
    /// (filename, mime_type, bytes) per attachment, in message order.
    attachments: Vec<(String, String, Vec<u8>)>,
}

/// Build the IMAP SEARCH command for a subject filter and optional
/// receipt-date floor. IMAP `SINCE` has day granularity; the overlap it
/// causes is absorbed by the ledger.
fn build_search_command(subject_filter: &str, since: Option<DateTime<Utc>>) -> String {
    let mut command = format!("SEARCH SUBJECT \"{}\"", escape_imap_string(subject_filter));
    if let Some(since) = since {
        command.push_str(&format!(" SINCE {}", imap_date(since)));
    }
    command
}

/// Format a timestamp as an RFC 3501 date (e.g. `22-Aug-2026`).
fn imap_date(when: DateTime<Utc>) -> String {
    when.format("%d-%b-%Y").to_string()
}

fn escape_imap_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Fetch matching messages via raw IMAP over TLS (blocking — run in
/// spawn_blocking).
fn fetch_messages_imap(
    config: &ImapConfig,
    search_command: &str,
) -> Result<Vec<RawFetchedMessage>, InboxError> {
    let connect_err = |reason: String| InboxError::Connect {
        host: config.host.clone(),
        reason,
    };

    // Connect TCP
    let tcp = TcpStream::connect((&*config.host, config.port))
        .map_err(|e| connect_err(e.to_string()))?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))
        .map_err(|e| connect_err(e.to_string()))?;

    // TLS via rustls
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name: rustls::pki_types::ServerName<'_> =
        rustls::pki_types::ServerName::try_from(config.host.clone())
            .map_err(|e| connect_err(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| connect_err(e.to_string()))?;
    let mut tls = rustls::StreamOwned::new(conn, tcp);

    // ── IMAP helpers ────────────────────────────────────────────────
    let read_line =
        |tls: &mut rustls::StreamOwned<rustls::ClientConnection, TcpStream>| -> Result<String, InboxError> {
            let mut buf = Vec::new();
            loop {
                let mut byte = [0u8; 1];
                match std::io::Read::read(tls, &mut byte) {
                    Ok(0) => return Err(InboxError::Protocol("connection closed".into())),
                    Ok(_) => {
                        buf.push(byte[0]);
                        if buf.ends_with(b"\r\n") {
                            return Ok(String::from_utf8_lossy(&buf).to_string());
                        }
                    }
                    Err(e) => return Err(InboxError::Protocol(e.to_string())),
                }
            }
        };

    let send_cmd =
        |tls: &mut rustls::StreamOwned<rustls::ClientConnection, TcpStream>,
         tag: &str,
         cmd: &str|
         -> Result<Vec<String>, InboxError> {
            let full = format!("{tag} {cmd}\r\n");
            IoWrite::write_all(tls, full.as_bytes())
                .map_err(|e| InboxError::Protocol(e.to_string()))?;
            IoWrite::flush(tls).map_err(|e| InboxError::Protocol(e.to_string()))?;
            let mut lines = Vec::new();
            loop {
                let line = read_line(tls)?;
                let done = line.starts_with(tag);
                lines.push(line);
                if done {
                    break;
                }
            }
            Ok(lines)
        };

    // Read greeting
    let _greeting = read_line(&mut tls)?;

    // Login
    let login_resp = send_cmd(
        &mut tls,
        "A1",
        &format!(
            "LOGIN \"{}\" \"{}\"",
            escape_imap_string(&config.username),
            escape_imap_string(&config.password)
        ),
    )?;
    if !login_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err(InboxError::Protocol("login failed".into()));
    }

    // Select mailbox
    let _select = send_cmd(&mut tls, "A2", &format!("SELECT \"{}\"", config.mailbox))?;

    // Search for candidate messages
    let search_resp = send_cmd(&mut tls, "A3", search_command)?;
    let mut uids: Vec<&str> = Vec::new();
    for line in &search_resp {
        if line.starts_with("* SEARCH") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() > 2 {
                uids.extend_from_slice(&parts[2..]);
            }
        }
    }

    let mut results = Vec::new();
    let mut tag_counter = 4_u32;

    for uid in &uids {
        let fetch_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let fetch_resp = match send_cmd(&mut tls, &fetch_tag, &format!("FETCH {uid} RFC822")) {
            Ok(resp) => resp,
            Err(e) => {
                return Err(InboxError::Fetch {
                    uid: (*uid).to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let raw: String = fetch_resp
            .iter()
            .skip(1)
            .take(fetch_resp.len().saturating_sub(2))
            .cloned()
            .collect();

        if let Some(parsed) = MessageParser::default().parse(raw.as_bytes()) {
            results.push(RawFetchedMessage {
                message_id: parsed
                    .message_id()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4())),
                subject: parsed.subject().unwrap_or("(no subject)").to_string(),
                sender: extract_sender(&parsed),
                received_at: parse_received_at(&parsed),
                attachments: collect_attachments(&parsed),
            });
        }
    }

    // Logout
    let logout_tag = format!("A{tag_counter}");
    let _ = send_cmd(&mut tls, &logout_tag, "LOGOUT");

    Ok(results)
}

// ── Message parsing helpers ─────────────────────────────────────────

/// Extract the sender address from a parsed email.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// Convert the Date header to a UTC timestamp, falling back to now.
fn parse_received_at(parsed: &mail_parser::Message) -> DateTime<Utc> {
    parsed
        .date()
        .and_then(|d| {
            chrono::NaiveDate::from_ymd_opt(d.year as i32, u32::from(d.month), u32::from(d.day))
                .and_then(|date| {
                    date.and_hms_opt(
                        u32::from(d.hour),
                        u32::from(d.minute),
                        u32::from(d.second),
                    )
                })
                .map(|naive| naive.and_utc())
        })
        .unwrap_or_else(Utc::now)
}

/// Collect (filename, mime_type, bytes) for every attachment part.
fn collect_attachments(parsed: &mail_parser::Message) -> Vec<(String, String, Vec<u8>)> {
    let mut out = Vec::new();
    for (index, part) in parsed.attachments().enumerate() {
        let part: &mail_parser::MessagePart = part;
        let filename = MimeHeaders::attachment_name(part)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("attachment-{index}"));
        let mime_type = MimeHeaders::content_type(part)
            .map(|ct| match ct.subtype() {
                Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "application/octet-stream".into());
        out.push((filename, mime_type, part.contents().to_vec()));
    }
    out
}

// ── Tests ───────────────────────────────────────────────────────────
