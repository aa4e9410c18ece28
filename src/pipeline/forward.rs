//! Forwarding of routed documents as `.eml` files in a pickup outbox.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::ForwardingConfig;
use crate::pipeline::intake::ensure_directory;
use crate::pipeline::intake::IntakeError;

const DEFAULT_BODY: &str =
    "Automated forwarding from the local worker. Please review and route as needed.";
const BASE64_LINE_LEN: usize = 76;

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("Forwarding recipient is not configured")]
    MissingRecipient,
}

/// A single-attachment message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment: Vec<u8>,
    pub date: DateTime<Utc>,
}

impl OutboundMessage {
    /// Message carrying the file at `path`, subject `"{prefix}: {file name}"`.
    pub fn for_file(path: &Path, config: &ForwardingConfig) -> Result<Self, ForwardError> {
        if config.books_email.trim().is_empty() {
            return Err(ForwardError::MissingRecipient);
        }
        let attachment_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        Ok(Self {
            to: config.books_email.clone(),
            from: config.sender_email.clone(),
            subject: format!("{}: {}", config.subject_prefix, attachment_name),
            body: DEFAULT_BODY.to_string(),
            attachment: std::fs::read(path)?,
            attachment_name,
            date: Utc::now(),
        })
    }

    /// RFC 5322 text with a `multipart/mixed` body.
    pub fn to_rfc5322(&self) -> String {
        let boundary = format!("=_scanroute_{}", uuid::Uuid::new_v4().simple());
        let mut out = String::new();
        out.push_str(&format!("To: {}\r\n", self.to));
        out.push_str(&format!("From: {}\r\n", self.from));
        out.push_str(&format!("Subject: {}\r\n", encode_header(&self.subject)));
        out.push_str(&format!("Date: {}\r\n", self.date.to_rfc2822()));
        out.push_str(&format!(
            "Message-ID: <{}@scanroute.local>\r\n",
            uuid::Uuid::new_v4()
        ));
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str(&format!(
            "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
        ));

        out.push_str(&format!("--{boundary}\r\n"));
        out.push_str("Content-Type: text/plain; charset=\"utf-8\"\r\n");
        out.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");
        out.push_str(&self.body);
        out.push_str("\r\n\r\n");

        let name = encode_header(&self.attachment_name).replace('"', "");
        out.push_str(&format!("--{boundary}\r\n"));
        out.push_str("Content-Type: application/octet-stream\r\n");
        out.push_str("Content-Transfer-Encoding: base64\r\n");
        out.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{name}\"\r\n\r\n"
        ));
        let encoded = STANDARD.encode(&self.attachment);
        for chunk in encoded.as_bytes().chunks(BASE64_LINE_LEN) {
            // base64 output is ASCII
            out.push_str(&String::from_utf8_lossy(chunk));
            out.push_str("\r\n");
        }
        out.push_str(&format!("--{boundary}--\r\n"));
        out
    }
}

/// RFC 2047 B-encoding for non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

/// Keep alphanumerics, space, `_` and `-`; spaces become `_`.
pub fn sanitize_subject(subject: &str) -> String {
    subject
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | ' '))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}

/// Write `message` to `outbox_dir/<UTC timestamp>__<subject>.eml`.
pub fn save_to_outbox(message: &OutboundMessage, outbox_dir: &Path) -> Result<PathBuf, ForwardError> {
    ensure_directory(outbox_dir)?;
    let subject = if message.subject.is_empty() {
        "Document"
    } else {
        message.subject.as_str()
    };
    let name = format!(
        "{}__{}.eml",
        message.date.format("%Y%m%dT%H%M%SZ"),
        sanitize_subject(subject)
    );
    let path = outbox_dir.join(name);
    std::fs::write(&path, message.to_rfc5322())?;
    Ok(path)
}

/// Forwards routed files when enabled.
pub struct Forwarder {
    config: ForwardingConfig,
}

impl Forwarder {
    pub fn new(config: &ForwardingConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn forward(&self, routed: &Path) -> Result<PathBuf, ForwardError> {
        let message = OutboundMessage::for_file(routed, &self.config)?;
        let path = save_to_outbox(&message, &self.config.outbox_dir)?;
        tracing::info!(file = %routed.display(), eml = %path.display(), "Forwarding message written");
        Ok(path)
    }
}
