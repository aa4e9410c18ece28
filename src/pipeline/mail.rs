//! Mail intake: unread messages → allow-listed attachments in the intake queue.
//!
//! The mailbox protocol lives behind [`MailSource`]. A message is only
//! marked read once all of its accepted attachments are on disk.

use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;

use crate::config::{MailConfig, PathsConfig};
use crate::pipeline::intake::{ensure_directory, sanitize_filename, ExtensionAllowList, IntakeError};

#[derive(Error, Debug)]
pub enum MailError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("Mail source error: {0}")]
    Source(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    /// Source-specific handle used to mark the message read.
    pub id: String,
    pub from: String,
    pub subject: String,
    pub attachments: Vec<MailAttachment>,
}

pub trait MailSource {
    /// Messages not yet marked read.
    fn fetch_unseen(&mut self) -> Result<Vec<MailMessage>, MailError>;

    fn mark_seen(&mut self, id: &str) -> Result<(), MailError>;
}

/// An attachment persisted to the intake queue.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedAttachment {
    pub source_email: String,
    pub subject: String,
    pub filename: String,
    pub local_path: PathBuf,
}

pub struct MailIntake {
    queue_dir: PathBuf,
    allow: ExtensionAllowList,
}

impl MailIntake {
    pub fn new(paths: &PathsConfig, config: &MailConfig) -> Self {
        Self {
            queue_dir: paths.intake_queue_dir.clone(),
            allow: ExtensionAllowList::new(&config.allowed_extensions),
        }
    }

    pub fn queue_dir(&self) -> &Path {
        &self.queue_dir
    }

    /// Save accepted attachments of every unread message.
    ///
    /// A message whose attachments cannot all be written stays unread and
    /// is retried on the next fetch; the other messages still go through.
    pub fn fetch(&self, source: &mut dyn MailSource) -> Result<Vec<SavedAttachment>, MailError> {
        ensure_directory(&self.queue_dir)?;
        let messages = source.fetch_unseen()?;
        tracing::info!(count = messages.len(), "Fetched unread messages");

        let mut saved = Vec::new();
        for message in messages {
            match self.save_message(&message) {
                Ok(mut attachments) => {
                    if let Err(e) = source.mark_seen(&message.id) {
                        tracing::warn!(id = %message.id, error = %e, "Could not mark message read");
                    }
                    saved.append(&mut attachments);
                }
                Err(e) => tracing::error!(
                    id = %message.id,
                    subject = %message.subject,
                    error = %e,
                    "Failed to persist attachments, message left unread"
                ),
            }
        }
        Ok(saved)
    }

    fn save_message(&self, message: &MailMessage) -> Result<Vec<SavedAttachment>, MailError> {
        let mut saved = Vec::new();
        for attachment in &message.attachments {
            if !self.allow.allows_name(&attachment.filename) {
                tracing::info!(filename = %attachment.filename, "Skipping attachment due to extension");
                continue;
            }
            if attachment.content.is_empty() {
                continue;
            }
            let dest = self.queue_dir.join(queue_name(&attachment.filename));
            if let Err(e) = std::fs::write(&dest, &attachment.content) {
                discard_partial(&dest, &saved);
                return Err(e.into());
            }
            tracing::info!(path = %dest.display(), "Saved attachment to intake queue");
            saved.push(SavedAttachment {
                source_email: message.from.clone(),
                subject: message.subject.clone(),
                filename: attachment.filename.clone(),
                local_path: dest,
            });
        }
        Ok(saved)
    }
}

/// Remove what a failed message already wrote, so the retry on the next
/// fetch does not queue the same attachment twice.
fn discard_partial(failed: &Path, written: &[SavedAttachment]) {
    let paths = written
        .iter()
        .map(|a| a.local_path.as_path())
        .chain(std::iter::once(failed));
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not remove partial attachment"),
        }
    }
}

/// `email_<unix-seconds>_<8 hex>_<sanitized original name>`
fn queue_name(original: &str) -> String {
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "email_{}_{}_{}",
        Utc::now().timestamp(),
        &token[..8],
        sanitize_filename(original)
    )
}
