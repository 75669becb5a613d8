/// Common structures for inbound e-mail processing
use chrono::{DateTime, Utc};

use crate::attachment_parser::Attachment;

/// An inbound e-mail as delivered to the import handlers.
#[derive(Debug, Clone, Default)]
pub struct InboundEmail {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
}

impl InboundEmail {
    pub fn subject_or_default(&self) -> &str {
        self.subject.as_deref().unwrap_or("Supplier XML e-mail")
    }
}

/// Counters for one mailbox polling run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessingResult {
    pub emails_processed: usize,
    pub bills_created: usize,
    pub emails_skipped: usize,
    pub emails_failed: usize,
}

impl ProcessingResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dry-run: the e-mail was read but nothing was written
    pub fn analyzed(&mut self) {
        self.emails_processed += 1;
    }

    pub fn created(&mut self) {
        self.emails_processed += 1;
        self.bills_created += 1;
    }

    pub fn skipped(&mut self) {
        self.emails_processed += 1;
        self.emails_skipped += 1;
    }

    pub fn failure(&mut self) {
        self.emails_failed += 1;
    }
}
