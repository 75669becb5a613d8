use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use log::{error, info, warn};
use uuid::Uuid;

use crate::attachment_parser::AttachmentParser;
use crate::config::ImportSettings;
use crate::email::{InboundEmail, ProcessingResult};
use crate::gmail_client::GmailClient;
use crate::ingest::{GatewayMailbox, GatewayOutcome};
use crate::ledger::Ledger;
use crate::payload::discover;
use crate::slack_notifier::SlackNotifier;
use crate::xml::SupplierDocument;

pub type MailFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Where supplier e-mails are read from.
pub trait MailSource: Send + Sync {
    /// Search for messages to process (returns message IDs)
    fn search<'a>(&'a self, label: &'a str) -> MailFuture<'a, Vec<String>>;

    /// The message as raw RFC 822 bytes
    fn fetch_raw<'a>(&'a self, message_id: &'a str) -> MailFuture<'a, Vec<u8>>;

    /// Mark message as processed so the next run does not see it again
    fn mark_processed<'a>(&'a self, message_id: &'a str, label: &'a str) -> MailFuture<'a, ()>;
}

impl MailSource for GmailClient {
    fn search<'a>(&'a self, label: &'a str) -> MailFuture<'a, Vec<String>> {
        Box::pin(self.search_messages(label))
    }

    fn fetch_raw<'a>(&'a self, message_id: &'a str) -> MailFuture<'a, Vec<u8>> {
        Box::pin(GmailClient::fetch_raw(self, message_id))
    }

    fn mark_processed<'a>(&'a self, message_id: &'a str, label: &'a str) -> MailFuture<'a, ()> {
        Box::pin(GmailClient::mark_processed(self, message_id, label))
    }
}

/// Polls a labelled mailbox and hands every message to a gateway.
pub struct MailboxProcessor<'a> {
    ledger: &'a dyn Ledger,
    settings: &'a ImportSettings,
    gateway_id: Uuid,
    label: String,
    slack: Option<&'a SlackNotifier>,
}

impl<'a> MailboxProcessor<'a> {
    pub fn new(
        ledger: &'a dyn Ledger,
        settings: &'a ImportSettings,
        gateway_id: Uuid,
        label: impl Into<String>,
    ) -> Self {
        MailboxProcessor {
            ledger,
            settings,
            gateway_id,
            label: label.into(),
            slack: None,
        }
    }

    pub fn with_slack(mut self, slack: Option<&'a SlackNotifier>) -> Self {
        self.slack = slack;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn process_emails(&self, source: &dyn MailSource, limit: Option<usize>) -> Result<ProcessingResult> {
        info!("Starting supplier mailbox processing ({})", self.label);

        let mailbox = GatewayMailbox::load(self.ledger, self.settings, self.gateway_id).await?;
        let message_ids = self.search(source, limit).await?;
        let mut result = ProcessingResult::new();

        for message_id in &message_ids {
            let email = match self.fetch_email(source, message_id).await {
                Ok(email) => email,
                Err(e) => {
                    error!("Error reading email {}: {:#}", message_id, e);
                    result.failure();
                    self.notify_error(message_id, &format!("{:#}", e)).await;
                    continue;
                }
            };

            match mailbox.receive(&email).await {
                Ok(GatewayOutcome::Created(bill_id)) => {
                    result.created();
                    info!("Email {} processed successfully: bill {}", message_id, bill_id);
                    if let Some(slack) = self.slack {
                        if let Err(e) = slack.notify_bill_created(message_id, &email, bill_id).await {
                            warn!("Slack notification failed: {}", e);
                        }
                    }
                }
                Ok(GatewayOutcome::Skipped) => {
                    result.skipped();
                    info!("Email {} skipped by date", message_id);
                }
                Err(e) => {
                    error!("Error processing email {}: {}", message_id, e);
                    for failure in e.failures() {
                        warn!("  {}: {}", failure.name, failure.error);
                    }
                    result.failure();
                    self.notify_error(message_id, &e.to_string()).await;
                    continue;
                }
            }

            if let Err(e) = source.mark_processed(message_id, &self.label).await {
                error!("Failed to mark email {} as processed: {}", message_id, e);
            }
        }

        info!(
            "Processing completed: {} emails processed, {} bills created, {} skipped, {} failed",
            result.emails_processed, result.bills_created, result.emails_skipped, result.emails_failed
        );
        Ok(result)
    }

    /// Parse every message and print the documents found, without writing
    /// to the ledger or touching labels.
    pub async fn process_emails_dry_run(
        &self,
        source: &dyn MailSource,
        limit: Option<usize>,
    ) -> Result<ProcessingResult> {
        println!("\n{}", "=".repeat(80));
        println!("🧪 MODE DRY-RUN - SUPPLIER XML ANALYSIS");
        println!("{}", "=".repeat(80));

        let message_ids = self.search(source, limit).await?;
        let mut result = ProcessingResult::new();

        for (index, message_id) in message_ids.iter().enumerate() {
            println!("📧 Email {}/{} (ID: {})", index + 1, message_ids.len(), message_id);
            println!("{}", "-".repeat(60));

            let email = match self.fetch_email(source, message_id).await {
                Ok(email) => email,
                Err(e) => {
                    println!("❌ Error analyzing email {}: {:#}\n", message_id, e);
                    result.failure();
                    continue;
                }
            };

            println!("   Subject: {}", email.subject_or_default());
            let documents = documents_in(&email);
            if documents.is_empty() {
                println!("⚠️  No supplier invoice or credit note found\n");
            }
            for (name, document) in &documents {
                println!("✅ {}", name);
                println!("{}", serde_json::to_string_pretty(document)?);
            }
            result.analyzed();
        }

        println!("{}", "=".repeat(80));
        println!("🏁 Analysis completed: {} emails analyzed out of {}", result.emails_processed, message_ids.len());
        println!("{}", "=".repeat(80));
        Ok(result)
    }

    async fn search(&self, source: &dyn MailSource, limit: Option<usize>) -> Result<Vec<String>> {
        let mut message_ids = source
            .search(&self.label)
            .await
            .context("Error searching for emails")?;

        if message_ids.is_empty() {
            info!("No emails found with label '{}'", self.label);
        }
        if let Some(limit) = limit {
            message_ids.truncate(limit);
        }
        Ok(message_ids)
    }

    async fn fetch_email(&self, source: &dyn MailSource, message_id: &str) -> Result<InboundEmail> {
        let raw = source.fetch_raw(message_id).await?;
        let mut email = AttachmentParser::parse_email(&raw)?;
        if email.message_id.is_none() {
            email.message_id = Some(message_id.to_string());
        }
        Ok(email)
    }

    async fn notify_error(&self, message_id: &str, message: &str) {
        if let Some(slack) = self.slack {
            if let Err(e) = slack.notify_error(message_id, message).await {
                warn!("Slack notification failed: {}", e);
            }
        }
    }
}

/// Supplier documents readable from the e-mail's XML and ZIP attachments.
pub fn documents_in(email: &InboundEmail) -> Vec<(String, SupplierDocument)> {
    email
        .attachments
        .iter()
        .filter(|a| a.has_extension(".xml") || a.has_extension(".zip"))
        .flat_map(|a| discover(&a.content, &a.filename))
        .filter_map(|candidate| {
            SupplierDocument::parse(&candidate.content)
                .ok()
                .map(|document| (candidate.name, document))
        })
        .collect()
}
