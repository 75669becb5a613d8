use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use log::{info, warn};
use uuid::Uuid;

use super::first_success;
use crate::config::ImportSettings;
use crate::email::InboundEmail;
use crate::error::IngestionError;
use crate::ledger::{BillOrigin, Gateway, Ledger, Thread};
use crate::mapper::InvoiceMapper;
use crate::payload::discover;

const ACTION: &str = "gateway e-mail import";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Created(Uuid),
    /// The e-mail predates the cutoff; a note was left on the gateway thread.
    Skipped,
}

/// Mailbox that receives supplier e-mails and turns the first valid XML
/// attachment of each into a bill.
pub struct GatewayMailbox<'a> {
    ledger: &'a dyn Ledger,
    settings: &'a ImportSettings,
    gateway: Gateway,
}

impl<'a> GatewayMailbox<'a> {
    pub fn new(ledger: &'a dyn Ledger, settings: &'a ImportSettings, gateway: Gateway) -> Self {
        GatewayMailbox {
            ledger,
            settings,
            gateway,
        }
    }

    pub async fn load(
        ledger: &'a dyn Ledger,
        settings: &'a ImportSettings,
        gateway_id: Uuid,
    ) -> anyhow::Result<GatewayMailbox<'a>> {
        let gateway = ledger
            .gateway(gateway_id)
            .await
            .context("Unable to load gateway")?
            .ok_or_else(|| anyhow!("Gateway {} not found", gateway_id))?;
        Ok(Self::new(ledger, settings, gateway))
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// The gateway's own cutoff, else the globally configured one.
    pub fn cutoff(&self) -> Option<NaiveDate> {
        self.gateway
            .process_emails_from
            .or(self.settings.process_emails_from)
    }

    pub async fn receive(&self, email: &InboundEmail) -> Result<GatewayOutcome, IngestionError> {
        if let (Some(cutoff), Some(date)) = (self.cutoff(), email.date) {
            if date.date_naive() < cutoff {
                let note = format!(
                    "E-mail ignored by date ({}). Only e-mails from {} are processed.",
                    date.format("%Y-%m-%d %H:%M:%S"),
                    cutoff.format("%Y-%m-%d")
                );
                info!("{}: {}", self.gateway.name, note);
                self.ledger
                    .post_message(Thread::Gateway(self.gateway.id), &note)
                    .await?;
                return Ok(GatewayOutcome::Skipped);
            }
        }

        let candidates = email
            .attachments
            .iter()
            .filter(|a| a.has_extension(".xml") || a.has_extension(".zip"))
            .flat_map(|a| discover(&a.content, &a.filename));

        let mapper = InvoiceMapper::new(self.ledger, self.settings);
        let mapper = &mapper;
        let journal_id = self.gateway.journal_id;
        let company_id = Some(self.gateway.company_id);

        let (filename, payload) = first_success(ACTION, candidates, |candidate| async move {
            mapper
                .map(&candidate.content, journal_id, company_id)
                .await
                .map(|payload| (candidate.name, payload))
        })
        .await?;

        let origin = BillOrigin {
            filename: Some(filename),
            gateway_id: Some(self.gateway.id),
        };
        let bill_id = self.ledger.create_bill(&payload, &origin).await?;
        let note = format!(
            "Bill created automatically from e-mail: {}",
            email.subject.as_deref().unwrap_or("")
        );
        // The bill exists from here on; a failed note must not make the e-mail retry
        if let Err(e) = self.ledger.post_message(Thread::Bill(bill_id), &note).await {
            warn!("{}: bill {} created but the e-mail note failed: {:#}", self.gateway.name, bill_id, e);
        }

        info!("{}: bill {} created from e-mail {:?}", self.gateway.name, bill_id, email.subject);
        Ok(GatewayOutcome::Created(bill_id))
    }
}
