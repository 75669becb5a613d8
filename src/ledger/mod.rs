//! Accounting records the importer reads and writes.
//!
//! The [`Ledger`] trait is everything the import needs from the accounting
//! backend: lookups by field, record creation, stored attachments and
//! message threads. [`memory::MemoryLedger`] keeps records in process and
//! `database::PgLedger` keeps them in PostgreSQL.

pub mod memory;

use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use chrono::NaiveDate;
use log::warn;
use serde::Serialize;
use uuid::Uuid;

use crate::mapper::ResolvedBillPayload;

pub use memory::MemoryLedger;

pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub vat: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partner {
    pub id: Uuid,
    pub name: String,
    pub vat: String,
    pub supplier_rank: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPartner {
    pub name: String,
    pub vat: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalType {
    Purchase,
    Sale,
    Bank,
    Cash,
    General,
}

impl JournalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalType::Purchase => "purchase",
            JournalType::Sale => "sale",
            JournalType::Bank => "bank",
            JournalType::Cash => "cash",
            JournalType::General => "general",
        }
    }

    pub fn parse(value: &str) -> Option<JournalType> {
        match value {
            "purchase" => Some(JournalType::Purchase),
            "sale" => Some(JournalType::Sale),
            "bank" => Some(JournalType::Bank),
            "cash" => Some(JournalType::Cash),
            "general" => Some(JournalType::General),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Journal {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub journal_type: JournalType,
}

impl Journal {
    pub fn is_purchase_journal_of(&self, company_id: Uuid) -> bool {
        self.company_id == company_id && self.journal_type == JournalType::Purchase
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub company_id: Uuid,
    pub code: String,
    pub name: String,
}

/// External identifier schemes a tax can be known by, in lookup priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaxCodeScheme {
    /// Hacienda e-invoicing rate code
    CrEdiCode,
    TaxCode,
    Code,
}

impl TaxCodeScheme {
    pub const PRIORITY: [TaxCodeScheme; 3] =
        [TaxCodeScheme::CrEdiCode, TaxCodeScheme::TaxCode, TaxCodeScheme::Code];

    pub fn column(&self) -> &'static str {
        match self {
            TaxCodeScheme::CrEdiCode => "l10n_cr_edi_code",
            TaxCodeScheme::TaxCode => "tax_code",
            TaxCodeScheme::Code => "code",
        }
    }
}

/// Where a tax may be used. Purchase lookups accept `Purchase` and `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxUse {
    Purchase,
    Sale,
    None,
}

impl TaxUse {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxUse::Purchase => "purchase",
            TaxUse::Sale => "sale",
            TaxUse::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<TaxUse> {
        match value {
            "purchase" => Some(TaxUse::Purchase),
            "sale" => Some(TaxUse::Sale),
            "none" => Some(TaxUse::None),
            _ => None,
        }
    }

    pub fn usable_for_purchases(&self) -> bool {
        matches!(self, TaxUse::Purchase | TaxUse::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tax {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub type_tax_use: TaxUse,
    pub l10n_cr_edi_code: Option<String>,
    pub tax_code: Option<String>,
    pub code: Option<String>,
}

impl Tax {
    pub fn code_for(&self, scheme: TaxCodeScheme) -> Option<&str> {
        match scheme {
            TaxCodeScheme::CrEdiCode => self.l10n_cr_edi_code.as_deref(),
            TaxCodeScheme::TaxCode => self.tax_code.as_deref(),
            TaxCodeScheme::Code => self.code.as_deref(),
        }
    }
}

/// Mailbox that turns incoming supplier e-mails into bills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    pub id: Uuid,
    pub name: String,
    pub company_id: Uuid,
    pub journal_id: Option<Uuid>,
    pub process_emails_from: Option<NaiveDate>,
}

/// Provenance recorded on a bill created from supplier XML.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillOrigin {
    pub filename: Option<String>,
    pub gateway_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillSummary {
    pub id: Uuid,
    pub move_type: String,
    pub reference: Option<String>,
    pub invoice_date: NaiveDate,
    pub partner_id: Uuid,
    pub filename: Option<String>,
}

/// How an attachment's bytes are kept by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentData {
    Raw(Vec<u8>),
    Base64(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    pub name: String,
    pub data: AttachmentData,
    pub mimetype: Option<String>,
}

impl StoredAttachment {
    pub fn raw(name: &str, content: &[u8]) -> Self {
        StoredAttachment {
            name: name.to_string(),
            data: AttachmentData::Raw(content.to_vec()),
            mimetype: None,
        }
    }

    /// Attachment bytes; base64 storage that does not decode reads as empty.
    pub fn bytes(&self) -> Vec<u8> {
        match &self.data {
            AttachmentData::Raw(bytes) => bytes.clone(),
            AttachmentData::Base64(text) => {
                let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                general_purpose::STANDARD.decode(compact).unwrap_or_else(|e| {
                    warn!("Attachment {} has undecodable base64 storage: {}", self.name, e);
                    Vec::new()
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Thread {
    Bill(Uuid),
    Gateway(Uuid),
}

pub trait Ledger: Send + Sync {
    /// The given company, or the current one when `id` is `None`.
    fn company<'a>(&'a self, id: Option<Uuid>) -> LedgerFuture<'a, Company>;

    fn find_partner_by_vat<'a>(&'a self, vat: &'a str) -> LedgerFuture<'a, Option<Partner>>;

    /// Create a supplier partner (supplier rank 1, company type "company").
    fn create_partner<'a>(&'a self, partner: &'a NewPartner) -> LedgerFuture<'a, Partner>;

    fn journal<'a>(&'a self, id: Uuid) -> LedgerFuture<'a, Option<Journal>>;

    fn first_purchase_journal<'a>(&'a self, company_id: Uuid) -> LedgerFuture<'a, Option<Journal>>;

    fn default_expense_account<'a>(&'a self, company_id: Uuid) -> LedgerFuture<'a, Option<Account>>;

    /// First tax of the company usable for purchases whose `scheme`
    /// identifier equals `code`.
    fn find_purchase_tax<'a>(
        &'a self,
        company_id: Uuid,
        scheme: TaxCodeScheme,
        code: &'a str,
    ) -> LedgerFuture<'a, Option<Uuid>>;

    fn create_bill<'a>(
        &'a self,
        payload: &'a ResolvedBillPayload,
        origin: &'a BillOrigin,
    ) -> LedgerFuture<'a, Uuid>;

    /// Replace the header and lines of an existing bill.
    fn update_bill<'a>(
        &'a self,
        bill_id: Uuid,
        payload: &'a ResolvedBillPayload,
        origin: &'a BillOrigin,
    ) -> LedgerFuture<'a, ()>;

    /// The bill's own attachments followed by those of its message thread.
    fn bill_attachments<'a>(&'a self, bill_id: Uuid) -> LedgerFuture<'a, Vec<StoredAttachment>>;

    fn post_message<'a>(&'a self, thread: Thread, body: &'a str) -> LedgerFuture<'a, ()>;

    fn gateway<'a>(&'a self, id: Uuid) -> LedgerFuture<'a, Option<Gateway>>;

    fn gateway_bills<'a>(&'a self, gateway_id: Uuid) -> LedgerFuture<'a, Vec<BillSummary>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_attachment_bytes() {
        let raw = StoredAttachment {
            name: "a.xml".to_string(),
            data: AttachmentData::Raw(b"<a/>".to_vec()),
            mimetype: None,
        };
        assert_eq!(raw.bytes(), b"<a/>".to_vec());

        let encoded = StoredAttachment {
            name: "a.xml".to_string(),
            data: AttachmentData::Base64("PGEv\nPg==".to_string()),
            mimetype: Some("application/xml".to_string()),
        };
        assert_eq!(encoded.bytes(), b"<a/>".to_vec());

        let broken = StoredAttachment {
            name: "a.xml".to_string(),
            data: AttachmentData::Base64("***".to_string()),
            mimetype: None,
        };
        assert!(broken.bytes().is_empty());
    }

    #[test]
    fn test_tax_scheme_priority() {
        assert_eq!(TaxCodeScheme::PRIORITY[0].column(), "l10n_cr_edi_code");
        assert_eq!(TaxCodeScheme::PRIORITY[2].column(), "code");
        assert!(TaxUse::None.usable_for_purchases());
        assert!(!TaxUse::Sale.usable_for_purchases());
    }
}
