use std::collections::HashMap;
use std::future::ready;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use uuid::Uuid;

use super::{
    Account, BillOrigin, BillSummary, Company, Gateway, Journal, JournalType,
    Ledger, LedgerFuture, NewPartner, Partner, StoredAttachment, Tax, TaxCodeScheme, TaxUse,
    Thread,
};
use crate::mapper::ResolvedBillPayload;

#[derive(Debug, Clone)]
pub struct StoredBill {
    pub id: Uuid,
    /// `None` for a draft created by hand, before any XML was read into it
    pub payload: Option<ResolvedBillPayload>,
    pub origin: BillOrigin,
}

#[derive(Default)]
struct State {
    companies: Vec<Company>,
    partners: Vec<Partner>,
    journals: Vec<Journal>,
    accounts: Vec<Account>,
    taxes: Vec<Tax>,
    gateways: Vec<Gateway>,
    bills: Vec<StoredBill>,
    attachments: HashMap<Uuid, Vec<StoredAttachment>>,
    thread_attachments: HashMap<Uuid, Vec<StoredAttachment>>,
    messages: Vec<(Thread, String)>,
}

/// In-process [`Ledger`]. Records keep insertion order, which is the order
/// "first match" lookups see them in.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-update
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_company(&self, name: &str, vat: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        self.state().companies.push(Company {
            id,
            name: name.to_string(),
            vat: vat.map(str::to_string),
        });
        id
    }

    pub fn add_partner(&self, name: &str, vat: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state().partners.push(Partner {
            id,
            name: name.to_string(),
            vat: vat.to_string(),
            supplier_rank: 1,
        });
        id
    }

    pub fn add_journal(&self, company_id: Uuid, name: &str, journal_type: JournalType) -> Uuid {
        let id = Uuid::new_v4();
        self.state().journals.push(Journal {
            id,
            company_id,
            name: name.to_string(),
            journal_type,
        });
        id
    }

    pub fn add_expense_account(&self, company_id: Uuid, code: &str, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state().accounts.push(Account {
            id,
            company_id,
            code: code.to_string(),
            name: name.to_string(),
        });
        id
    }

    pub fn add_tax(
        &self,
        company_id: Uuid,
        name: &str,
        type_tax_use: TaxUse,
        l10n_cr_edi_code: Option<&str>,
        tax_code: Option<&str>,
        code: Option<&str>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.state().taxes.push(Tax {
            id,
            company_id,
            name: name.to_string(),
            type_tax_use,
            l10n_cr_edi_code: l10n_cr_edi_code.map(str::to_string),
            tax_code: tax_code.map(str::to_string),
            code: code.map(str::to_string),
        });
        id
    }

    pub fn add_gateway(
        &self,
        name: &str,
        company_id: Uuid,
        journal_id: Option<Uuid>,
        process_emails_from: Option<NaiveDate>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.state().gateways.push(Gateway {
            id,
            name: name.to_string(),
            company_id,
            journal_id,
            process_emails_from,
        });
        id
    }

    pub fn add_attachment(&self, bill_id: Uuid, attachment: StoredAttachment) {
        self.state().attachments.entry(bill_id).or_default().push(attachment);
    }

    /// Attachment carried by a message posted on the bill's thread.
    pub fn add_thread_attachment(&self, bill_id: Uuid, attachment: StoredAttachment) {
        self.state()
            .thread_attachments
            .entry(bill_id)
            .or_default()
            .push(attachment);
    }

    /// Empty draft bill, as created by hand before its XML is attached.
    pub fn add_draft_bill(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.state().bills.push(StoredBill {
            id,
            payload: None,
            origin: BillOrigin::default(),
        });
        id
    }

    pub fn partner_by_vat(&self, vat: &str) -> Option<Partner> {
        self.state().partners.iter().find(|p| p.vat == vat).cloned()
    }

    pub fn partner_count(&self) -> usize {
        self.state().partners.len()
    }

    pub fn bills(&self) -> Vec<StoredBill> {
        self.state().bills.clone()
    }

    pub fn bill(&self, id: Uuid) -> Option<StoredBill> {
        self.state().bills.iter().find(|b| b.id == id).cloned()
    }

    pub fn messages(&self, thread: Thread) -> Vec<String> {
        self.state()
            .messages
            .iter()
            .filter(|(t, _)| *t == thread)
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn company_now(&self, id: Option<Uuid>) -> Result<Company> {
        let state = self.state();
        match id {
            Some(id) => state
                .companies
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or_else(|| anyhow!("Company {} not found", id)),
            None => state
                .companies
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("No company defined")),
        }
    }

    fn create_partner_now(&self, partner: &NewPartner) -> Partner {
        let created = Partner {
            id: Uuid::new_v4(),
            name: partner.name.clone(),
            vat: partner.vat.clone(),
            supplier_rank: 1,
        };
        self.state().partners.push(created.clone());
        created
    }

    fn find_purchase_tax_now(&self, company_id: Uuid, scheme: TaxCodeScheme, code: &str) -> Option<Uuid> {
        self.state()
            .taxes
            .iter()
            .find(|tax| {
                tax.company_id == company_id
                    && tax.type_tax_use.usable_for_purchases()
                    && tax.code_for(scheme) == Some(code)
            })
            .map(|tax| tax.id)
    }

    fn create_bill_now(&self, payload: &ResolvedBillPayload, origin: &BillOrigin) -> Uuid {
        let id = Uuid::new_v4();
        self.state().bills.push(StoredBill {
            id,
            payload: Some(payload.clone()),
            origin: origin.clone(),
        });
        id
    }

    fn update_bill_now(&self, bill_id: Uuid, payload: &ResolvedBillPayload, origin: &BillOrigin) -> Result<()> {
        let mut state = self.state();
        let bill = state
            .bills
            .iter_mut()
            .find(|b| b.id == bill_id)
            .ok_or_else(|| anyhow!("Bill {} not found", bill_id))?;
        bill.payload = Some(payload.clone());
        if origin.filename.is_some() {
            bill.origin.filename = origin.filename.clone();
        }
        if origin.gateway_id.is_some() {
            bill.origin.gateway_id = origin.gateway_id;
        }
        Ok(())
    }

    fn bill_attachments_now(&self, bill_id: Uuid) -> Vec<StoredAttachment> {
        let state = self.state();
        let own = state.attachments.get(&bill_id).into_iter().flatten();
        let thread = state.thread_attachments.get(&bill_id).into_iter().flatten();
        own.chain(thread).cloned().collect()
    }

    fn gateway_bills_now(&self, gateway_id: Uuid) -> Vec<BillSummary> {
        self.state()
            .bills
            .iter()
            .filter(|b| b.origin.gateway_id == Some(gateway_id))
            .filter_map(|b| {
                let payload = b.payload.as_ref()?;
                Some(BillSummary {
                    id: b.id,
                    move_type: payload.move_type().as_str().to_string(),
                    reference: payload.reference().map(str::to_string),
                    invoice_date: payload.invoice_date(),
                    partner_id: payload.partner_id(),
                    filename: b.origin.filename.clone(),
                })
            })
            .collect()
    }
}

impl Ledger for MemoryLedger {
    fn company<'a>(&'a self, id: Option<Uuid>) -> LedgerFuture<'a, Company> {
        Box::pin(ready(self.company_now(id)))
    }

    fn find_partner_by_vat<'a>(&'a self, vat: &'a str) -> LedgerFuture<'a, Option<Partner>> {
        Box::pin(ready(Ok(self.partner_by_vat(vat))))
    }

    fn create_partner<'a>(&'a self, partner: &'a NewPartner) -> LedgerFuture<'a, Partner> {
        Box::pin(ready(Ok(self.create_partner_now(partner))))
    }

    fn journal<'a>(&'a self, id: Uuid) -> LedgerFuture<'a, Option<Journal>> {
        let journal = self.state().journals.iter().find(|j| j.id == id).cloned();
        Box::pin(ready(Ok(journal)))
    }

    fn first_purchase_journal<'a>(&'a self, company_id: Uuid) -> LedgerFuture<'a, Option<Journal>> {
        let journal = self
            .state()
            .journals
            .iter()
            .find(|j| j.is_purchase_journal_of(company_id))
            .cloned();
        Box::pin(ready(Ok(journal)))
    }

    fn default_expense_account<'a>(&'a self, company_id: Uuid) -> LedgerFuture<'a, Option<Account>> {
        let account = self
            .state()
            .accounts
            .iter()
            .find(|a| a.company_id == company_id)
            .cloned();
        Box::pin(ready(Ok(account)))
    }

    fn find_purchase_tax<'a>(
        &'a self,
        company_id: Uuid,
        scheme: TaxCodeScheme,
        code: &'a str,
    ) -> LedgerFuture<'a, Option<Uuid>> {
        Box::pin(ready(Ok(self.find_purchase_tax_now(company_id, scheme, code))))
    }

    fn create_bill<'a>(
        &'a self,
        payload: &'a ResolvedBillPayload,
        origin: &'a BillOrigin,
    ) -> LedgerFuture<'a, Uuid> {
        Box::pin(ready(Ok(self.create_bill_now(payload, origin))))
    }

    fn update_bill<'a>(
        &'a self,
        bill_id: Uuid,
        payload: &'a ResolvedBillPayload,
        origin: &'a BillOrigin,
    ) -> LedgerFuture<'a, ()> {
        Box::pin(ready(self.update_bill_now(bill_id, payload, origin)))
    }

    fn bill_attachments<'a>(&'a self, bill_id: Uuid) -> LedgerFuture<'a, Vec<StoredAttachment>> {
        Box::pin(ready(Ok(self.bill_attachments_now(bill_id))))
    }

    fn post_message<'a>(&'a self, thread: Thread, body: &'a str) -> LedgerFuture<'a, ()> {
        self.state().messages.push((thread, body.to_string()));
        Box::pin(ready(Ok(())))
    }

    fn gateway<'a>(&'a self, id: Uuid) -> LedgerFuture<'a, Option<Gateway>> {
        let gateway = self.state().gateways.iter().find(|g| g.id == id).cloned();
        Box::pin(ready(Ok(gateway)))
    }

    fn gateway_bills<'a>(&'a self, gateway_id: Uuid) -> LedgerFuture<'a, Vec<BillSummary>> {
        Box::pin(ready(Ok(self.gateway_bills_now(gateway_id))))
    }
}
