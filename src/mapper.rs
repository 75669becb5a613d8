use chrono::{Local, NaiveDate};
use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::config::ImportSettings;
use crate::error::ImportError;
use crate::ledger::{Company, Journal, Ledger, NewPartner, Partner, TaxCodeScheme};
use crate::xml::document::parse_invoice_date;
use crate::xml::{normalize_identification, DocumentKind, SupplierDocument};

pub const DEFAULT_LINE_NAME: &str = "Imported line";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveType {
    InInvoice,
    InRefund,
}

impl MoveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveType::InInvoice => "in_invoice",
            MoveType::InRefund => "in_refund",
        }
    }
}

impl From<DocumentKind> for MoveType {
    fn from(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::Invoice => MoveType::InInvoice,
            DocumentKind::CreditNote => MoveType::InRefund,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineCommand {
    pub name: String,
    pub quantity: f64,
    pub price_unit: f64,
    pub account_id: Uuid,
    pub tax_ids: Vec<Uuid>,
}

/// Everything needed to create one vendor bill or vendor credit note.
///
/// Only [`InvoiceMapper`] builds these; once built they are read-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedBillPayload {
    move_type: MoveType,
    company_id: Uuid,
    journal_id: Uuid,
    partner_id: Uuid,
    reference: Option<String>,
    invoice_date: NaiveDate,
    document_key: Option<String>,
    lines: Vec<LineCommand>,
}

impl ResolvedBillPayload {
    pub fn move_type(&self) -> MoveType {
        self.move_type
    }

    pub fn company_id(&self) -> Uuid {
        self.company_id
    }

    pub fn journal_id(&self) -> Uuid {
        self.journal_id
    }

    pub fn partner_id(&self) -> Uuid {
        self.partner_id
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn invoice_date(&self) -> NaiveDate {
        self.invoice_date
    }

    pub fn document_key(&self) -> Option<&str> {
        self.document_key.as_deref()
    }

    pub fn lines(&self) -> &[LineCommand] {
        &self.lines
    }
}

/// Turns supplier XML into bill creation payloads against a [`Ledger`].
pub struct InvoiceMapper<'a> {
    ledger: &'a dyn Ledger,
    settings: &'a ImportSettings,
}

impl<'a> InvoiceMapper<'a> {
    pub fn new(ledger: &'a dyn Ledger, settings: &'a ImportSettings) -> Self {
        InvoiceMapper { ledger, settings }
    }

    pub async fn map(
        &self,
        xml_content: &[u8],
        journal_id: Option<Uuid>,
        company_id: Option<Uuid>,
    ) -> Result<ResolvedBillPayload, ImportError> {
        self.map_on(xml_content, journal_id, company_id, Local::now().date_naive())
            .await
    }

    /// [`InvoiceMapper::map`] with an explicit "today" for documents that
    /// carry no emission date.
    ///
    /// The only write is the partner creation, done once every check has
    /// passed, so a rejected document leaves nothing behind.
    pub async fn map_on(
        &self,
        xml_content: &[u8],
        journal_id: Option<Uuid>,
        company_id: Option<Uuid>,
        today: NaiveDate,
    ) -> Result<ResolvedBillPayload, ImportError> {
        let document = SupplierDocument::parse(xml_content)?;
        let company = self.ledger.company(company_id).await?;

        Self::validate_receiver(&document, &company)?;
        if document.issuer_tax_id.is_empty() {
            return Err(ImportError::MissingIssuerId);
        }

        let journal = self.resolve_journal(journal_id, &company).await?;

        let account = self
            .ledger
            .default_expense_account(company.id)
            .await?
            .ok_or(ImportError::NoExpenseAccount)?;

        if document.line_items.is_empty() {
            return Err(ImportError::NoLineItems);
        }

        let mut lines = Vec::with_capacity(document.line_items.len());
        for item in &document.line_items {
            let name = if item.description.is_empty() {
                DEFAULT_LINE_NAME.to_string()
            } else {
                item.description.clone()
            };
            lines.push(LineCommand {
                name,
                quantity: item.quantity,
                price_unit: item.unit_price,
                account_id: account.id,
                tax_ids: self.resolve_taxes(&item.tax_codes, company.id).await?,
            });
        }

        let partner = self
            .find_or_create_supplier(document.issuer_name.as_deref(), &document.issuer_tax_id)
            .await?;

        let payload = ResolvedBillPayload {
            move_type: document.kind.into(),
            company_id: company.id,
            journal_id: journal.id,
            partner_id: partner.id,
            reference: document.reference().map(str::to_string),
            invoice_date: parse_invoice_date(document.issue_date.as_deref(), today),
            document_key: document.document_key.clone(),
            lines,
        };

        info!(
            "Mapped {} {:?} from {} ({} line(s))",
            payload.move_type.as_str(),
            payload.reference,
            partner.vat,
            payload.lines.len()
        );
        Ok(payload)
    }

    fn validate_receiver(document: &SupplierDocument, company: &Company) -> Result<(), ImportError> {
        let company_vat = normalize_identification(company.vat.as_deref().unwrap_or(""));
        let receiver = &document.receiver_tax_id;
        if !receiver.is_empty() && !company_vat.is_empty() && *receiver != company_vat {
            return Err(ImportError::ReceiverMismatch {
                receiver: receiver.clone(),
                company: company_vat,
            });
        }
        Ok(())
    }

    async fn find_or_create_supplier(&self, name: Option<&str>, vat: &str) -> Result<Partner, ImportError> {
        if let Some(partner) = self.ledger.find_partner_by_vat(vat).await? {
            debug!("Existing supplier {} for {}", partner.name, vat);
            return Ok(partner);
        }

        let new_partner = NewPartner {
            name: name.unwrap_or(vat).to_string(),
            vat: vat.to_string(),
        };
        let partner = self.ledger.create_partner(&new_partner).await?;
        info!("Created supplier {} ({})", partner.name, partner.vat);
        Ok(partner)
    }

    /// Explicit journal, then the configured default when it is a purchase
    /// journal of the company, then the company's first purchase journal.
    async fn resolve_journal(&self, explicit: Option<Uuid>, company: &Company) -> Result<Journal, ImportError> {
        if let Some(id) = explicit {
            match self.ledger.journal(id).await? {
                Some(journal) => return Ok(journal),
                None => warn!("Journal {} does not exist, falling back", id),
            }
        }

        if let Some(id) = self.settings.default_purchase_journal_id {
            match self.ledger.journal(id).await? {
                Some(journal) if journal.is_purchase_journal_of(company.id) => return Ok(journal),
                Some(journal) => warn!(
                    "Configured journal {} is not a purchase journal of {}, ignoring it",
                    journal.name, company.name
                ),
                None => warn!("Configured journal {} does not exist, ignoring it", id),
            }
        }

        self.ledger
            .first_purchase_journal(company.id)
            .await?
            .ok_or(ImportError::NoJournalConfigured)
    }

    async fn resolve_taxes(&self, codes: &[String], company_id: Uuid) -> Result<Vec<Uuid>, ImportError> {
        let mut tax_ids: Vec<Uuid> = Vec::new();
        for code in codes {
            let mut found = None;
            for scheme in TaxCodeScheme::PRIORITY {
                if let Some(id) = self.ledger.find_purchase_tax(company_id, scheme, code).await? {
                    found = Some(id);
                    break;
                }
            }
            match found {
                Some(id) if !tax_ids.contains(&id) => tax_ids.push(id),
                Some(_) => {}
                None => debug!("No purchase tax for rate code {}, line left without it", code),
            }
        }
        Ok(tax_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{JournalType, MemoryLedger, TaxUse};

    const COMPANY_VAT: &str = "3-101-999999";

    fn invoice(root: &str, receiver: &str, lines: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<{root} xmlns="https://cdn.comprobanteselectronicos.go.cr/xml-schemas/v4.3/{root}">
  <Clave>50605012400310100012345001000010100000001231</Clave>
  <NumeroConsecutivo>00100001010000000123</NumeroConsecutivo>
  <FechaEmision>2024-01-05T09:30:00-06:00</FechaEmision>
  <Emisor>
    <Nombre>Servicios del Valle S.A.</Nombre>
    <Identificacion><Tipo>02</Tipo><Numero>310100012345</Numero></Identificacion>
  </Emisor>
  <Receptor><Identificacion><Tipo>02</Tipo><Numero>{receiver}</Numero></Identificacion></Receptor>
  <DetalleServicio>{lines}</DetalleServicio>
</{root}>"#
        )
        .into_bytes()
    }

    const ONE_LINE: &str = "<LineaDetalle><Detalle>Servicio</Detalle><Cantidad>2</Cantidad><PrecioUnitario>100.00</PrecioUnitario><Impuesto><CodigoTarifaIVA>08</CodigoTarifaIVA></Impuesto></LineaDetalle>";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
    }

    struct Books {
        ledger: MemoryLedger,
        company: Uuid,
        journal: Uuid,
        account: Uuid,
    }

    fn books() -> Books {
        let ledger = MemoryLedger::new();
        let company = ledger.add_company("Empresa Receptora", Some(COMPANY_VAT));
        let journal = ledger.add_journal(company, "Vendor Bills", JournalType::Purchase);
        let account = ledger.add_expense_account(company, "600000", "Expenses");
        Books {
            ledger,
            company,
            journal,
            account,
        }
    }

    #[tokio::test]
    async fn test_maps_invoice_and_creates_supplier() {
        let books = books();
        let settings = ImportSettings::default();
        let mapper = InvoiceMapper::new(&books.ledger, &settings);

        let payload = mapper
            .map_on(&invoice("FacturaElectronica", "3101999999", ONE_LINE), None, None, today())
            .await
            .unwrap();

        assert_eq!(payload.move_type(), MoveType::InInvoice);
        assert_eq!(payload.company_id(), books.company);
        assert_eq!(payload.journal_id(), books.journal);
        assert_eq!(payload.reference(), Some("00100001010000000123"));
        assert_eq!(payload.invoice_date(), NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(payload.lines().len(), 1);
        assert_eq!(payload.lines()[0].name, "Servicio");
        assert_eq!(payload.lines()[0].quantity, 2.0);
        assert_eq!(payload.lines()[0].price_unit, 100.0);
        assert_eq!(payload.lines()[0].account_id, books.account);
        assert!(payload.lines()[0].tax_ids.is_empty());

        let partner = books.ledger.partner_by_vat("310100012345").unwrap();
        assert_eq!(partner.id, payload.partner_id());
        assert_eq!(partner.name, "Servicios del Valle S.A.");
        assert_eq!(partner.supplier_rank, 1);
    }

    #[tokio::test]
    async fn test_credit_note_maps_to_refund() {
        let books = books();
        let settings = ImportSettings::default();
        let mapper = InvoiceMapper::new(&books.ledger, &settings);
        let payload = mapper
            .map_on(&invoice("NotaCreditoElectronica", "", ONE_LINE), None, None, today())
            .await
            .unwrap();
        assert_eq!(payload.move_type(), MoveType::InRefund);
    }

    #[tokio::test]
    async fn test_receiver_mismatch_creates_nothing() {
        let books = books();
        let settings = ImportSettings::default();
        let mapper = InvoiceMapper::new(&books.ledger, &settings);
        let result = mapper
            .map_on(&invoice("FacturaElectronica", "3-101-000001", ONE_LINE), None, None, today())
            .await;
        assert!(matches!(result, Err(ImportError::ReceiverMismatch { .. })));
        assert!(books.ledger.partner_by_vat("310100012345").is_none());
    }

    #[tokio::test]
    async fn test_receiver_check_skipped_without_company_vat() {
        let ledger = MemoryLedger::new();
        let company = ledger.add_company("No VAT", None);
        ledger.add_journal(company, "Bills", JournalType::Purchase);
        ledger.add_expense_account(company, "600000", "Expenses");
        let settings = ImportSettings::default();
        let mapper = InvoiceMapper::new(&ledger, &settings);
        let result = mapper
            .map_on(&invoice("FacturaElectronica", "3101000001", ONE_LINE), None, None, today())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_validation_failures() {
        let books = books();
        let settings = ImportSettings::default();
        let mapper = InvoiceMapper::new(&books.ledger, &settings);

        let malformed = mapper.map_on(b"<FacturaElectronica>", None, None, today()).await;
        assert!(matches!(malformed, Err(ImportError::MalformedXml(_))));

        let unsupported = mapper.map_on(b"<TiqueteElectronico/>", None, None, today()).await;
        assert!(matches!(unsupported, Err(ImportError::UnsupportedDocumentKind(_))));

        let no_issuer = mapper
            .map_on(b"<FacturaElectronica><Emisor><Nombre>X</Nombre></Emisor></FacturaElectronica>", None, None, today())
            .await;
        assert!(matches!(no_issuer, Err(ImportError::MissingIssuerId)));

        let no_lines = mapper
            .map_on(&invoice("FacturaElectronica", "", ""), None, None, today())
            .await;
        assert!(matches!(no_lines, Err(ImportError::NoLineItems)));
        assert!(books.ledger.partner_by_vat("310100012345").is_none());
    }

    #[tokio::test]
    async fn test_missing_expense_account_and_journal() {
        let ledger = MemoryLedger::new();
        let company = ledger.add_company("Bare", Some(COMPANY_VAT));
        let settings = ImportSettings::default();
        let mapper = InvoiceMapper::new(&ledger, &settings);
        let xml = invoice("FacturaElectronica", "", ONE_LINE);

        let result = mapper.map_on(&xml, None, None, today()).await;
        assert!(matches!(result, Err(ImportError::NoJournalConfigured)));

        ledger.add_journal(company, "Bills", JournalType::Purchase);
        let result = mapper.map_on(&xml, None, None, today()).await;
        assert!(matches!(result, Err(ImportError::NoExpenseAccount)));
    }

    #[tokio::test]
    async fn test_journal_resolution_order() {
        let books = books();
        let other_company = books.ledger.add_company("Other", None);
        let foreign = books.ledger.add_journal(other_company, "Foreign Bills", JournalType::Purchase);
        let sales = books.ledger.add_journal(books.company, "Sales", JournalType::Sale);
        let preferred = books.ledger.add_journal(books.company, "Imported Bills", JournalType::Purchase);
        let xml = invoice("FacturaElectronica", "", ONE_LINE);

        let settings = ImportSettings {
            default_purchase_journal_id: Some(preferred),
            ..ImportSettings::default()
        };
        let mapper = InvoiceMapper::new(&books.ledger, &settings);
        let payload = mapper.map_on(&xml, None, None, today()).await.unwrap();
        assert_eq!(payload.journal_id(), preferred);

        // Explicit wins over configuration
        let payload = mapper.map_on(&xml, Some(sales), None, today()).await.unwrap();
        assert_eq!(payload.journal_id(), sales);

        // A configured journal of another company is ignored
        let settings = ImportSettings {
            default_purchase_journal_id: Some(foreign),
            ..ImportSettings::default()
        };
        let mapper = InvoiceMapper::new(&books.ledger, &settings);
        let payload = mapper.map_on(&xml, None, None, today()).await.unwrap();
        assert_eq!(payload.journal_id(), books.journal);
    }

    #[tokio::test]
    async fn test_tax_resolution_by_scheme_priority() {
        let books = books();
        let by_code = books.ledger.add_tax(books.company, "IVA 13% (code)", TaxUse::Purchase, None, None, Some("08"));
        let by_edi = books.ledger.add_tax(books.company, "IVA 13%", TaxUse::None, Some("08"), None, None);
        books.ledger.add_tax(books.company, "IVA 4% ventas", TaxUse::Sale, Some("04"), None, None);
        let settings = ImportSettings::default();
        let mapper = InvoiceMapper::new(&books.ledger, &settings);

        let lines = "<LineaDetalle><Detalle>A</Detalle>\
            <Impuesto><CodigoTarifaIVA>08</CodigoTarifaIVA></Impuesto>\
            <Impuesto><CodigoTarifaIVA>04</CodigoTarifaIVA></Impuesto>\
            <Impuesto><CodigoTarifaIVA>99</CodigoTarifaIVA></Impuesto></LineaDetalle>";
        let payload = mapper
            .map_on(&invoice("FacturaElectronica", "", lines), None, None, today())
            .await
            .unwrap();

        assert_eq!(payload.lines()[0].tax_ids, vec![by_edi]);
        assert_ne!(payload.lines()[0].tax_ids, vec![by_code]);
    }

    #[tokio::test]
    async fn test_blank_detail_and_missing_date_defaults() {
        let books = books();
        let settings = ImportSettings::default();
        let mapper = InvoiceMapper::new(&books.ledger, &settings);
        let xml = b"<FacturaElectronica><Clave>KEY-1</Clave>\
            <Emisor><Identificacion><Numero>3-101-000777</Numero></Identificacion></Emisor>\
            <LineaDetalle><Detalle>  </Detalle><Cantidad>x</Cantidad></LineaDetalle>\
            </FacturaElectronica>";
        let payload = mapper.map_on(xml, None, None, today()).await.unwrap();

        assert_eq!(payload.reference(), Some("KEY-1"));
        assert_eq!(payload.document_key(), Some("KEY-1"));
        assert_eq!(payload.invoice_date(), today());
        assert_eq!(payload.lines()[0].name, DEFAULT_LINE_NAME);
        assert_eq!(payload.lines()[0].quantity, 1.0);
        assert_eq!(payload.lines()[0].price_unit, 0.0);
        // Unnamed suppliers are named after their identification
        assert_eq!(books.ledger.partner_by_vat("3101000777").unwrap().name, "3101000777");
    }
}
