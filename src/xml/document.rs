use chrono::NaiveDate;
use log::{debug, warn};
use serde::Serialize;

use super::extractor::XmlElement;
use crate::error::ImportError;

pub const INVOICE_ROOT: &str = "FacturaElectronica";
pub const CREDIT_NOTE_ROOT: &str = "NotaCreditoElectronica";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    CreditNote,
}

impl DocumentKind {
    /// Classify a document by the local name of its root element.
    pub fn classify(root_local_name: &str) -> Result<DocumentKind, ImportError> {
        match root_local_name {
            INVOICE_ROOT => Ok(DocumentKind::Invoice),
            CREDIT_NOTE_ROOT => Ok(DocumentKind::CreditNote),
            other => Err(ImportError::UnsupportedDocumentKind(other.to_string())),
        }
    }

    pub fn is_supported_root(root_local_name: &str) -> bool {
        Self::classify(root_local_name).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    /// Rate codes of the line's taxes, first occurrence order, no duplicates.
    pub tax_codes: Vec<String>,
}

/// Everything the bill mapping needs, read out of one supplier XML.
///
/// Identifications are already normalized. Nothing here has been checked
/// against the receiving company yet; see `mapper::InvoiceMapper`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupplierDocument {
    pub kind: DocumentKind,
    pub issuer_name: Option<String>,
    pub issuer_tax_id: String,
    pub receiver_tax_id: String,
    pub reference_number: Option<String>,
    pub issue_date: Option<String>,
    pub document_key: Option<String>,
    pub line_items: Vec<LineItem>,
}

impl SupplierDocument {
    pub fn parse(content: &[u8]) -> Result<SupplierDocument, ImportError> {
        let root = XmlElement::parse(content)?;
        Self::from_root(&root)
    }

    pub fn from_root(root: &XmlElement) -> Result<SupplierDocument, ImportError> {
        let kind = DocumentKind::classify(root.local_name())?;

        let line_items: Vec<LineItem> = root
            .descendants_named("LineaDetalle")
            .into_iter()
            .map(line_item_from)
            .collect();
        debug!("{:?} document with {} detail line(s)", kind, line_items.len());

        Ok(SupplierDocument {
            kind,
            issuer_name: non_empty(root.text(&["Emisor", "Nombre"])),
            issuer_tax_id: normalize_identification(
                root.text(&["Emisor", "Identificacion", "Numero"]).as_deref().unwrap_or(""),
            ),
            receiver_tax_id: normalize_identification(
                root.text(&["Receptor", "Identificacion", "Numero"]).as_deref().unwrap_or(""),
            ),
            reference_number: non_empty(root.text(&["NumeroConsecutivo"])),
            issue_date: non_empty(root.text(&["FechaEmision"])),
            document_key: non_empty(root.text(&["Clave"])),
            line_items,
        })
    }

    /// Consecutive number, or the document key when it is missing.
    pub fn reference(&self) -> Option<&str> {
        self.reference_number
            .as_deref()
            .or(self.document_key.as_deref())
    }
}

fn line_item_from(line: &XmlElement) -> LineItem {
    let mut tax_codes: Vec<String> = Vec::new();
    for tax in line.children_named("Impuesto") {
        if let Some(code) = non_empty(tax.text(&["CodigoTarifaIVA"])) {
            if !tax_codes.contains(&code) {
                tax_codes.push(code);
            }
        }
    }

    LineItem {
        description: line.text(&["Detalle"]).unwrap_or_default(),
        quantity: line.float(&["Cantidad"], 1.0),
        unit_price: line.float(&["PrecioUnitario"], 0.0),
        tax_codes,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Keep alphanumeric characters only, upper-cased.
pub fn normalize_identification(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Date part of an emission timestamp such as `2024-03-05T10:15:00-06:00`.
///
/// Missing values give `today`; so do unreadable ones, with a warning.
pub fn parse_invoice_date(value: Option<&str>, today: NaiveDate) -> NaiveDate {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return today;
    };
    let date_part = value
        .split(|c: char| c == 'T' || c.is_whitespace())
        .next()
        .unwrap_or(value);
    match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        Ok(date) => date,
        Err(e) => {
            warn!("Unreadable emission date '{}' ({}), using {}", value, e, today);
            today
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_supported_roots() {
        assert_eq!(DocumentKind::classify("FacturaElectronica").unwrap(), DocumentKind::Invoice);
        assert_eq!(DocumentKind::classify("NotaCreditoElectronica").unwrap(), DocumentKind::CreditNote);
    }

    #[test]
    fn test_classify_rejects_other_roots() {
        for root in ["TiqueteElectronico", "MensajeReceptor", "facturaelectronica", ""] {
            assert!(matches!(
                DocumentKind::classify(root),
                Err(ImportError::UnsupportedDocumentKind(name)) if name == root
            ));
        }
    }

    #[test]
    fn test_normalize_identification() {
        assert_eq!(normalize_identification("3-101-123456"), normalize_identification("3101123456"));
        assert_eq!(normalize_identification(" cr-3101.12 "), "CR310112");
        assert_eq!(normalize_identification(""), "");
        for value in ["3-101-123456", "ab c", "ñandú-1"] {
            let once = normalize_identification(value);
            assert_eq!(normalize_identification(&once), once);
        }
    }

    #[test]
    fn test_parse_invoice_date() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(parse_invoice_date(Some("2024-03-05T10:15:00-06:00"), today), expected);
        assert_eq!(parse_invoice_date(Some("2024-03-05"), today), expected);
        assert_eq!(parse_invoice_date(Some("2024-03-05 10:15:00"), today), expected);
        assert_eq!(parse_invoice_date(None, today), today);
        assert_eq!(parse_invoice_date(Some("  "), today), today);
        assert_eq!(parse_invoice_date(Some("05/03/2024"), today), today);
    }

    #[test]
    fn test_parse_document_fields() {
        let xml = r#"<FacturaElectronica xmlns="urn:fe">
            <Clave>50601012400310100012345</Clave>
            <NumeroConsecutivo>00100001010000000123</NumeroConsecutivo>
            <FechaEmision>2024-01-05T09:00:00-06:00</FechaEmision>
            <Emisor><Nombre>Proveedor</Nombre><Identificacion><Numero>3-101-000123</Numero></Identificacion></Emisor>
            <Receptor><Identificacion><Numero>3101999999</Numero></Identificacion></Receptor>
            <DetalleServicio>
              <LineaDetalle>
                <Detalle>Servicio</Detalle><Cantidad>2</Cantidad><PrecioUnitario>100.00</PrecioUnitario>
                <Impuesto><CodigoTarifaIVA>08</CodigoTarifaIVA></Impuesto>
                <Impuesto><CodigoTarifaIVA>08</CodigoTarifaIVA></Impuesto>
                <Impuesto><Codigo>01</Codigo></Impuesto>
              </LineaDetalle>
              <LineaDetalle><Cantidad>n/a</Cantidad></LineaDetalle>
            </DetalleServicio>
        </FacturaElectronica>"#;

        let doc = SupplierDocument::parse(xml.as_bytes()).unwrap();
        assert_eq!(doc.kind, DocumentKind::Invoice);
        assert_eq!(doc.issuer_name.as_deref(), Some("Proveedor"));
        assert_eq!(doc.issuer_tax_id, "3101000123");
        assert_eq!(doc.receiver_tax_id, "3101999999");
        assert_eq!(doc.reference(), Some("00100001010000000123"));
        assert_eq!(doc.line_items.len(), 2);
        assert_eq!(doc.line_items[0].quantity, 2.0);
        assert_eq!(doc.line_items[0].unit_price, 100.0);
        assert_eq!(doc.line_items[0].tax_codes, vec!["08".to_string()]);
        assert_eq!(doc.line_items[1].description, "");
        assert_eq!(doc.line_items[1].quantity, 1.0);
        assert_eq!(doc.line_items[1].unit_price, 0.0);
    }

    #[test]
    fn test_reference_falls_back_to_document_key() {
        let xml = "<NotaCreditoElectronica><Clave>506KEY</Clave></NotaCreditoElectronica>";
        let doc = SupplierDocument::parse(xml.as_bytes()).unwrap();
        assert_eq!(doc.kind, DocumentKind::CreditNote);
        assert_eq!(doc.reference(), Some("506KEY"));
        assert!(doc.issuer_tax_id.is_empty());
        assert!(doc.line_items.is_empty());
    }
}
