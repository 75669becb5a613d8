#![allow(dead_code)]

use std::fs;
use std::io::{Cursor, Write};

use cr_supplier_xml::ledger::{JournalType, MemoryLedger, TaxUse};
use uuid::Uuid;
use zip::write::SimpleFileOptions;

pub const COMPANY_VAT: &str = "3-101-999999";
pub const ISSUER_VAT: &str = "310100012345";

pub struct Books {
    pub ledger: MemoryLedger,
    pub company: Uuid,
    pub journal: Uuid,
    pub account: Uuid,
    pub iva_13: Uuid,
}

/// A company set up to receive supplier bills: purchase journal, expense
/// account and the 13% purchase VAT.
pub fn books() -> Books {
    let ledger = MemoryLedger::new();
    let company = ledger.add_company("Empresa Receptora S.A.", Some(COMPANY_VAT));
    let journal = ledger.add_journal(company, "Vendor Bills", JournalType::Purchase);
    let account = ledger.add_expense_account(company, "511000", "Gastos de operación");
    let iva_13 = ledger.add_tax(company, "IVA 13% compras", TaxUse::Purchase, Some("08"), None, None);
    Books {
        ledger,
        company,
        journal,
        account,
        iva_13,
    }
}

pub fn fixture(name: &str) -> Vec<u8> {
    fs::read(format!("data_test/{}", name))
        .unwrap_or_else(|e| panic!("Failed to read test file data_test/{}: {}", name, e))
}

pub fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in entries {
        writer.start_file(*name, options).expect("Failed to start ZIP entry");
        writer.write_all(content).expect("Failed to write ZIP entry");
    }
    writer.finish().expect("Failed to finish ZIP").into_inner()
}
