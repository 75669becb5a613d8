mod common;

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use cr_supplier_xml::config::ImportSettings;
use cr_supplier_xml::email::processor_base::MailFuture;
use cr_supplier_xml::email::{MailSource, MailboxProcessor, ProcessingResult};
use cr_supplier_xml::ledger::Thread;

use common::{books, fixture};

const LABEL: &str = "facturas/proveedores";

/// Mailbox held in memory; records which messages were marked processed.
struct FakeMailbox {
    messages: Vec<(String, Vec<u8>)>,
    processed: Mutex<Vec<(String, String)>>,
}

impl FakeMailbox {
    fn new(messages: &[(&str, Vec<u8>)]) -> Self {
        FakeMailbox {
            messages: messages.iter().map(|(id, raw)| (id.to_string(), raw.clone())).collect(),
            processed: Mutex::new(Vec::new()),
        }
    }

    fn processed(&self) -> Vec<(String, String)> {
        self.processed.lock().unwrap().clone()
    }
}

impl MailSource for FakeMailbox {
    fn search<'a>(&'a self, label: &'a str) -> MailFuture<'a, Vec<String>> {
        let ids = if label == LABEL {
            self.messages.iter().map(|(id, _)| id.clone()).collect()
        } else {
            Vec::new()
        };
        Box::pin(async move { Ok(ids) })
    }

    fn fetch_raw<'a>(&'a self, message_id: &'a str) -> MailFuture<'a, Vec<u8>> {
        let raw: HashMap<&str, &Vec<u8>> = self.messages.iter().map(|(id, raw)| (id.as_str(), raw)).collect();
        let found = raw.get(message_id).map(|raw| (*raw).clone());
        Box::pin(async move { found.ok_or_else(|| anyhow!("Message {} not found", message_id)) })
    }

    fn mark_processed<'a>(&'a self, message_id: &'a str, label: &'a str) -> MailFuture<'a, ()> {
        self.processed
            .lock()
            .unwrap()
            .push((message_id.to_string(), label.to_string()));
        Box::pin(async { Ok(()) })
    }
}

fn email_with_subject(subject: &str) -> Vec<u8> {
    String::from_utf8(fixture("supplier_invoice.eml"))
        .unwrap()
        .replace("Subject: Factura electronica 00100001010000000123", &format!("Subject: {}", subject))
        .into_bytes()
}

fn email_without_xml() -> Vec<u8> {
    b"From: otro@proveedor.cr\r\n\
Subject: Consulta\r\n\
Date: Mon, 08 Jan 2024 10:00:00 -0600\r\n\
Content-Type: text/plain\r\n\
\r\n\
Sin adjuntos.\r\n"
        .to_vec()
}

#[tokio::test]
async fn test_poll_creates_bills_and_marks_messages() {
    let books = books();
    let settings = ImportSettings::default();
    let gateway_id = books.ledger.add_gateway("Facturas proveedores", books.company, None, None);
    let mailbox = FakeMailbox::new(&[
        ("m1", email_with_subject("Factura 123")),
        ("m2", email_without_xml()),
    ]);

    let processor = MailboxProcessor::new(&books.ledger, &settings, gateway_id, LABEL);
    let result = processor.process_emails(&mailbox, None).await.unwrap();

    assert_eq!(
        result,
        ProcessingResult {
            emails_processed: 1,
            bills_created: 1,
            emails_skipped: 0,
            emails_failed: 1,
        }
    );
    // The failed message keeps its label for the next run
    assert_eq!(mailbox.processed(), vec![("m1".to_string(), LABEL.to_string())]);

    let bills = books.ledger.bills();
    assert_eq!(bills.len(), 1);
    assert_eq!(
        books.ledger.messages(Thread::Bill(bills[0].id)),
        vec!["Bill created automatically from e-mail: Factura 123".to_string()]
    );
}

#[tokio::test]
async fn test_poll_marks_skipped_messages() {
    let books = books();
    let settings = ImportSettings::default();
    let cutoff = chrono::NaiveDate::from_ymd_opt(2024, 6, 1);
    let gateway_id = books.ledger.add_gateway("Facturas proveedores", books.company, None, cutoff);
    let mailbox = FakeMailbox::new(&[("old", fixture("supplier_invoice.eml"))]);

    let processor = MailboxProcessor::new(&books.ledger, &settings, gateway_id, LABEL);
    let result = processor.process_emails(&mailbox, None).await.unwrap();

    assert_eq!(result.emails_skipped, 1);
    assert_eq!(result.bills_created, 0);
    assert_eq!(mailbox.processed().len(), 1);
    assert!(books.ledger.bills().is_empty());
}

#[tokio::test]
async fn test_poll_respects_limit() {
    let books = books();
    let settings = ImportSettings::default();
    let gateway_id = books.ledger.add_gateway("Facturas proveedores", books.company, None, None);
    let mailbox = FakeMailbox::new(&[
        ("m1", email_with_subject("Uno")),
        ("m2", email_with_subject("Dos")),
        ("m3", email_with_subject("Tres")),
    ]);

    let processor = MailboxProcessor::new(&books.ledger, &settings, gateway_id, LABEL);
    let result = processor.process_emails(&mailbox, Some(2)).await.unwrap();

    assert_eq!(result.bills_created, 2);
    let ids: Vec<String> = mailbox.processed().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let books = books();
    let settings = ImportSettings::default();
    let gateway_id = books.ledger.add_gateway("Facturas proveedores", books.company, None, None);
    let mailbox = FakeMailbox::new(&[("m1", fixture("supplier_invoice.eml"))]);

    let processor = MailboxProcessor::new(&books.ledger, &settings, gateway_id, LABEL);
    let result = processor.process_emails_dry_run(&mailbox, None).await.unwrap();

    assert_eq!(result.emails_processed, 1);
    assert!(mailbox.processed().is_empty());
    assert!(books.ledger.bills().is_empty());
    assert_eq!(books.ledger.partner_count(), 0);
}

#[tokio::test]
async fn test_poll_with_unknown_gateway_fails() {
    let books = books();
    let settings = ImportSettings::default();
    let mailbox = FakeMailbox::new(&[]);

    let processor = MailboxProcessor::new(&books.ledger, &settings, uuid::Uuid::new_v4(), LABEL);
    assert!(processor.process_emails(&mailbox, None).await.is_err());
}
