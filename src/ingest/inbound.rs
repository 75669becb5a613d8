use log::info;
use uuid::Uuid;

use super::first_success;
use crate::config::ImportSettings;
use crate::email::InboundEmail;
use crate::error::IngestionError;
use crate::ledger::{BillOrigin, Ledger};
use crate::mapper::InvoiceMapper;
use crate::payload::discover;

const RESCAN_ACTION: &str = "attachment re-scan";
const INBOUND_ACTION: &str = "inbound e-mail import";

/// Read the XML back out of an existing bill's attachments and refill the
/// bill from the first one that maps.
pub async fn rescan_bill(
    ledger: &dyn Ledger,
    settings: &ImportSettings,
    bill_id: Uuid,
) -> Result<Uuid, IngestionError> {
    let attachments = ledger.bill_attachments(bill_id).await?;
    info!("{}: bill {} has {} attachment(s)", RESCAN_ACTION, bill_id, attachments.len());

    let candidates = attachments
        .iter()
        .flat_map(|attachment| discover(&attachment.bytes(), &attachment.name));

    let mapper = InvoiceMapper::new(ledger, settings);
    let mapper = &mapper;
    let (filename, payload) = first_success(RESCAN_ACTION, candidates, |candidate| async move {
        mapper
            .map(&candidate.content, None, None)
            .await
            .map(|payload| (candidate.name, payload))
    })
    .await?;

    let origin = BillOrigin {
        filename: Some(filename),
        gateway_id: None,
    };
    ledger.update_bill(bill_id, &payload, &origin).await?;
    info!("{}: bill {} refilled from {:?}", RESCAN_ACTION, bill_id, origin.filename);
    Ok(bill_id)
}

/// Handle an e-mail delivered to a bill (or to no record at all).
///
/// Every attachment is a candidate. With a target bill the winner is written
/// onto it, otherwise a new bill is created. An e-mail without attachments
/// falls back to re-scanning the target bill.
pub async fn handle_inbound_email(
    ledger: &dyn Ledger,
    settings: &ImportSettings,
    email: &InboundEmail,
    target_bill: Option<Uuid>,
) -> Result<Uuid, IngestionError> {
    if email.attachments.is_empty() {
        if let Some(bill_id) = target_bill {
            info!("{}: no attachment on {:?}, re-scanning bill {}", INBOUND_ACTION, email.subject, bill_id);
            return rescan_bill(ledger, settings, bill_id).await;
        }
    }

    let candidates = email
        .attachments
        .iter()
        .flat_map(|attachment| discover(&attachment.content, &attachment.filename));

    let mapper = InvoiceMapper::new(ledger, settings);
    let mapper = &mapper;
    let (filename, payload) = first_success(INBOUND_ACTION, candidates, |candidate| async move {
        mapper
            .map(&candidate.content, None, None)
            .await
            .map(|payload| (candidate.name, payload))
    })
    .await?;

    let origin = BillOrigin {
        filename: Some(filename),
        gateway_id: None,
    };
    let bill_id = match target_bill {
        Some(bill_id) => {
            ledger.update_bill(bill_id, &payload, &origin).await?;
            bill_id
        }
        None => ledger.create_bill(&payload, &origin).await?,
    };
    info!("{}: bill {} from e-mail {:?}", INBOUND_ACTION, bill_id, email.subject);
    Ok(bill_id)
}
