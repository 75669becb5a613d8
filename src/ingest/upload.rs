use log::info;
use uuid::Uuid;

use super::first_success;
use crate::config::ImportSettings;
use crate::error::IngestionError;
use crate::ledger::{BillOrigin, Ledger};
use crate::mapper::InvoiceMapper;
use crate::payload::{discover, looks_like_zip, Candidate};

const ACTION: &str = "manual import";

/// A file handed over by a user, with optional overrides.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub filename: String,
    pub content: Vec<u8>,
    pub journal_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
}

/// Import an uploaded XML, base64 text or ZIP archive and create the bill.
pub async fn import_file(
    ledger: &dyn Ledger,
    settings: &ImportSettings,
    request: &UploadRequest,
) -> Result<Uuid, IngestionError> {
    let mapper = InvoiceMapper::new(ledger, settings);
    let mapper = &mapper;
    let mut candidates = discover(&request.content, &request.filename);
    if candidates.is_empty() && !is_archive(request) {
        // Map the file as-is so the parse or document type error reaches the user
        candidates.push(Candidate::new(request.filename.as_str(), request.content.clone()));
    }

    let payload = first_success(ACTION, candidates, |candidate| async move {
        mapper
            .map(&candidate.content, request.journal_id, request.company_id)
            .await
    })
    .await?;

    let origin = BillOrigin {
        filename: Some(request.filename.clone()),
        gateway_id: None,
    };
    let bill_id = ledger.create_bill(&payload, &origin).await?;
    info!(
        "{}: {} created bill {} from {}",
        ACTION,
        payload.move_type().as_str(),
        bill_id,
        request.filename
    );
    Ok(bill_id)
}

fn is_archive(request: &UploadRequest) -> bool {
    looks_like_zip(&request.content, &request.filename)
}
