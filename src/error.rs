use thiserror::Error;

/// Reasons a supplier XML document cannot be turned into a vendor bill.
///
/// Every variant except [`ImportError::Ledger`] is a validation failure: the
/// message is meant to be shown to the user as is, and retrying the same
/// payload will fail the same way.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Unable to read the attached XML: {0}")]
    MalformedXml(String),

    #[error("Unsupported XML document type: {0}")]
    UnsupportedDocumentKind(String),

    #[error("The receiver identification ({receiver}) does not match the receiving company ({company})")]
    ReceiverMismatch { receiver: String, company: String },

    #[error("The XML does not contain the issuer identification")]
    MissingIssuerId,

    #[error("The XML has no detail lines to import")]
    NoLineItems,

    #[error("No expense account found to create the bill lines")]
    NoExpenseAccount,

    #[error("No purchase journal is configured for the company")]
    NoJournalConfigured,

    /// The persistence collaborator failed; not a property of the document.
    #[error(transparent)]
    Ledger(#[from] anyhow::Error),
}

impl ImportError {
    pub fn is_validation(&self) -> bool {
        !matches!(self, ImportError::Ledger(_))
    }
}

/// One candidate payload that was tried and rejected.
#[derive(Debug)]
pub struct CandidateFailure {
    pub name: String,
    pub error: ImportError,
}

/// Failure of a whole ingestion run (upload, gateway e-mail, re-scan).
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("{action}: no supplier XML document was found to process")]
    NoCandidates { action: &'static str },

    #[error("{action}: {}", describe_failures(.failures))]
    NoValidCandidate {
        action: &'static str,
        failures: Vec<CandidateFailure>,
    },

    #[error(transparent)]
    Ledger(#[from] anyhow::Error),
}

impl IngestionError {
    /// Per-candidate failures collected before giving up, for diagnostics.
    pub fn failures(&self) -> &[CandidateFailure] {
        match self {
            IngestionError::NoValidCandidate { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// Every rejection, each with the validation message shown to the user.
fn describe_failures(failures: &[CandidateFailure]) -> String {
    match failures {
        [] => "no valid supplier invoice or credit note XML was found".to_string(),
        [only] => format!("{}: {}", only.name, only.error),
        many => {
            let reasons: Vec<String> = many
                .iter()
                .map(|failure| format!("{}: {}", failure.name, failure.error))
                .collect();
            format!(
                "no valid supplier invoice or credit note XML was found among {} documents ({})",
                many.len(),
                reasons.join("; ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(ImportError::NoLineItems.is_validation());
        assert!(ImportError::MalformedXml("eof".into()).is_validation());
        assert!(!ImportError::Ledger(anyhow::anyhow!("db down")).is_validation());
    }

    #[test]
    fn test_no_valid_candidate_message_names_action() {
        let error = IngestionError::NoValidCandidate {
            action: "manual import",
            failures: vec![CandidateFailure {
                name: "a.xml".to_string(),
                error: ImportError::MissingIssuerId,
            }],
        };
        assert_eq!(
            error.to_string(),
            "manual import: a.xml: The XML does not contain the issuer identification"
        );
        assert_eq!(error.failures().len(), 1);
    }

    #[test]
    fn test_no_valid_candidate_message_lists_every_rejection() {
        let error = IngestionError::NoValidCandidate {
            action: "gateway e-mail import",
            failures: vec![
                CandidateFailure {
                    name: "a.xml".to_string(),
                    error: ImportError::NoLineItems,
                },
                CandidateFailure {
                    name: "b.xml".to_string(),
                    error: ImportError::NoJournalConfigured,
                },
            ],
        };
        assert_eq!(
            error.to_string(),
            "gateway e-mail import: no valid supplier invoice or credit note XML was found among 2 documents \
             (a.xml: The XML has no detail lines to import; \
             b.xml: No purchase journal is configured for the company)"
        );
    }
}
