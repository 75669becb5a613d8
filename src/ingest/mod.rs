//! Entry points that feed supplier XML into the mapper: manual upload,
//! gateway mailbox, inbound e-mail and re-scan of an existing bill.
//!
//! All of them share [`first_success`]: candidates are tried in order and the
//! first one that maps cleanly wins.

pub mod gateway;
pub mod inbound;
pub mod upload;

use std::future::Future;

use log::{debug, warn};

use crate::error::{CandidateFailure, ImportError, IngestionError};
use crate::payload::Candidate;

pub use gateway::{GatewayMailbox, GatewayOutcome};
pub use inbound::{handle_inbound_email, rescan_bill};
pub use upload::{import_file, UploadRequest};

/// Try `attempt` on each candidate until one succeeds.
///
/// Validation failures are collected and the next candidate is tried; a
/// ledger failure aborts the run immediately. Candidates are pulled lazily,
/// so nothing after the winner is decoded.
pub(crate) async fn first_success<I, F, Fut, T>(
    action: &'static str,
    candidates: I,
    mut attempt: F,
) -> Result<T, IngestionError>
where
    I: IntoIterator<Item = Candidate>,
    F: FnMut(Candidate) -> Fut,
    Fut: Future<Output = Result<T, ImportError>>,
{
    let mut failures = Vec::new();
    let mut tried = 0usize;

    for candidate in candidates {
        tried += 1;
        let name = candidate.name.clone();
        match attempt(candidate).await {
            Ok(value) => {
                debug!("{}: {} accepted after {} rejection(s)", action, name, failures.len());
                return Ok(value);
            }
            Err(ImportError::Ledger(e)) => return Err(IngestionError::Ledger(e)),
            Err(error) => {
                warn!("{}: {} rejected: {}", action, name, error);
                failures.push(CandidateFailure { name, error });
            }
        }
    }

    if tried == 0 {
        Err(IngestionError::NoCandidates { action })
    } else {
        Err(IngestionError::NoValidCandidate { action, failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn candidates(names: &[&str]) -> Vec<Candidate> {
        names.iter().map(|n| Candidate::new(*n, n.as_bytes().to_vec())).collect()
    }

    #[tokio::test]
    async fn test_first_success_stops_at_winner() {
        let mut seen = Vec::new();
        let result = first_success("test", candidates(&["bad", "good", "never"]), |c| {
            seen.push(c.name.clone());
            async move {
                if c.name == "good" {
                    Ok(c.name)
                } else {
                    Err(ImportError::NoLineItems)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "good");
        assert_eq!(seen, vec!["bad", "good"]);
    }

    #[tokio::test]
    async fn test_first_success_collects_failures() {
        let result: Result<(), _> = first_success("test", candidates(&["a", "b"]), |_| async {
            Err(ImportError::MissingIssuerId)
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, IngestionError::NoValidCandidate { action: "test", .. }));
        let names: Vec<&str> = err.failures().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_first_success_without_candidates() {
        let result: Result<(), _> =
            first_success("test", Vec::new(), |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(IngestionError::NoCandidates { action: "test" })));
    }

    #[tokio::test]
    async fn test_first_success_propagates_ledger_failure() {
        let mut calls = 0;
        let result: Result<(), _> = first_success("test", candidates(&["a", "b"]), |_| {
            calls += 1;
            async { Err(ImportError::Ledger(anyhow!("connection reset"))) }
        })
        .await;

        assert!(matches!(result, Err(IngestionError::Ledger(_))));
        assert_eq!(calls, 1);
    }
}
