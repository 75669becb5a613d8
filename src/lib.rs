// Library exports for cr-supplier-xml crate
// This allows tests and the binary to use the modules

pub mod attachment_parser;
pub mod config;
pub mod database;
pub mod email;
pub mod error;
pub mod gmail_client;
pub mod ledger;
pub mod mapper;
pub mod payload;
pub mod slack_notifier;

// Costa Rica e-invoice XML reading
pub mod xml;

// Upload, gateway mailbox, inbound e-mail and re-scan entry points
pub mod ingest;
