pub mod common;
pub mod processor_base;

// Re-export commonly used items
pub use common::{InboundEmail, ProcessingResult};
pub use processor_base::{documents_in, MailSource, MailboxProcessor};
