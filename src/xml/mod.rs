/// Costa Rica electronic invoice documents
pub mod document;
pub mod extractor;

pub use document::{normalize_identification, DocumentKind, LineItem, SupplierDocument};
pub use extractor::XmlElement;
