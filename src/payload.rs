use std::io::{Cursor, Read};

use base64::{engine::general_purpose, Engine as _};
use log::{debug, warn};

use crate::xml::{DocumentKind, XmlElement};

/// A payload that looks like a supported supplier XML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub content: Vec<u8>,
}

impl Candidate {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Candidate {
            name: name.into(),
            content,
        }
    }
}

const ZIP_MAGIC: &[u8] = b"PK";

/// Find every supported XML document carried by `raw`.
///
/// The payload is tried as plain XML, as base64 text and as a ZIP archive,
/// in that order. The checks are independent and every match is returned.
/// Nothing here fails: undecodable data simply contributes no candidate.
pub fn discover(raw: &[u8], hint_filename: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    if is_supported_xml(raw) {
        debug!("{}: plain supplier XML", hint_filename);
        candidates.push(Candidate::new(hint_filename, raw.to_vec()));
    }

    if let Some(decoded) = decode_base64(raw) {
        if is_supported_xml(&decoded) {
            debug!("{}: base64-encoded supplier XML", hint_filename);
            candidates.push(Candidate::new(hint_filename, decoded));
        }
    }

    if looks_like_zip(raw, hint_filename) {
        match extract_zip_entries(raw) {
            Ok(entries) => candidates.extend(entries),
            Err(e) => warn!("{}: unreadable ZIP archive: {}", hint_filename, e),
        }
    }

    debug!("{}: {} candidate(s) discovered", hint_filename, candidates.len());
    candidates
}

/// Whether `raw` should be read as a ZIP archive, by name or by signature.
pub fn looks_like_zip(raw: &[u8], hint_filename: &str) -> bool {
    hint_filename.to_lowercase().ends_with(".zip") || raw.starts_with(ZIP_MAGIC)
}

/// Whether `content` is well-formed XML rooted at an invoice or credit note.
pub fn is_supported_xml(content: &[u8]) -> bool {
    XmlElement::parse(content)
        .map(|root| DocumentKind::is_supported_root(root.local_name()))
        .unwrap_or(false)
}

/// Strict base64: standard alphabet with padding. Line breaks and other
/// ASCII whitespace are removed first, as in MIME bodies.
fn decode_base64(raw: &[u8]) -> Option<Vec<u8>> {
    let compact: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return None;
    }
    general_purpose::STANDARD.decode(&compact).ok()
}

fn extract_zip_entries(raw: &[u8]) -> zip::result::ZipResult<Vec<Candidate>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(raw))?;
    let mut candidates = Vec::new();

    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable ZIP entry #{}: {}", index, e);
                continue;
            }
        };
        if entry.is_dir() || !entry.name().to_lowercase().ends_with(".xml") {
            continue;
        }

        let name = entry.name().to_string();
        let mut content = Vec::new();
        if let Err(e) = entry.read_to_end(&mut content) {
            warn!("Skipping ZIP entry {}: {}", name, e);
            continue;
        }

        if is_supported_xml(&content) {
            debug!("ZIP entry {}: supplier XML", name);
            candidates.push(Candidate::new(name, content));
        } else {
            debug!("ZIP entry {}: not a supplier invoice or credit note", name);
        }
    }

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const INVOICE: &str = "<FacturaElectronica><Clave>1</Clave></FacturaElectronica>";

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_plain_xml() {
        let found = discover(INVOICE.as_bytes(), "factura.xml");
        assert_eq!(found, vec![Candidate::new("factura.xml", INVOICE.as_bytes().to_vec())]);
    }

    #[test]
    fn test_base64_xml_with_line_breaks() {
        let encoded = general_purpose::STANDARD.encode(INVOICE);
        let wrapped = format!("{}\r\n{}\r\n", &encoded[..20], &encoded[20..]);
        let found = discover(wrapped.as_bytes(), "factura.b64");
        assert_eq!(found, vec![Candidate::new("factura.b64", INVOICE.as_bytes().to_vec())]);
    }

    #[test]
    fn test_unsupported_root_is_not_a_candidate() {
        let receipt = b"<MensajeReceptor><Clave>1</Clave></MensajeReceptor>";
        assert!(discover(receipt, "respuesta.xml").is_empty());
        let encoded = general_purpose::STANDARD.encode(receipt);
        assert!(discover(encoded.as_bytes(), "respuesta.xml").is_empty());
    }

    #[test]
    fn test_zip_keeps_only_supported_xml_entries() {
        let archive = zip_of(&[
            ("readme.txt", b"hello"),
            ("factura.XML", INVOICE.as_bytes()),
            ("respuesta.xml", b"<MensajeReceptor/>"),
            ("broken.xml", b"<FacturaElectronica>"),
        ]);
        let found = discover(&archive, "bundle.bin");
        assert_eq!(found, vec![Candidate::new("factura.XML", INVOICE.as_bytes().to_vec())]);
    }

    #[test]
    fn test_malformed_zip_is_swallowed() {
        assert!(discover(b"PK\x03\x04garbage", "bundle.zip").is_empty());
        assert!(discover(b"", "empty.zip").is_empty());
    }

    #[test]
    fn test_garbage_yields_nothing() {
        assert!(discover(b"%PDF-1.4 not an invoice", "factura.pdf").is_empty());
        assert!(discover(b"QUJD", "short.txt").is_empty());
    }
}
