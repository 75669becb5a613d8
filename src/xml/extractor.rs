use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ImportError;

/// Namespace-agnostic element tree.
///
/// Names are stored without their prefix so that `<fe:Emisor>` and
/// `<Emisor xmlns="...">` are looked up the same way.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    local_name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<XmlElement>,
}

impl XmlElement {
    /// Parse a complete document and return its root element.
    pub fn parse(content: &[u8]) -> Result<XmlElement, ImportError> {
        let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
        let xml = std::str::from_utf8(content)
            .map_err(|e| ImportError::MalformedXml(format!("invalid UTF-8: {}", e)))?;

        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    if root.is_some() {
                        return Err(Self::malformed(&reader, "content after the root element"));
                    }
                    stack.push(Self::from_start(e)?);
                }
                Ok(Event::Empty(ref e)) => {
                    if root.is_some() {
                        return Err(Self::malformed(&reader, "content after the root element"));
                    }
                    let element = Self::from_start(e)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }
                Ok(Event::Text(ref e)) => {
                    if let Some(current) = stack.last_mut() {
                        let text = e.unescape().map_err(|err| {
                            ImportError::MalformedXml(format!("bad text content: {}", err))
                        })?;
                        current.text.push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    if let Some(current) = stack.last_mut() {
                        let data = e.into_inner();
                        current.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Ok(Event::End(_)) => {
                    // quick-xml already rejects mismatched end tags
                    let Some(element) = stack.pop() else {
                        return Err(Self::malformed(&reader, "unexpected closing tag"));
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(ImportError::MalformedXml(format!(
                        "error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }
            }
        }

        if !stack.is_empty() {
            return Err(ImportError::MalformedXml(format!(
                "unclosed element <{}>",
                stack.last().map(|e| e.local_name.as_str()).unwrap_or_default()
            )));
        }

        root.ok_or_else(|| ImportError::MalformedXml("document has no root element".to_string()))
    }

    fn from_start(start: &BytesStart) -> Result<XmlElement, ImportError> {
        let local_name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();

        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr
                .map_err(|e| ImportError::MalformedXml(format!("bad attribute on <{}>: {}", local_name, e)))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| ImportError::MalformedXml(format!("bad attribute value: {}", e)))?
                .to_string();
            attributes.push((key, value));
        }

        Ok(XmlElement {
            local_name,
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }

    fn malformed(reader: &Reader<&[u8]>, reason: &str) -> ImportError {
        ImportError::MalformedXml(format!("{} (position {})", reason, reader.buffer_position()))
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn children(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter()
    }

    /// Direct children with the given local name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |child| child.local_name == name)
    }

    /// Every element below this one with the given local name, depth-first in
    /// document order.
    pub fn descendants_named<'a>(&'a self, name: &str) -> Vec<&'a XmlElement> {
        let mut found = Vec::new();
        self.collect_descendants(name, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if child.local_name == name {
                found.push(child);
            }
            child.collect_descendants(name, found);
        }
    }

    /// First element reached by following `path` one child step at a time.
    pub fn find(&self, path: &[&str]) -> Option<&XmlElement> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        self.children
            .iter()
            .filter(|child| child.local_name == *first)
            .find_map(|child| child.find(rest))
    }

    /// Trimmed text of the first element matching `path`, `None` when the
    /// path does not resolve.
    pub fn text(&self, path: &[&str]) -> Option<String> {
        self.find(path).map(|element| element.text.trim().to_string())
    }

    /// Like [`XmlElement::text`], but parsed as a float. Missing, empty and
    /// unparseable values all yield `default`.
    pub fn float(&self, path: &[&str], default: f64) -> f64 {
        match self.text(path) {
            Some(value) if !value.is_empty() => value.parse::<f64>().unwrap_or_else(|_| {
                debug!("Value '{}' at {:?} is not a number, using {}", value, path, default);
                default
            }),
            _ => default,
        }
    }
}
