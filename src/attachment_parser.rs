use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use mail_parser::{MessageParser, MimeHeaders};

use crate::email::InboundEmail;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = AttachmentParser::guess_content_type(&filename).map(str::to_string);
        Attachment {
            filename,
            content,
            content_type,
        }
    }

    pub fn has_extension(&self, extension: &str) -> bool {
        self.filename.to_lowercase().ends_with(extension)
    }
}

pub struct AttachmentParser;

impl AttachmentParser {
    /// Parse a raw RFC 822 message into subject, date, sender and attachments.
    pub fn parse_email(raw_email: &[u8]) -> Result<InboundEmail> {
        debug!("Parsing e-mail of {} bytes", raw_email.len());

        let message = MessageParser::default()
            .parse(raw_email)
            .context("Unable to parse e-mail")?;

        let date = message
            .date()
            .and_then(|date| DateTime::<Utc>::from_timestamp(date.to_timestamp(), 0));
        if date.is_none() {
            warn!("E-mail has no usable Date header");
        }

        let from = message
            .from()
            .and_then(|addrs| addrs.first())
            .and_then(|addr| match (&addr.name, &addr.address) {
                (Some(name), Some(email)) => Some(format!("{} <{}>", name, email)),
                (None, Some(email)) => Some(email.to_string()),
                _ => None,
            });

        let mut attachments = Vec::new();
        for (index, part) in message.attachments().enumerate() {
            let filename = match part.attachment_name() {
                Some(name) if !name.trim().is_empty() => name.trim().to_string(),
                _ => {
                    debug!("Attachment {} has no filename, skipping", index);
                    continue;
                }
            };

            let content_type = part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                    None => ct.ctype().to_string(),
                })
                .or_else(|| Self::guess_content_type(&filename).map(str::to_string));

            debug!(
                "Attachment found: {} ({:?}), size: {} bytes",
                filename,
                content_type,
                part.contents().len()
            );

            attachments.push(Attachment {
                filename,
                content: part.contents().to_vec(),
                content_type,
            });
        }

        info!("Found {} attachment(s)", attachments.len());

        Ok(InboundEmail {
            message_id: message.message_id().map(str::to_string),
            subject: message.subject().map(str::to_string),
            from,
            date,
            attachments,
        })
    }

    pub fn guess_content_type(filename: &str) -> Option<&'static str> {
        let lowercase_name = filename.to_lowercase();
        if lowercase_name.ends_with(".xml") {
            Some("application/xml")
        } else if lowercase_name.ends_with(".zip") {
            Some("application/zip")
        } else if lowercase_name.ends_with(".pdf") {
            Some("application/pdf")
        } else if lowercase_name.ends_with(".txt") {
            Some("text/plain")
        } else {
            None
        }
    }
}
