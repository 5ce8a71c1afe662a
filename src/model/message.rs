//! A fetched message, reduced to what provider parsers inspect.

use super::attachment::Attachment;
use crate::parser::header::decode_charset;

/// One message pulled from the mailbox.
///
/// Immutable once built; the pipeline owns it for a single dispatch.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Stable handle from the mail store (the IMAP UID), used for
    /// flag updates and for naming derived artifacts.
    pub id: String,

    /// Decoded subject line (empty when absent).
    pub subject: String,

    /// Decoded sender, `"Display Name <address>"` or bare address (empty when absent).
    pub sender: String,

    /// Non-attachment body parts in document order.
    pub parts: Vec<BodyPart>,

    /// Attachment parts in document order.
    pub attachments: Vec<Attachment>,
}

/// A body part: `text/html`, `text/plain`, or an unnamed binary leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPart {
    /// Lowercase `type/subtype`.
    pub content_type: String,

    /// Declared charset of `data`, if any.
    pub charset: Option<String>,

    /// Part payload in `charset` encoding, transfer encoding already removed.
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(id: impl Into<String>, subject: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            sender: sender.into(),
            ..Self::default()
        }
    }

    /// Builder-style helper for adding a body part.
    pub fn with_part(mut self, part: BodyPart) -> Self {
        self.parts.push(part);
        self
    }

    /// Builder-style helper for adding an attachment.
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// The first `text/html` part, decoded to a string.
    pub fn html_body(&self) -> Option<String> {
        self.parts
            .iter()
            .find(|p| p.content_type == "text/html")
            .map(BodyPart::decode_text)
    }
}

impl BodyPart {
    pub fn new(content_type: &str, charset: Option<&str>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.to_lowercase(),
            charset: charset.map(str::to_string),
            data: data.into(),
        }
    }

    /// Decode with the declared charset, defaulting to UTF-8.
    ///
    /// Malformed sequences are replaced rather than rejected.
    pub fn decode_text(&self) -> String {
        decode_charset(self.charset.as_deref().unwrap_or("utf-8"), &self.data)
    }
}
