//! Attachment parts.
//!
//! Unlike body parts, attachments are saved byte-for-byte; nothing is
//! charset-decoded.

/// A named attachment carried by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Decoded filename (RFC 2047 / RFC 2231 resolved). Never empty.
    pub filename: String,

    /// Payload after Content-Transfer-Encoding has been removed.
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }
}
