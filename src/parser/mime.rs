//! MIME message parsing: raw RFC 5322 bytes → [`Message`].
//!
//! `mail-parser` does the heavy lifting (multipart walk, transfer decoding,
//! RFC 2047/2231 parameters); this module flattens its tree into the body
//! parts and attachments that provider parsers inspect.

use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};

use crate::error::{BillError, Result};
use crate::model::{Attachment, BodyPart, Message};
use crate::parser::header::decode_encoded_words;

/// Parse a complete raw message (headers + body).
///
/// `id` is the store handle the message was fetched under.
pub fn parse_message(id: &str, raw: &[u8]) -> Result<Message> {
    let raw = strip_bom(raw);
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| BillError::Mime(format!("message {id} could not be parsed")))?;

    let subject = parsed.subject().map(decode_encoded_words).unwrap_or_default();
    let sender = sender_of(&parsed);

    let mut message = Message::new(id, subject, sender);
    for (idx, part) in parsed.parts.iter().enumerate() {
        match &part.body {
            PartType::Multipart(_) => {}
            _ => match part.attachment_name() {
                Some(name) => message
                    .attachments
                    .push(Attachment::new(attachment_filename(name, idx), part.contents())),
                None => message.parts.push(body_part(part)),
            },
        }
    }

    Ok(message)
}

/// Render the first `From:` address as `"Name <address>"` or the bare address.
fn sender_of(parsed: &mail_parser::Message<'_>) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return String::new();
    };
    let name = addr.name().map(decode_encoded_words).unwrap_or_default();
    let address = addr.address().unwrap_or_default();
    match (name.trim(), address) {
        ("", address) => address.to_string(),
        (name, "") => name.to_string(),
        (name, address) => format!("{name} <{address}>"),
    }
}

/// Attachment names sometimes arrive with encoded-words left inside a
/// quoted parameter; those are decoded here.
fn attachment_filename(name: &str, idx: usize) -> String {
    let decoded = decode_encoded_words(name.trim());
    if decoded.trim().is_empty() {
        format!("attachment_{idx}")
    } else {
        decoded
    }
}

/// Convert a leaf part into a [`BodyPart`].
///
/// `mail-parser` has already converted text parts to UTF-8, so they are
/// labelled accordingly; binary leaves keep their declared charset.
fn body_part(part: &MessagePart<'_>) -> BodyPart {
    let content_type = part
        .content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .unwrap_or_else(|| "text/plain".to_string());

    match &part.body {
        PartType::Text(text) | PartType::Html(text) => {
            BodyPart::new(&content_type, Some("utf-8"), text.as_bytes())
        }
        _ => {
            let charset = part.content_type().and_then(|ct| ct.attribute("charset"));
            BodyPart::new(&content_type, charset, part.contents())
        }
    }
}

fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}
