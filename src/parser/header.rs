//! Header-value decoding: RFC 2047 encoded-words, charsets, percent-encoded
//! filenames, and filesystem-safe names.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use percent_encoding::percent_decode_str;
use tracing::warn;

/// Mailers routinely drop the trailing `=` padding inside encoded-words.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Longest sanitized name, in bytes. Leaves room for a provider prefix
/// under the usual 255-byte component limit.
const MAX_FILENAME_BYTES: usize = 200;

/// A trailing `.xxx` longer than this is treated as part of the stem.
const MAX_EXTENSION_BYTES: usize = 16;

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// Whitespace between two adjacent encoded-words is dropped (RFC 2047 §6.2).
/// Tokens that fail to decode are kept verbatim.
pub fn decode_encoded_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut previous_was_word = false;

    while let Some(start) = rest.find("=?") {
        let gap = &rest[..start];
        if !(previous_was_word && gap.trim().is_empty()) {
            out.push_str(gap);
        }

        match decode_one_word(&rest[start + 2..]) {
            Some((text, consumed)) => {
                out.push_str(&text);
                rest = &rest[start + 2 + consumed..];
                previous_was_word = true;
            }
            None => {
                out.push_str("=?");
                rest = &rest[start + 2..];
                previous_was_word = false;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Decode `charset?enc?text?=` (the part after `=?`).
///
/// Returns the decoded text and how many bytes of `s` it spanned.
fn decode_one_word(s: &str) -> Option<(String, usize)> {
    let mut fields = s.splitn(3, '?');
    let charset = fields.next()?;
    let encoding = fields.next()?;
    let tail = fields.next()?;
    let end = tail.find("?=")?;
    let payload = &tail[..end];
    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => LENIENT_BASE64.decode(payload.trim()).ok()?,
        "Q" | "q" => decode_q(payload),
        _ => return None,
    };

    // RFC 2231 language suffix: "UTF-8*zh-CN"
    let charset = charset.split('*').next().unwrap_or(charset);
    let consumed = charset_span(s, end);
    Some((decode_charset(charset, &bytes), consumed))
}

/// Byte length of `charset?enc?payload?=` given the payload end offset within the tail.
fn charset_span(s: &str, payload_end: usize) -> usize {
    let first = s.find('?').unwrap_or(0);
    let second = s[first + 1..].find('?').map_or(0, |p| first + 1 + p);
    second + 1 + payload_end + 2
}

/// Q-encoding: `_` is a space, `=XX` is a byte.
fn decode_q(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Decode bytes using a named charset.
///
/// Unknown labels fall back to lossy UTF-8; malformed input is replaced,
/// never rejected.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    let label = charset.trim().trim_matches('"');
    match label.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" | "ascii" => String::from_utf8_lossy(bytes).into_owned(),
        // Mail from Chinese providers labels GB18030 content as gb2312.
        "gb2312" | "gbk" | "x-gbk" => encoding_rs::GB18030.decode(bytes).0.into_owned(),
        _ => match encoding_rs::Encoding::for_label(label.as_bytes()) {
            Some(encoding) => encoding.decode(bytes).0.into_owned(),
            None => {
                warn!(charset = label, "Unknown charset, falling back to UTF-8 lossy");
                String::from_utf8_lossy(bytes).into_owned()
            }
        },
    }
}

/// Decode bytes that are UTF-8 when well-formed and GB18030 otherwise.
///
/// Used for names that carry no charset label (ZIP entries, raw
/// `Content-Disposition` values).
pub fn decode_utf8_or_gb18030(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => encoding_rs::GB18030.decode(bytes).0.into_owned(),
    }
}

/// Percent-decode a filename taken from an HTTP header.
pub fn percent_decode_name(raw: &str) -> String {
    let bytes: Vec<u8> = percent_decode_str(raw).collect();
    decode_utf8_or_gb18030(&bytes)
}

/// Make a decoded name safe to use as a single path component.
///
/// Path separators, reserved characters and control characters become `_`;
/// leading dots are stripped so the result is never hidden, `.` or `..`.
/// Long names are cut inside the stem so the extension survives.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        truncate_keeping_extension(cleaned, MAX_FILENAME_BYTES)
    }
}

/// Cut `name` to at most `max_bytes` on a char boundary, keeping a short
/// extension intact.
fn truncate_keeping_extension(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_EXTENSION_BYTES => name.split_at(dot),
        _ => (name, ""),
    };
    let mut end = max_bytes.saturating_sub(ext.len()).min(stem.len());
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{ext}", stem[..end].trim_end())
}
