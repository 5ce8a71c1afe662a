//! Blocking IMAP4rev1 client over TLS.
//!
//! Just enough of the protocol for polling: LOGIN, SELECT, UID SEARCH,
//! UID FETCH `BODY.PEEK[]`, UID STORE and LOGOUT. Responses are read line
//! by line; `{N}` literals are read as raw bytes so message bodies are
//! never re-encoded. Arguments that are not 7-bit go out as synchronizing
//! literals.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use tracing::{debug, error, info};

use super::{MailStore, Uid};
use crate::error::{BillError, Result};

/// Socket read timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and how to log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
}

type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// One server response: the line text (literals elided) and the literal
/// payloads in order.
#[derive(Debug, Default)]
struct Reply {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// A logged-in session with the mailbox selected.
pub struct ImapSession {
    stream: BufReader<TlsStream>,
    next_tag: u32,
}

impl ImapSession {
    /// Connect, log in, and select `config.mailbox`.
    ///
    /// When the mailbox cannot be selected the server's mailbox list is
    /// logged before returning the error.
    pub fn connect(config: &ImapConfig) -> Result<Self> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .map_err(|e| BillError::Imap(format!("connect to {}:{}: {e}", config.host, config.port)))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| BillError::Imap(format!("socket setup: {e}")))?;

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| BillError::Imap(format!("invalid host name '{}': {e}", config.host)))?;
        let conn = ClientConnection::new(Arc::new(tls_config), server_name)?;

        let mut session = Self {
            stream: BufReader::new(StreamOwned::new(conn, tcp)),
            next_tag: 1,
        };

        let greeting = session.read_reply()?;
        if !(greeting.text.starts_with("* OK") || greeting.text.starts_with("* PREAUTH")) {
            return Err(BillError::Imap(format!("unexpected greeting: {}", greeting.text)));
        }

        session.command(&format!(
            "LOGIN {} {}",
            astring(&config.username),
            astring(&config.password)
        ))?;
        info!(host = %config.host, user = %config.username, "Logged in");

        if let Err(e) = session.command(&format!("SELECT {}", quote(&config.mailbox))) {
            error!(mailbox = %config.mailbox, error = %e, "Failed to select mailbox");
            session.log_mailboxes();
            // The session is unusable; logout failures add nothing.
            let _ = session.close();
            return Err(e);
        }
        info!(mailbox = %config.mailbox, "Mailbox selected");

        Ok(session)
    }

    /// Log the mailboxes the server offers.
    fn log_mailboxes(&mut self) {
        match self.command(r#"LIST "" "*""#) {
            Ok(replies) => {
                info!("Available mailboxes:");
                for reply in replies.iter().filter(|r| r.text.starts_with("* LIST")) {
                    info!("  {}", reply.text);
                }
            }
            Err(e) => error!(error = %e, "Failed to list mailboxes"),
        }
    }

    /// Send one tagged command and collect the untagged replies before its
    /// completion. `NO` / `BAD` completions become errors.
    ///
    /// Literals announced in `command` are sent only after the server's `+`
    /// continuation.
    fn command(&mut self, command: &str) -> Result<Vec<Reply>> {
        let tag = format!("A{:04}", self.next_tag);
        self.next_tag += 1;

        // Never log arguments: LOGIN carries the password.
        let verb = command.split(' ').take(2).collect::<Vec<_>>().join(" ");
        debug!(tag = %tag, command = %verb, "IMAP >");

        let line = format!("{tag} {command}\r\n");
        let chunks = literal_chunks(&line);
        let mut replies = Vec::new();
        if let Some((last, announcing)) = chunks.split_last() {
            for chunk in announcing {
                self.send(chunk.as_bytes())?;
                self.await_continuation(&tag, &verb, &mut replies)?;
            }
            self.send(last.as_bytes())?;
        }

        loop {
            let reply = self.read_reply()?;
            if let Some(status) = reply.text.strip_prefix(&format!("{tag} ")) {
                return match status.split(' ').next() {
                    Some("OK") => Ok(replies),
                    _ => Err(BillError::Imap(format!("{verb}: {status}"))),
                };
            }
            replies.push(reply);
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream.get_mut();
        stream
            .write_all(bytes)
            .map_err(|e| BillError::Imap(format!("write: {e}")))?;
        stream
            .flush()
            .map_err(|e| BillError::Imap(format!("write: {e}")))
    }

    /// Wait for `+` after a literal announcement. Untagged data that arrives
    /// first is kept; a tagged completion means the command was refused.
    fn await_continuation(&mut self, tag: &str, verb: &str, replies: &mut Vec<Reply>) -> Result<()> {
        loop {
            let reply = self.read_reply()?;
            if reply.text.starts_with('+') {
                return Ok(());
            }
            if let Some(status) = reply.text.strip_prefix(&format!("{tag} ")) {
                return Err(BillError::Imap(format!("{verb}: {status}")));
            }
            replies.push(reply);
        }
    }

    /// Read one logical response line, pulling in any literals it announces.
    fn read_reply(&mut self) -> Result<Reply> {
        let mut reply = Reply::default();
        loop {
            let mut raw = Vec::new();
            let n = self
                .stream
                .read_until(b'\n', &mut raw)
                .map_err(|e| BillError::Imap(format!("read: {e}")))?;
            if n == 0 {
                return Err(BillError::Imap("connection closed by server".into()));
            }
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);
            reply.text.push_str(line);

            match literal_len(line) {
                Some(len) => {
                    let mut literal = vec![0u8; len];
                    self.stream
                        .read_exact(&mut literal)
                        .map_err(|e| BillError::Imap(format!("read literal: {e}")))?;
                    reply.literals.push(literal);
                }
                None => return Ok(reply),
            }
        }
    }
}

impl MailStore for ImapSession {
    fn search_unseen(&mut self, senders: &[String]) -> Result<Vec<Uid>> {
        let criteria = search_criteria(senders);
        let charset = if criteria.is_ascii() { "" } else { "CHARSET UTF-8 " };
        info!(criteria = ?criteria, "Searching");

        let replies = self.command(&format!("UID SEARCH {charset}{criteria}"))?;
        Ok(replies
            .iter()
            .filter_map(|r| r.text.strip_prefix("* SEARCH"))
            .flat_map(str::split_whitespace)
            .filter_map(|n| n.parse().ok())
            .collect())
    }

    fn fetch(&mut self, uid: Uid) -> Result<Vec<u8>> {
        let replies = self.command(&format!("UID FETCH {uid} (BODY.PEEK[])"))?;
        replies
            .into_iter()
            .filter(|r| r.text.contains("FETCH"))
            .find_map(|r| r.literals.into_iter().next())
            .ok_or_else(|| BillError::Imap(format!("no body returned for UID {uid}")))
    }

    fn mark_read(&mut self, uid: Uid) -> Result<()> {
        self.command(&format!("UID STORE {uid} +FLAGS (\\Seen)")).map(drop)
    }

    fn mark_unread(&mut self, uid: Uid) -> Result<()> {
        self.command(&format!("UID STORE {uid} -FLAGS (\\Seen)")).map(drop)
    }

    fn close(&mut self) -> Result<()> {
        self.command("LOGOUT").map(drop)
    }
}

/// IMAP SEARCH keys for unread mail from any of `senders`.
///
/// Several senders are folded into prefix `OR` keys:
/// `UNSEEN OR OR FROM "a" FROM "b" FROM "c"`. A non-ASCII sender becomes a
/// UTF-8 literal, and the caller adds `CHARSET UTF-8`.
pub fn search_criteria(senders: &[String]) -> String {
    let mut criteria = String::from("UNSEEN");
    if senders.len() > 1 {
        criteria.push_str(&" OR".repeat(senders.len() - 1));
    }
    for sender in senders {
        criteria.push_str(" FROM ");
        criteria.push_str(&astring(sender));
    }
    criteria
}

/// Quoted IMAP string.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// A string argument: quoted when it is 7-bit text, otherwise a `{N}`
/// literal followed by the raw UTF-8 bytes.
fn astring(value: &str) -> String {
    if value.is_ascii() && !value.contains(['\r', '\n', '\0']) {
        quote(value)
    } else {
        format!("{{{}}}\r\n{value}", value.len())
    }
}

/// Split a command line after each `{N}` announcement. Every chunk but the
/// last must be followed by a continuation request before the next is sent.
fn literal_chunks(line: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut pos = 0;
    while let Some(found) = line.get(pos..).and_then(|rest| rest.find("}\r\n")) {
        let close = pos + found + 1;
        let end = close + 2;
        match literal_len(&line[start..close]) {
            Some(len) => {
                chunks.push(&line[start..end]);
                start = end;
                pos = end + len;
            }
            None => pos = end,
        }
    }
    chunks.push(line.get(start..).unwrap_or_default());
    chunks
}

/// Length announced by a trailing `{N}` (or `{N+}`), if any.
fn literal_len(line: &str) -> Option<usize> {
    let rest = line.strip_suffix('}')?;
    let open = rest.rfind('{')?;
    rest[open + 1..].trim_end_matches('+').parse().ok()
}
