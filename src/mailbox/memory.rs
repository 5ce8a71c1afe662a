//! In-memory mail store for tests and benchmarks.

use std::collections::{BTreeMap, HashSet};

use super::{MailStore, Uid};
use crate::error::{BillError, Result};
use crate::parser::mime::parse_message;

/// A flag update, in the order the pipeline issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagChange {
    Read(Uid),
    Unread(Uid),
}

#[derive(Debug, Clone)]
struct Stored {
    raw: Vec<u8>,
    seen: bool,
}

/// Messages keyed by UID, with `\Seen` tracking.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: BTreeMap<Uid, Stored>,
    changes: Vec<FlagChange>,
    broken: HashSet<Uid>,
    closed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unread message.
    pub fn insert(&mut self, uid: Uid, raw: impl Into<Vec<u8>>) {
        self.messages.insert(
            uid,
            Stored {
                raw: raw.into(),
                seen: false,
            },
        );
    }

    /// Add a message already marked read.
    pub fn insert_seen(&mut self, uid: Uid, raw: impl Into<Vec<u8>>) {
        self.insert(uid, raw);
        if let Some(stored) = self.messages.get_mut(&uid) {
            stored.seen = true;
        }
    }

    /// Make `fetch(uid)` fail, as a dropped connection would.
    pub fn break_fetch(&mut self, uid: Uid) {
        self.broken.insert(uid);
    }

    pub fn is_seen(&self, uid: Uid) -> Option<bool> {
        self.messages.get(&uid).map(|m| m.seen)
    }

    /// Flag updates so far.
    pub fn changes(&self) -> &[FlagChange] {
        &self.changes
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn stored_mut(&mut self, uid: Uid) -> Result<&mut Stored> {
        self.messages
            .get_mut(&uid)
            .ok_or_else(|| BillError::Imap(format!("no message with UID {uid}")))
    }
}

/// Case-insensitive substring match on the sender, like IMAP `FROM`.
fn from_matches(raw: &[u8], senders: &[String]) -> bool {
    if senders.is_empty() {
        return true;
    }
    let sender = parse_message("", raw)
        .map(|m| m.sender.to_lowercase())
        .unwrap_or_default();
    senders.iter().any(|s| sender.contains(&s.to_lowercase()))
}

impl MailStore for MemoryStore {
    fn search_unseen(&mut self, senders: &[String]) -> Result<Vec<Uid>> {
        Ok(self
            .messages
            .iter()
            .filter(|(_, m)| !m.seen && from_matches(&m.raw, senders))
            .map(|(uid, _)| *uid)
            .collect())
    }

    fn fetch(&mut self, uid: Uid) -> Result<Vec<u8>> {
        if self.broken.contains(&uid) {
            return Err(BillError::Imap(format!("fetch of UID {uid} failed")));
        }
        self.stored_mut(uid).map(|m| m.raw.clone())
    }

    fn mark_read(&mut self, uid: Uid) -> Result<()> {
        self.stored_mut(uid)?.seen = true;
        self.changes.push(FlagChange::Read(uid));
        Ok(())
    }

    fn mark_unread(&mut self, uid: Uid) -> Result<()> {
        self.stored_mut(uid)?.seen = false;
        self.changes.push(FlagChange::Unread(uid));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
