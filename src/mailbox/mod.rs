//! The mail store the pipeline reads from.
//!
//! Only what the pipeline needs is exposed: find unread messages, fetch
//! one without changing its flags, and set or clear `\Seen`.

pub mod imap;
pub mod memory;

use crate::error::Result;

pub use imap::{ImapConfig, ImapSession};
pub use memory::{FlagChange, MemoryStore};

/// Stable per-mailbox message handle (an IMAP UID).
pub type Uid = u32;

pub trait MailStore {
    /// Unread messages, optionally restricted to any of `senders`
    /// (substring match on the From address, OR'd together).
    fn search_unseen(&mut self, senders: &[String]) -> Result<Vec<Uid>>;

    /// Full raw message. Must not mark it read.
    fn fetch(&mut self, uid: Uid) -> Result<Vec<u8>>;

    fn mark_read(&mut self, uid: Uid) -> Result<()>;

    fn mark_unread(&mut self, uid: Uid) -> Result<()>;

    /// End the session.
    fn close(&mut self) -> Result<()>;
}
