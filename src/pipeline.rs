//! The two-phase run: parse unread mail into artifacts, then extract every
//! staged artifact.
//!
//! The phases never overlap. Any single message or file may fail without
//! stopping the batch; failed messages are left unread so the next run
//! retries them.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{BillError, Result};
use crate::mailbox::{MailStore, Uid};
use crate::model::ExtractOptions;
use crate::parser::mime::parse_message;
use crate::registry::{ExtractStats, Registry};

/// Which phases to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Parse, then extract if the parse phase completed.
    Full,
    ParseOnly,
    ExtractOnly,
}

impl RunMode {
    pub fn needs_mailbox(self) -> bool {
        !matches!(self, Self::ExtractOnly)
    }
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Artifact staged; message marked read.
    Parsed { provider: &'static str },
    /// No provider recognised it; message marked unread.
    Unmatched,
    /// The matching provider failed; message marked unread.
    ParseFailed { provider: &'static str },
    /// The message could not be read from the store.
    FetchFailed,
    /// The raw message is not parseable MIME; marked unread.
    Unreadable,
}

/// Counters for the parse phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub messages: usize,
    pub parsed: usize,
    pub unmatched: usize,
    pub failed: usize,
}

impl ParseStats {
    fn record(&mut self, disposition: &Disposition) {
        self.messages += 1;
        match disposition {
            Disposition::Parsed { .. } => self.parsed += 1,
            Disposition::Unmatched => self.unmatched += 1,
            Disposition::ParseFailed { .. } | Disposition::FetchFailed | Disposition::Unreadable => {
                self.failed += 1
            }
        }
    }
}

/// Outcome of [`Pipeline::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: RunMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse: Option<ParseStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractStats>,
}

pub struct Pipeline {
    registry: Registry,
    output_dir: PathBuf,
    extract_dir: PathBuf,
    options: ExtractOptions,
    keep: bool,
}

impl Pipeline {
    pub fn new(registry: Registry, output_dir: impl Into<PathBuf>, extract_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            output_dir: output_dir.into(),
            extract_dir: extract_dir.into(),
            options: ExtractOptions::default(),
            keep: false,
        }
    }

    /// Directories and extract options taken from `config`.
    pub fn from_config(config: &Config, registry: Registry) -> Self {
        Self::new(registry, &config.output_dir, &config.extract_dir)
            .with_options(config.extract_options())
    }

    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    /// Keep artifacts after a successful extraction.
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn extract_dir(&self) -> &Path {
        &self.extract_dir
    }

    /// Fetch, dispatch and flag one message.
    pub fn dispatch(&self, store: &mut dyn MailStore, uid: Uid) -> Disposition {
        let raw = match store.fetch(uid) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(uid, error = %e, "Failed to fetch message");
                return Disposition::FetchFailed;
            }
        };

        let message = match parse_message(&uid.to_string(), &raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(uid, error = %e, "Unreadable message");
                set_seen(store, uid, false);
                return Disposition::Unreadable;
            }
        };
        info!(uid, subject = %message.subject, from = %message.sender, "Processing message");

        let Some(provider) = self.registry.find(&message.subject, &message.sender) else {
            info!(uid, "No provider matched");
            set_seen(store, uid, false);
            return Disposition::Unmatched;
        };

        if provider.parse(&message, &self.output_dir) {
            set_seen(store, uid, true);
            info!(uid, provider = provider.name(), "Parsed and marked as read");
            Disposition::Parsed {
                provider: provider.name(),
            }
        } else {
            set_seen(store, uid, false);
            Disposition::ParseFailed {
                provider: provider.name(),
            }
        }
    }

    /// Dispatch every unread message from `senders` (all senders if empty).
    ///
    /// Only a failed search aborts the phase.
    pub fn parse_phase(
        &self,
        store: &mut dyn MailStore,
        senders: &[String],
        progress: &dyn Fn(usize, usize),
    ) -> Result<ParseStats> {
        let uids = store.search_unseen(senders)?;
        let total = uids.len();
        info!(count = total, "Unread messages found");

        let mut stats = ParseStats::default();
        for (i, uid) in uids.into_iter().enumerate() {
            progress(i, total);
            stats.record(&self.dispatch(store, uid));
        }
        progress(total, total);

        Ok(stats)
    }

    /// Extract every artifact in the staging directory.
    pub fn extract_phase(&self) -> Result<ExtractStats> {
        self.ensure_dirs()?;
        self.registry
            .extract_all(&self.output_dir, &self.extract_dir, &self.options, self.keep)
    }

    /// Run `mode`. `connect` opens the mail store and is only called when
    /// the mode needs it.
    pub fn run<S, F>(
        &self,
        mode: RunMode,
        senders: &[String],
        connect: F,
        progress: &dyn Fn(usize, usize),
    ) -> Result<RunSummary>
    where
        S: MailStore,
        F: FnOnce() -> Result<S>,
    {
        self.ensure_dirs()?;
        info!(mode = ?mode, "Starting run");

        let parse = if mode.needs_mailbox() {
            let mut store = connect()?;
            let stats = self.parse_phase(&mut store, senders, progress);
            if let Err(e) = store.close() {
                warn!(error = %e, "Failed to close mailbox session");
            }
            Some(stats?)
        } else {
            None
        };

        let extract = match mode {
            RunMode::ParseOnly => None,
            RunMode::Full | RunMode::ExtractOnly => Some(self.extract_phase()?),
        };

        Ok(RunSummary {
            mode,
            parse,
            extract,
        })
    }

    fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.output_dir, &self.extract_dir] {
            std::fs::create_dir_all(dir).map_err(|e| BillError::io(dir, e))?;
        }
        Ok(())
    }
}

/// Set or clear `\Seen`, logging instead of failing.
fn set_seen(store: &mut dyn MailStore, uid: Uid, seen: bool) {
    let result = if seen {
        store.mark_read(uid)
    } else {
        store.mark_unread(uid)
    };
    if let Err(e) = result {
        warn!(uid, seen, error = %e, "Failed to update flags");
    }
}
