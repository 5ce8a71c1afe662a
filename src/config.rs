//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. the `--config` argument (or `$BILLFETCH_CONFIG`)
//! 2. `./config.toml` when present
//! 3. `~/.config/billfetch/config.toml` (Linux/macOS)
//!    `%APPDATA%\billfetch\config.toml` (Windows)
//!
//! Relative directories inside the file are resolved against the directory
//! that contains the file, so a config can travel together with its data.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BillError, Result};
use crate::mailbox::imap::ImapConfig;
use crate::model::outcome::ExtractOptions;

/// Key inside `[extra_params]` naming the password list.
pub const PASSWORD_FILE_KEY: &str = "password_file";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IMAP server host name.
    pub imap_server: String,
    /// IMAP over TLS port.
    pub imap_port: u16,
    /// Login user.
    pub email_user: String,
    /// Login password (usually an app-specific password).
    pub email_pass: String,
    /// Mailbox to poll.
    pub mailbox: String,
    /// Restrict the search to these senders (single value or list).
    pub sender_filter: Option<SenderFilter>,
    /// Staging directory for parsed artifacts.
    pub output_dir: PathBuf,
    /// Destination directory for extracted files.
    pub extract_dir: PathBuf,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Provider-specific options forwarded untouched to extraction.
    pub extra_params: toml::Table,
}

/// `sender_filter` accepts either a string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SenderFilter {
    One(String),
    Many(Vec<String>),
}

impl SenderFilter {
    /// Non-empty sender patterns in declaration order.
    pub fn senders(&self) -> Vec<String> {
        let all = match self {
            Self::One(s) => vec![s.clone()],
            Self::Many(list) => list.clone(),
        };
        all.into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            imap_server: String::new(),
            imap_port: 993,
            email_user: String::new(),
            email_pass: String::new(),
            mailbox: "INBOX".to_string(),
            sender_filter: None,
            output_dir: PathBuf::from("output"),
            extract_dir: PathBuf::from("extract"),
            log_level: "info".to_string(),
            cache_dir: None,
            extra_params: toml::Table::new(),
        }
    }
}

impl Config {
    /// Parse a TOML document and resolve relative paths against `base_dir`.
    pub fn from_toml(contents: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Config =
            toml::from_str(contents).map_err(|e| BillError::Config(e.to_string()))?;
        config.resolve_paths(base_dir);
        Ok(config)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        self.output_dir = resolve_path(&self.output_dir, base_dir);
        self.extract_dir = resolve_path(&self.extract_dir, base_dir);
        if let Some(toml::Value::String(file)) = self.extra_params.get(PASSWORD_FILE_KEY) {
            let resolved = resolve_path(Path::new(file), base_dir);
            self.extra_params.insert(
                PASSWORD_FILE_KEY.to_string(),
                toml::Value::String(resolved.to_string_lossy().into_owned()),
            );
        }
    }

    /// Check the keys needed to reach the mailbox, reporting all gaps at once.
    pub fn validate_imap(&self) -> Result<()> {
        let missing: Vec<String> = [
            ("imap_server", &self.imap_server),
            ("email_user", &self.email_user),
            ("email_pass", &self.email_pass),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| (*key).to_string())
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BillError::MissingParams(missing))
        }
    }

    /// Sender patterns for the unread search (empty = no restriction).
    pub fn senders(&self) -> Vec<String> {
        self.sender_filter
            .as_ref()
            .map(SenderFilter::senders)
            .unwrap_or_default()
    }

    /// Connection settings for the IMAP store.
    pub fn imap(&self) -> ImapConfig {
        ImapConfig {
            host: self.imap_server.clone(),
            port: self.imap_port,
            username: self.email_user.clone(),
            password: self.email_pass.clone(),
            mailbox: self.mailbox.clone(),
        }
    }

    /// The opaque option bag handed to every provider's `extract`.
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions::new(self.extra_params.clone())
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration from `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| BillError::io(path, e))?;
    let base_dir = config_base_dir(path);
    let config = Config::from_toml(&contents, &base_dir)?;
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Determine the config file path when none was given explicitly.
pub fn config_file_path(explicit: Option<&Path>) -> PathBuf {
    // 1. Command line / environment variable
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    // 2. Working directory
    let local = PathBuf::from("config.toml");
    if local.exists() {
        return local;
    }

    // 3. Standard config directory
    dirs::config_dir()
        .map(|d| d.join("billfetch").join("config.toml"))
        .unwrap_or(local)
}

/// Directory used to resolve relative paths in the config file.
fn config_base_dir(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Join `path` onto `base_dir` unless it is already absolute.
pub fn resolve_path(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("billfetch")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("billfetch.log")
}
