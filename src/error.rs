//! Centralized error types for billfetch.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the billfetch library.
#[derive(Error, Debug)]
pub enum BillError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file is malformed or contains an invalid value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required configuration keys are missing or empty.
    #[error("Missing or empty required parameters: {}", .0.join(", "))]
    MissingParams(Vec<String>),

    /// `password_file` was not set in the extract options.
    #[error("No password_file configured")]
    PasswordFileUnset,

    /// The configured password file does not exist.
    #[error("Password file not found: {0}")]
    PasswordFileMissing(PathBuf),

    /// The password file exists but holds no usable line.
    #[error("No passwords found in password file: {0}")]
    EmptyPasswordList(PathBuf),

    /// The external archive tool could not be located.
    #[error("Archive tool '{0}' not found in PATH")]
    ToolNotFound(String),

    /// Every candidate password was tried and none opened the archive.
    #[error("No valid password for '{archive}' after {tried} attempt(s)")]
    PasswordsExhausted { archive: PathBuf, tried: usize },

    /// The archive is structurally unreadable.
    #[error("Archive error in '{path}': {reason}")]
    Archive { path: PathBuf, reason: String },

    /// The message carries no attachment part.
    #[error("No attachment found")]
    NoAttachment,

    /// The message carries no `text/html` part.
    #[error("No HTML body found")]
    NoHtmlBody,

    /// The HTML body has no download anchor.
    #[error("No download link found")]
    NoDownloadLink,

    /// A download returned a non-success status.
    #[error("Download failed for {url}: HTTP {status}")]
    Download { url: String, status: u16 },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A MIME decoding error.
    #[error("MIME decoding error: {0}")]
    Mime(String),

    /// The IMAP server rejected a command or sent something unparseable.
    #[error("IMAP error: {0}")]
    Imap(String),

    /// TLS setup failed.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Convenience alias for `Result<T, BillError>`.
pub type Result<T> = std::result::Result<T, BillError>;

impl BillError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error stems from missing or unusable configuration rather
    /// than from the data being processed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::MissingParams(_)
                | Self::PasswordFileUnset
                | Self::PasswordFileMissing(_)
                | Self::EmptyPasswordList(_)
                | Self::ToolNotFound(_)
        )
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `BillError`
/// when no path context is available. Prefer `BillError::io`.
impl From<std::io::Error> for BillError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
