//! Extraction results and the option bag forwarded to extractors.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::PASSWORD_FILE_KEY;

/// What a provider reports for one staged artifact.
///
/// Equivalent to the `(applicable, success)` pair:
/// `NotApplicable` = `(false, false)`, `Extracted` = `(true, true)`,
/// `Failed` = `(true, false)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractOutcome {
    /// The filename does not carry this provider's prefix and suffix
    /// (or the file is gone); another provider may handle it.
    NotApplicable,
    /// Output files were written to the extraction directory.
    Extracted,
    /// This provider owns the file but could not extract it; no other
    /// provider should retry.
    Failed,
}

impl ExtractOutcome {
    pub fn is_applicable(self) -> bool {
        !matches!(self, Self::NotApplicable)
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Extracted)
    }

    /// The `(applicable, success)` pair.
    pub fn as_pair(self) -> (bool, bool) {
        (self.is_applicable(), self.is_success())
    }
}

/// Provider-specific options from `[extra_params]`.
///
/// The core never interprets these beyond handing them to `extract`.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    params: toml::Table,
}

impl ExtractOptions {
    pub fn new(params: toml::Table) -> Self {
        Self { params }
    }

    /// Builder-style setter, mostly for tests and embedding.
    pub fn with(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.params.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(toml::Value::as_str)
    }

    /// `password_file`, if configured and non-blank.
    pub fn password_file(&self) -> Option<PathBuf> {
        self.get_str(PASSWORD_FILE_KEY)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }
}
