//! The ordered provider list and the extraction stage over the staging
//! directory.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::{BillError, Result};
use crate::model::{ExtractOptions, ExtractOutcome};
use crate::provider::{Alipay, Cmbcc, Fetcher, Provider, Wechat};

/// Providers in dispatch order. Built once at startup; never reordered.
pub struct Registry {
    providers: Vec<Box<dyn Provider>>,
}

/// Counters from one pass over the staging directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    /// Artifacts some provider extracted.
    pub extracted: usize,
    /// Artifacts a provider claimed but failed on.
    pub failed: usize,
    /// Files no provider claimed.
    pub skipped: usize,
    /// Artifacts removed after a successful extraction.
    pub deleted: usize,
}

impl Registry {
    pub fn new(providers: Vec<Box<dyn Provider>>) -> Self {
        Self { providers }
    }

    /// alipay, cmbcc, wechat, downloading over HTTP.
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(vec![
            Box::new(Alipay),
            Box::new(Cmbcc),
            Box::new(Wechat::with_http()?),
        ]))
    }

    /// The built-in providers with a caller-supplied downloader.
    pub fn with_fetcher(fetcher: Box<dyn Fetcher>) -> Self {
        Self::new(vec![
            Box::new(Alipay),
            Box::new(Cmbcc),
            Box::new(Wechat::new(fetcher)),
        ])
    }

    pub fn providers(&self) -> impl Iterator<Item = &dyn Provider> {
        self.providers.iter().map(|p| p.as_ref())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// First provider, in registration order, whose `matches` holds.
    pub fn find(&self, subject: &str, sender: &str) -> Option<&dyn Provider> {
        self.providers().find(|p| p.matches(subject, sender))
    }

    /// Provider by identifier.
    pub fn get(&self, name: &str) -> Option<&dyn Provider> {
        self.providers().find(|p| p.name() == name)
    }

    /// Offer `artifact` to each provider in turn until one finds it applicable.
    ///
    /// A failure from the owning provider is final; later providers are not asked.
    pub fn extract_file(
        &self,
        artifact: &Path,
        extract_dir: &Path,
        options: &ExtractOptions,
    ) -> Option<(&dyn Provider, ExtractOutcome)> {
        self.providers().find_map(|provider| {
            let outcome = provider.extract(artifact, extract_dir, options);
            outcome.is_applicable().then_some((provider, outcome))
        })
    }

    /// Extract every file in `output_dir`, deleting each successfully
    /// extracted artifact unless `keep` is set.
    pub fn extract_all(
        &self,
        output_dir: &Path,
        extract_dir: &Path,
        options: &ExtractOptions,
        keep: bool,
    ) -> Result<ExtractStats> {
        let mut stats = ExtractStats::default();

        for artifact in staged_files(output_dir)? {
            let name = artifact
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match self.extract_file(&artifact, extract_dir, options) {
                None => {
                    debug!(file = %name, "No provider for file");
                    stats.skipped += 1;
                }
                Some((provider, ExtractOutcome::Failed)) => {
                    error!(file = %name, provider = provider.name(), "Extract failed");
                    stats.failed += 1;
                }
                Some((provider, _)) => {
                    stats.extracted += 1;
                    if keep {
                        info!(file = %name, provider = provider.name(), "Extracted (keeping original file)");
                    } else {
                        match std::fs::remove_file(&artifact) {
                            Ok(()) => {
                                stats.deleted += 1;
                                info!(file = %name, provider = provider.name(), "Extracted and deleted");
                            }
                            Err(e) => error!(file = %name, error = %e, "Failed to delete artifact"),
                        }
                    }
                }
            }
        }

        Ok(stats)
    }
}

/// Regular files directly inside `dir`, sorted by name.
fn staged_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| BillError::io(dir, e))? {
        let entry = entry.map_err(|e| BillError::io(dir, e))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
