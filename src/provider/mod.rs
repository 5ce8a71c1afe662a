//! Payment providers: how each one is recognised, what it stages from a
//! message, and how its staged artifacts are turned into bill files.
//!
//! Every provider owns a filename prefix (`{name}_`). Artifacts carry that
//! prefix plus the provider's suffix, so the extraction stage can route a
//! file from its name alone.

pub mod alipay;
pub mod cmbcc;
pub mod wechat;

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::error::{BillError, Result};
use crate::model::{ExtractOptions, ExtractOutcome, Message};
use crate::parser::header::sanitize_filename;

pub use alipay::Alipay;
pub use cmbcc::Cmbcc;
pub use wechat::{Fetcher, HttpFetcher, Wechat};

/// One payment-notification source.
///
/// Implementors supply the fallible `stage` / `unpack` steps; the provided
/// `parse` / `extract` methods are the boundary the pipeline calls, and
/// they turn every error into a logged failure result.
pub trait Provider {
    /// Identifier, also the artifact prefix (`alipay`, `cmbcc`, `wechat`).
    fn name(&self) -> &'static str;

    /// Text that identifies this provider's mail in a subject or sender.
    fn label(&self) -> &'static str;

    /// Suffix of the artifacts this provider knows how to extract.
    fn artifact_suffix(&self) -> &'static str;

    /// Write this provider's artifact(s) for `message` into `output_dir`.
    fn stage(&self, message: &Message, output_dir: &Path) -> Result<Vec<PathBuf>>;

    /// Turn an accepted artifact into output files inside `extract_dir`.
    fn unpack(&self, artifact: &Path, extract_dir: &Path, options: &ExtractOptions)
        -> Result<Vec<PathBuf>>;

    /// Case-sensitive containment of [`label`](Self::label) in subject or sender.
    fn matches(&self, subject: &str, sender: &str) -> bool {
        subject.contains(self.label()) || sender.contains(self.label())
    }

    /// Filename prefix shared by every file this provider writes.
    fn prefix(&self) -> String {
        format!("{}_", self.name())
    }

    /// Whether the artifact's file name carries this provider's prefix and suffix.
    fn accepts(&self, artifact: &Path) -> bool {
        artifact
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| {
                name.starts_with(&self.prefix()) && name.ends_with(self.artifact_suffix())
            })
    }

    /// Stage `message`, reporting success as a flag.
    fn parse(&self, message: &Message, output_dir: &Path) -> bool {
        match self.stage(message, output_dir) {
            Ok(paths) => {
                for path in &paths {
                    info!(provider = self.name(), path = %path.display(), "Artifact saved");
                }
                true
            }
            Err(e) => {
                warn!(provider = self.name(), uid = %message.id, error = %e, "Parse failed");
                false
            }
        }
    }

    /// Extract one artifact.
    ///
    /// Returns `NotApplicable` when the name is not ours or the file is
    /// gone, so re-running on an already consumed artifact is harmless.
    fn extract(&self, artifact: &Path, extract_dir: &Path, options: &ExtractOptions) -> ExtractOutcome {
        if !self.accepts(artifact) || !artifact.is_file() {
            return ExtractOutcome::NotApplicable;
        }

        match self.unpack(artifact, extract_dir, options) {
            Ok(files) => {
                info!(
                    provider = self.name(),
                    artifact = %artifact.display(),
                    files = files.len(),
                    "Extracted"
                );
                ExtractOutcome::Extracted
            }
            Err(e) if e.is_configuration() => {
                error!(provider = self.name(), artifact = %artifact.display(), error = %e, "Extraction not configured");
                ExtractOutcome::Failed
            }
            Err(e @ BillError::PasswordsExhausted { .. }) => {
                warn!(provider = self.name(), error = %e, "No valid password");
                ExtractOutcome::Failed
            }
            Err(e) => {
                warn!(provider = self.name(), artifact = %artifact.display(), error = %e, "Extraction failed");
                ExtractOutcome::Failed
            }
        }
    }
}

/// Write `data` to `output_dir/{prefix}{name}`, with `name` made filesystem-safe.
pub(crate) fn write_artifact(
    output_dir: &Path,
    prefix: &str,
    name: &str,
    data: &[u8],
) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir).map_err(|e| BillError::io(output_dir, e))?;
    let path = output_dir.join(format!("{prefix}{}", sanitize_filename(name)));
    std::fs::write(&path, data).map_err(|e| BillError::io(&path, e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    impl Provider for Dummy {
        fn name(&self) -> &'static str {
            "dummy"
        }
        fn label(&self) -> &'static str {
            "账单"
        }
        fn artifact_suffix(&self) -> &'static str {
            ".bin"
        }
        fn stage(&self, _message: &Message, _output_dir: &Path) -> Result<Vec<PathBuf>> {
            Err(BillError::NoAttachment)
        }
        fn unpack(&self, _a: &Path, _e: &Path, _o: &ExtractOptions) -> Result<Vec<PathBuf>> {
            Err(BillError::PasswordFileUnset)
        }
    }

    #[test]
    fn test_matches_subject_or_sender() {
        assert!(Dummy.matches("您的账单", ""));
        assert!(Dummy.matches("", "账单中心 <bill@example.com>"));
        assert!(!Dummy.matches("Statement", "bill@example.com"));
    }

    #[test]
    fn test_accepts_uses_basename() {
        assert!(Dummy.accepts(Path::new("/staging/dummy_1.bin")));
        assert!(!Dummy.accepts(Path::new("/dummy_dir/other_1.bin")));
        assert!(!Dummy.accepts(Path::new("dummy_1.zip")));
    }

    #[test]
    fn test_parse_boundary_swallows_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!Dummy.parse(&Message::default(), dir.path()));
    }

    #[test]
    fn test_extract_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("dummy_1.bin");
        assert_eq!(
            Dummy.extract(&artifact, dir.path(), &ExtractOptions::default()),
            ExtractOutcome::NotApplicable
        );
        std::fs::write(&artifact, b"x").unwrap();
        assert_eq!(
            Dummy.extract(&artifact, dir.path(), &ExtractOptions::default()),
            ExtractOutcome::Failed
        );
        assert!(artifact.exists());
    }

    #[test]
    fn test_write_artifact_sanitizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), "dummy_", "../evil.bin", b"x").unwrap();
        assert_eq!(path, dir.path().join("dummy__evil.bin"));
        assert!(path.exists());
    }
}
