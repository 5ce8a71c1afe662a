//! Password-guess extraction.
//!
//! An archive is opened by trying candidate passwords one at a time, most
//! recently added first. Every attempt unpacks into its own scratch
//! directory inside the destination; the first attempt that succeeds has its
//! files moved out (renamed with the provider prefix) and the search stops.
//! Scratch directories are removed when the attempt ends, whatever the result.

pub mod sevenzip;
pub mod zip_backend;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{BillError, Result};
use crate::model::ExtractOptions;

pub use sevenzip::SevenZipBackend;
pub use zip_backend::ZipBackend;

/// One way of opening an encrypted archive.
pub trait ArchiveBackend {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Unpack `archive` into `dest` using `password`.
    ///
    /// `Ok(false)` is a miss (wrong password, or the archive refused to open
    /// with it); the caller moves on to the next candidate. `Err` is reserved
    /// for failures no other password could fix.
    fn try_password(&self, archive: &Path, password: &str, dest: &Path) -> Result<bool>;
}

/// Candidate passwords, in file order.
#[derive(Debug, Clone)]
pub struct PasswordList {
    source: PathBuf,
    entries: Vec<String>,
}

impl PasswordList {
    /// Read the file named by `password_file` in the extract options.
    pub fn from_options(options: &ExtractOptions) -> Result<Self> {
        let path = options.password_file().ok_or(BillError::PasswordFileUnset)?;
        Self::load(&path)
    }

    /// Read a password file: one password per line, blank lines ignored,
    /// surrounding whitespace trimmed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(BillError::PasswordFileMissing(path.to_path_buf()));
        }
        let bytes = std::fs::read(path).map_err(|e| BillError::io(path, e))?;
        let contents = String::from_utf8_lossy(&bytes);
        Self::parse(path, &contents)
    }

    /// Build a list from file contents already in memory.
    pub fn parse(source: &Path, contents: &str) -> Result<Self> {
        let entries: Vec<String> = contents
            .trim_start_matches('\u{feff}')
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if entries.is_empty() {
            return Err(BillError::EmptyPasswordList(source.to_path_buf()));
        }
        Ok(Self {
            source: source.to_path_buf(),
            entries,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The order passwords are tried in: last line of the file first.
    pub fn trial_order(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().rev().map(String::as_str)
    }
}

/// Run `attempt` over `candidates` in order and stop at the first hit.
///
/// Returns the zero-based index of the winning candidate with its value,
/// `None` when every candidate missed. An `Err` from `attempt` ends the
/// search immediately.
pub fn first_success<T, R>(
    candidates: impl IntoIterator<Item = T>,
    mut attempt: impl FnMut(T) -> Result<Option<R>>,
) -> Result<Option<(usize, R)>> {
    for (idx, candidate) in candidates.into_iter().enumerate() {
        if let Some(found) = attempt(candidate)? {
            return Ok(Some((idx, found)));
        }
    }
    Ok(None)
}

/// A successful unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unlocked {
    /// Files written to the extraction directory, sorted.
    pub files: Vec<PathBuf>,
    /// Passwords tried, including the one that worked.
    pub attempts: usize,
}

/// Try every password against `archive` and move the first successful
/// extraction into `extract_dir`, renaming each file to `{prefix}{name}`.
pub fn unlock(
    backend: &dyn ArchiveBackend,
    archive: &Path,
    passwords: &PasswordList,
    extract_dir: &Path,
    prefix: &str,
) -> Result<Unlocked> {
    std::fs::create_dir_all(extract_dir).map_err(|e| BillError::io(extract_dir, e))?;

    let hit = first_success(passwords.trial_order(), |password| {
        let workspace = tempfile::Builder::new()
            .prefix(".unpack-")
            .tempdir_in(extract_dir)
            .map_err(|e| BillError::io(extract_dir, e))?;

        if backend.try_password(archive, password, workspace.path())? {
            relocate(workspace.path(), extract_dir, prefix).map(Some)
        } else {
            debug!(backend = backend.name(), archive = %archive.display(), "Password rejected");
            Ok(None)
        }
    })?;

    match hit {
        Some((idx, files)) => {
            info!(
                backend = backend.name(),
                archive = %archive.display(),
                candidate = idx + 1,
                files = files.len(),
                "Archive unlocked"
            );
            Ok(Unlocked {
                files,
                attempts: idx + 1,
            })
        }
        None => {
            debug!(
                backend = backend.name(),
                archive = %archive.display(),
                passwords = %passwords.source().display(),
                tried = passwords.len(),
                "No password matched"
            );
            Err(BillError::PasswordsExhausted {
                archive: archive.to_path_buf(),
                tried: passwords.len(),
            })
        }
    }
}

/// Move every regular file under `from` (recursively) into `to`, flattened
/// and renamed to `{prefix}{file name}`. Existing files are replaced.
pub fn relocate(from: &Path, to: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut moved = Vec::new();
    relocate_into(from, to, prefix, &mut moved)?;
    moved.sort();
    Ok(moved)
}

fn relocate_into(dir: &Path, to: &Path, prefix: &str, moved: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| BillError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| BillError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| BillError::io(&path, e))?;

        if file_type.is_dir() {
            relocate_into(&path, to, prefix, moved)?;
        } else if file_type.is_file() {
            let mut name = std::ffi::OsString::from(prefix);
            name.push(entry.file_name());
            let dest = to.join(name);
            if dest.exists() {
                std::fs::remove_file(&dest).map_err(|e| BillError::io(&dest, e))?;
            }
            std::fs::rename(&path, &dest).map_err(|e| BillError::io(&path, e))?;
            debug!(from = %path.display(), to = %dest.display(), "Moved extracted file");
            moved.push(dest);
        }
    }
    Ok(())
}
