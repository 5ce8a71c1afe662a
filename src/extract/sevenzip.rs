//! External 7-Zip backend, for archives the in-process reader cannot open.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use super::ArchiveBackend;
use crate::error::{BillError, Result};
use crate::model::ExtractOptions;

/// Key inside `[extra_params]` overriding the tool name or path.
pub const SEVENZIP_BIN_KEY: &str = "sevenzip_bin";

/// Tool looked up on `PATH` when nothing is configured.
pub const DEFAULT_TOOL: &str = "7z";

/// Runs `<tool> x <archive> -o<dir> -y -p<password>` once per attempt.
#[derive(Debug, Clone)]
pub struct SevenZipBackend {
    tool: PathBuf,
}

impl SevenZipBackend {
    /// Use an already resolved executable.
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    /// Resolve the tool from the options (`sevenzip_bin`) or `PATH`.
    pub fn locate(options: &ExtractOptions) -> Result<Self> {
        let name = options
            .get_str(SEVENZIP_BIN_KEY)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_TOOL);

        find_executable(name)
            .map(Self::new)
            .ok_or_else(|| BillError::ToolNotFound(name.to_string()))
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }
}

impl ArchiveBackend for SevenZipBackend {
    fn name(&self) -> &str {
        "7z"
    }

    fn try_password(&self, archive: &Path, password: &str, dest: &Path) -> Result<bool> {
        let mut out_dir = OsString::from("-o");
        out_dir.push(dest);

        let output = Command::new(&self.tool)
            .arg("x")
            .arg(archive)
            .arg(out_dir)
            .arg("-y")
            .arg(format!("-p{password}"))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| BillError::io(&self.tool, e))?;

        if output.status.success() {
            return Ok(true);
        }
        debug!(
            tool = %self.tool().display(),
            archive = %archive.display(),
            status = ?output.status.code(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "7z attempt failed"
        );
        Ok(false)
    }
}

/// Locate `name` the way a shell would: as given when it contains a path
/// separator, otherwise on `PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    find_executable_in(name, std::env::var_os("PATH").as_deref())
}

fn find_executable_in(name: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let given = Path::new(name);
    if given.components().count() > 1 || given.is_absolute() {
        return is_executable(given).then(|| given.to_path_buf());
    }

    let path_var = path_var?;
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| candidates(&dir, name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(windows)]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(name), dir.join(format!("{name}.exe"))]
}

#[cfg(not(windows))]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
