//! In-process ZIP decryption (ZipCrypto and AES).

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use super::ArchiveBackend;
use crate::error::{BillError, Result};
use crate::parser::header::decode_utf8_or_gb18030;

/// Opens ZIP archives with the `zip` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipBackend;

impl ArchiveBackend for ZipBackend {
    fn name(&self) -> &str {
        "zip"
    }

    fn try_password(&self, archive: &Path, password: &str, dest: &Path) -> Result<bool> {
        let file = File::open(archive).map_err(|e| BillError::io(archive, e))?;
        let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| BillError::Archive {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        })?;

        for idx in 0..zip.len() {
            let mut entry = match zip.by_index_decrypt(idx, password.as_bytes()) {
                Ok(entry) => entry,
                Err(ZipError::InvalidPassword) => return Ok(false),
                Err(e) => {
                    debug!(archive = %archive.display(), entry = idx, error = %e, "Entry refused");
                    return Ok(false);
                }
            };

            let Some(relative) = entry_path(entry.name_raw()) else {
                continue;
            };
            let target = dest.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&target).map_err(|e| BillError::io(&target, e))?;
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| BillError::io(parent, e))?;
            }

            let mut out = File::create(&target).map_err(|e| BillError::io(&target, e))?;
            // ZipCrypto lets roughly one wrong password in 256 past the header
            // check; the CRC mismatch then surfaces here.
            if let Err(e) = std::io::copy(&mut entry, &mut out) {
                debug!(archive = %archive.display(), entry = idx, error = %e, "Entry failed to decrypt");
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Map a raw entry name to a path confined below the extraction root.
///
/// Names without the UTF-8 flag are GB18030 in practice. Empty, `.`, `..`
/// and root components are dropped.
fn entry_path(raw: &[u8]) -> Option<PathBuf> {
    let name = decode_utf8_or_gb18030(raw);
    let path: PathBuf = name
        .split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != "." && *c != ".." && !c.ends_with(':'))
        .collect();
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}
