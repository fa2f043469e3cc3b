//! Owner-only persistence helpers.
//!
//! Key files and configuration documents are readable by their owner only.
//! Modes are set at creation time and re-applied to existing files so a
//! loosened mode does not survive a rewrite.

use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid};
use tracing::{debug, warn};

use crate::error::Result;

/// Mode for secret files and documents.
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Mode for directories holding secret files.
pub const PRIVATE_DIR_MODE: u32 = 0o700;

/// Mode for directories created on the way to a private one.
pub const SHARED_DIR_MODE: u32 = 0o755;

/// Creates whatever is missing of `dir` and its ancestors.
///
/// Ancestors get 0755 and `dir` itself 0700. Existing directories are left
/// alone. Returns the directories created, outermost first, so an elevated
/// caller can hand every one of them to the invoking user.
pub fn create_missing_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut missing: Vec<&Path> = dir
        .ancestors()
        .filter(|p| !p.as_os_str().is_empty())
        .take_while(|p| !p.exists())
        .collect();
    missing.reverse();

    let mut created = Vec::with_capacity(missing.len());
    for path in missing {
        let mode = if path == dir { PRIVATE_DIR_MODE } else { SHARED_DIR_MODE };
        match DirBuilder::new().mode(mode).create(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => continue,
            Err(e) => return Err(e.into()),
        }
        // The umask may have narrowed `mode`.
        fs::set_permissions(path, Permissions::from_mode(mode))?;
        created.push(path.to_path_buf());
    }
    Ok(created)
}

/// Creates `dir` like [`create_missing_dirs`] and tightens it to 0700 if it
/// already existed.
///
/// Returns the directories created, outermost first.
pub fn ensure_private_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let created = create_missing_dirs(dir)?;
    if created.is_empty() {
        fs::set_permissions(dir, Permissions::from_mode(PRIVATE_DIR_MODE))?;
    }
    Ok(created)
}

/// Creates the parent directory of `path` if it is missing.
///
/// Existing parents are left alone; `/etc/wireguard` and friends have modes
/// of their own.
fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_missing_dirs(parent)?;
    }
    Ok(())
}

/// Writes `contents` to `path`, replacing it, with mode 0600.
pub fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(PRIVATE_FILE_MODE)
        .open(path)?;
    // `mode` only applies when the file is created.
    file.set_permissions(Permissions::from_mode(PRIVATE_FILE_MODE))?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

/// Appends `contents` to an existing file without touching prior bytes.
pub fn append_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.set_permissions(Permissions::from_mode(PRIVATE_FILE_MODE))?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

/// Returns the permission bits of `path`.
pub fn mode_of(path: &Path) -> Result<u32> {
    Ok(fs::metadata(path)?.permissions().mode() & 0o777)
}

/// The user an elevated process acts on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    /// User id.
    pub uid: u32,
    /// Group id.
    pub gid: u32,
}

impl Owner {
    /// Reads `SUDO_UID`/`SUDO_GID`, if both are set and numeric.
    #[must_use]
    pub fn from_sudo_env() -> Option<Self> {
        let uid = std::env::var("SUDO_UID").ok()?.parse().ok()?;
        let gid = std::env::var("SUDO_GID").ok()?.parse().ok()?;
        Some(Self { uid, gid })
    }

    /// Hands `path` to this owner.
    ///
    /// Failure is logged and ignored: the artifact exists and works, it is
    /// just owned by root.
    pub fn adopt(&self, path: &Path) {
        match nix::unistd::chown(path, Some(Uid::from_raw(self.uid)), Some(Gid::from_raw(self.gid))) {
            Ok(()) => debug!(path = %path.display(), uid = self.uid, "ownership corrected"),
            Err(e) => warn!(path = %path.display(), error = %e, "could not correct ownership"),
        }
    }

    /// Hands each of `paths` to this owner.
    pub fn adopt_all(&self, paths: &[PathBuf]) {
        for path in paths {
            self.adopt(path);
        }
    }
}
