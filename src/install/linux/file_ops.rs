//! Filesystem helpers for installer-owned files.
//!
//! Config and unit files are written atomically to prevent half-written
//! files if the installer is interrupted; ownership fix-ups walk the tree
//! without following symlinks.

use std::fs;
use std::io::Write;
use std::path::Path;

use nix::unistd::{Gid, Uid};
use walkdir::WalkDir;

use crate::install::InstallerError;

/// Write file atomically to prevent corruption
pub(crate) fn write_file_atomic(path: &Path, content: &str) -> Result<(), InstallerError> {
    let temp_path = path.with_extension("tmp");

    {
        let mut file = fs::File::create(&temp_path).map_err(|e| {
            InstallerError::System(format!("Failed to create temp file {}: {}", temp_path.display(), e))
        })?;

        file.write_all(content.as_bytes())
            .map_err(|e| InstallerError::System(format!("Failed to write temp file: {}", e)))?;

        file.sync_all()
            .map_err(|e| InstallerError::System(format!("Failed to sync temp file: {}", e)))?;
    }

    fs::rename(&temp_path, path)
        .map_err(|e| InstallerError::System(format!("Failed to rename temp file: {}", e)))?;

    Ok(())
}

/// Set permission bits on a single path
pub(crate) fn set_mode(path: &Path, mode: u32) -> Result<(), InstallerError> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(mode);
    fs::set_permissions(path, perms)?;
    Ok(())
}

/// Resolve a user/group pair to numeric ids
pub(crate) fn resolve_owner(user: &str, group: &str) -> Result<(Uid, Gid), InstallerError> {
    let uid = nix::unistd::User::from_name(user)
        .map_err(|e| InstallerError::System(format!("Failed to look up user {user}: {e}")))?
        .ok_or_else(|| InstallerError::System(format!("User {user} does not exist")))?
        .uid;
    let gid = nix::unistd::Group::from_name(group)
        .map_err(|e| InstallerError::System(format!("Failed to look up group {group}: {e}")))?
        .ok_or_else(|| InstallerError::System(format!("Group {group} does not exist")))?
        .gid;
    Ok((uid, gid))
}

/// `chown -R` without dereferencing symlinks
pub(crate) fn chown_recursive(root: &Path, uid: Uid, gid: Gid) -> Result<u64, InstallerError> {
    let mut changed = 0u64;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            InstallerError::System(format!("Failed to walk {}: {}", root.display(), e))
        })?;
        std::os::unix::fs::lchown(entry.path(), Some(uid.as_raw()), Some(gid.as_raw())).map_err(|e| {
            InstallerError::System(format!("Failed to chown {}: {}", entry.path().display(), e))
        })?;
        changed += 1;
    }
    Ok(changed)
}

/// Total apparent size of regular files under `root`, in bytes
pub(crate) fn dir_size_bytes(root: &Path) -> u64 {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// True if `path` is a regular file with non-zero length
pub(crate) fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
