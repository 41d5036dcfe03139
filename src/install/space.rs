//! Free-space probing for migration targets

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

const MIB: u64 = 1024 * 1024;

/// Filesystem queries used by the pre-flight space check
pub trait SpaceProbe {
    /// Mount point of the filesystem holding `path` (which must exist)
    fn mount_point(&self, path: &Path) -> io::Result<PathBuf>;
    /// Space available to unprivileged users on the filesystem at `mount`, in MiB
    fn available_mb(&self, mount: &Path) -> io::Result<u64>;
}

/// `statvfs(2)`-backed probe
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    fn mount_point(&self, path: &Path) -> io::Result<PathBuf> {
        let path = path.canonicalize()?;
        let dev = std::fs::metadata(&path)?.dev();

        let mut mount = path.clone();
        for ancestor in path.ancestors().skip(1) {
            if std::fs::metadata(ancestor)?.dev() != dev {
                break;
            }
            mount = ancestor.to_path_buf();
        }
        Ok(mount)
    }

    fn available_mb(&self, mount: &Path) -> io::Result<u64> {
        let stat = nix::sys::statvfs::statvfs(mount).map_err(io::Error::from)?;
        let bytes = (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64);
        Ok(bytes / MIB)
    }
}

/// Closest ancestor of `path` (or `path` itself) that exists
pub fn nearest_existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Whole MiB, rounded up
pub fn bytes_to_mb(bytes: u64) -> u64 {
    bytes.div_ceil(MIB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestor_of_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c");
        assert_eq!(nearest_existing_ancestor(&target), dir.path());
    }

    #[test]
    fn mb_rounds_up() {
        assert_eq!(bytes_to_mb(0), 0);
        assert_eq!(bytes_to_mb(1), 1);
        assert_eq!(bytes_to_mb(MIB), 1);
        assert_eq!(bytes_to_mb(MIB + 1), 2);
    }

    #[test]
    fn temp_dir_has_a_mount_point() {
        let dir = tempfile::tempdir().unwrap();
        let mount = StatvfsProbe.mount_point(dir.path()).unwrap();
        assert!(dir.path().canonicalize().unwrap().starts_with(&mount));
        StatvfsProbe.available_mb(&mount).unwrap();
    }
}
