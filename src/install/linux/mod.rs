//! Linux host operations: accounts, packages, units, Python runtime

pub mod account;
pub(crate) mod file_ops;
pub mod packages;
pub mod python;
pub mod unit;

use super::InstallerError;

/// Mutating installs need root; everything goes to system paths
pub fn check_privileges() -> Result<(), InstallerError> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(InstallerError::PermissionDenied)
    }
}
