//! Uninstallation and cleanup
//!
//! Units and the environment file always go. Install and config directories
//! only go with `--purge`. The library is never touched.

use std::fs;
use std::path::Path;

use anyhow::Result;
use log::{info, warn};

use super::detection::installed_dirs;
use super::linux::{check_privileges, unit};
use super::wizard::Operator;
use super::InstallerError;
use crate::config::{InstallConfig, MANAGED_UNITS};
use crate::control::{self, KillPolicy, ProcessTable, UnitManager};

fn remove_tree(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => info!("Removed {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {e}", dir.display()),
    }
}

/// Remove everything the installer created
pub async fn uninstall(
    cfg: &InstallConfig,
    purge: bool,
    operator: &dyn Operator,
    manager: &dyn UnitManager,
    table: &dyn ProcessTable,
    users: &[String],
) -> Result<()> {
    let (install_dir, config_dir) = installed_dirs(cfg);
    let question = if purge {
        format!(
            "Remove Autocaliweb services and delete {} and {}?",
            install_dir.display(),
            config_dir.display()
        )
    } else {
        "Remove Autocaliweb services?".to_string()
    };
    if !operator.confirm(&question, false)? {
        return Err(InstallerError::Declined.into());
    }

    info!("Removing Autocaliweb services");
    for e in control::stop_units_strict(MANAGED_UNITS, manager, table, users, &KillPolicy::default()).await {
        warn!("{e:#}");
    }

    for u in MANAGED_UNITS {
        match unit::remove_unit(cfg, u.name) {
            Ok(true) => info!("Removed {}", cfg.unit_path(u.name).display()),
            Ok(false) => {}
            Err(e) => warn!("Failed to remove unit {}: {e}", u.name),
        }
    }
    if let Err(e) = manager.daemon_reload() {
        warn!("systemctl daemon-reload failed: {e:#}");
    }

    match fs::remove_file(&cfg.environment_file) {
        Ok(()) => info!("Removed {}", cfg.environment_file.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {e}", cfg.environment_file.display()),
    }

    if purge {
        remove_tree(&install_dir);
        remove_tree(&config_dir);
    }
    info!("Library data in {} was left untouched", cfg.target.library_dir.display());
    Ok(())
}

/// Root check, then [`uninstall`] against the live system
pub async fn run_uninstall(cfg: &InstallConfig, purge: bool) -> Result<()> {
    check_privileges()?;
    let users = super::identity::dedup_preserving_order([cfg.service_user.clone(), cfg.legacy_user.clone()]);
    let operator = super::wizard::operator_for(cfg);
    uninstall(
        cfg,
        purge,
        operator.as_ref(),
        &control::Systemctl,
        &control::ProcTable,
        &users,
    )
    .await
}
