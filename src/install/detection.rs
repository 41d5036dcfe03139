//! Installation state detection
//!
//! Determines, from systemd and filesystem evidence, whether this is a fresh
//! install, an update of a native install, or a legacy installation whose
//! data still lives at the container-era paths:
//! - no `autocaliweb.service` unit → fresh install
//! - unit present, no environment file → legacy install, paths must migrate
//! - unit present, environment file present → native install, simple update
//!
//! Missing files are signals here, never errors.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use super::environment::{EnvFile, KEY_CONFIG_DIR, KEY_INGEST_DIR, KEY_INSTALL_DIR, KEY_LIBRARY_DIR};
use crate::config::{InstallConfig, InstallPaths, PRIMARY_UNIT};

/// Installation state, computed fresh on every run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallationState {
    pub is_existing_installation: bool,
    pub is_legacy_migration: bool,
    pub is_update: bool,
    pub current_install_path: PathBuf,
}

impl InstallationState {
    /// Whether the migration planner should look at the legacy paths at all
    ///
    /// Native updates already run from their target paths.
    pub fn wants_migration_plan(&self) -> bool {
        self.is_legacy_migration || !self.is_existing_installation
    }
}

/// Probe the host for an existing installation
pub fn probe(cfg: &InstallConfig) -> InstallationState {
    let unit_path = cfg.unit_path(PRIMARY_UNIT);

    if !unit_path.exists() {
        debug!("No unit at {}, treating as fresh install", unit_path.display());
        return InstallationState {
            is_existing_installation: false,
            is_legacy_migration: false,
            is_update: false,
            current_install_path: cfg.target.install_dir.clone(),
        };
    }

    let env = match EnvFile::load(&cfg.environment_file) {
        Ok(env) => env,
        Err(e) => {
            warn!("Environment file unreadable, treating as absent: {e:#}");
            None
        }
    };

    match env {
        None => {
            info!(
                "Found {} without {}: legacy installation",
                unit_path.display(),
                cfg.environment_file.display()
            );
            InstallationState {
                is_existing_installation: true,
                is_legacy_migration: true,
                is_update: true,
                current_install_path: cfg.legacy.install_dir.clone(),
            }
        }
        Some(env) => {
            let current = match env.get(KEY_INSTALL_DIR) {
                Some(dir) if !dir.is_empty() => PathBuf::from(dir),
                _ => {
                    warn!(
                        "{} has no {KEY_INSTALL_DIR}, assuming {}",
                        cfg.environment_file.display(),
                        cfg.target.install_dir.display()
                    );
                    cfg.target.install_dir.clone()
                }
            };
            info!("Native installation found at {}", current.display());
            InstallationState {
                is_existing_installation: true,
                is_legacy_migration: false,
                is_update: true,
                current_install_path: current,
            }
        }
    }
}

/// Target paths recorded in the environment file, with `cfg.target` filling gaps
pub fn recorded_paths(cfg: &InstallConfig) -> InstallPaths {
    let env = EnvFile::load(&cfg.environment_file).ok().flatten();
    let pick = |key: &str, fallback: &Path| {
        env.as_ref()
            .and_then(|e| e.get(key))
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| fallback.to_path_buf())
    };
    InstallPaths {
        install_dir: pick(KEY_INSTALL_DIR, &cfg.target.install_dir),
        config_dir: pick(KEY_CONFIG_DIR, &cfg.target.config_dir),
        library_dir: pick(KEY_LIBRARY_DIR, &cfg.target.library_dir),
        ingest_dir: pick(KEY_INGEST_DIR, &cfg.target.ingest_dir),
    }
}

/// Install and config dirs, preferring what the environment file recorded
pub fn installed_dirs(cfg: &InstallConfig) -> (PathBuf, PathBuf) {
    let paths = recorded_paths(cfg);
    (paths.install_dir, paths.config_dir)
}

/// Config for this run: a native update keeps the paths it was installed
/// with unless the operator named new ones.
pub fn for_state(cfg: &InstallConfig, state: &InstallationState) -> InstallConfig {
    let mut resolved = cfg.clone();
    if state.is_existing_installation && !state.is_legacy_migration && !cfg.target_overridden {
        resolved.target = recorded_paths(cfg);
        if resolved.target != cfg.target {
            info!("Updating in place at {}", resolved.target.install_dir.display());
        }
    }
    resolved
}
