//! Installer configuration, built once from CLI arguments and the environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::{InstallArgs, PathArgs};
use crate::install::identity::home_dir_of;

/// Persisted `KEY=VALUE` environment file shared with the managed services
pub const ENVIRONMENT_FILE: &str = "/etc/autocaliweb/environment";
/// Directory the unit files are written to
pub const UNIT_DIR: &str = "/etc/systemd/system";
/// Unit whose presence marks an existing installation
pub const PRIMARY_UNIT: &str = "autocaliweb";

pub const DEFAULT_SERVICE_USER: &str = "autocaliweb";
/// Account the legacy container images ran everything as
pub const LEGACY_SERVICE_USER: &str = "abc";

pub const DEFAULT_LOG_FILE: &str = "/var/log/autocaliweb/install.log";
const FALLBACK_LOG_DIR: &str = "/var/log/autocaliweb";

/// A long-running unit managed by the installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedUnit {
    pub name: &'static str,
    /// Entry point relative to the install dir; the unit is only started if it exists
    pub entry_point: &'static str,
    /// Command-line fragment identifying the unit's worker processes
    pub worker_pattern: &'static str,
}

pub const MANAGED_UNITS: &[ManagedUnit] = &[
    ManagedUnit {
        name: "autocaliweb",
        entry_point: "cps.py",
        worker_pattern: "cps.py",
    },
    ManagedUnit {
        name: "acw-ingest-service",
        entry_point: "scripts/ingest_watcher.sh",
        worker_pattern: "ingest_watcher.sh",
    },
    ManagedUnit {
        name: "acw-auto-zipper",
        entry_point: "scripts/auto_zipper_wrapper.sh",
        worker_pattern: "auto_zipper_wrapper.sh",
    },
];

/// The four directories an installation spans
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallPaths {
    pub install_dir: PathBuf,
    pub config_dir: PathBuf,
    pub library_dir: PathBuf,
    pub ingest_dir: PathBuf,
}

impl InstallPaths {
    /// Fixed locations used by the containerized deployments
    pub fn legacy() -> Self {
        Self {
            install_dir: PathBuf::from("/app/autocaliweb"),
            config_dir: PathBuf::from("/config"),
            library_dir: PathBuf::from("/calibre-library"),
            ingest_dir: PathBuf::from("/acw-book-ingest"),
        }
    }

    /// Native defaults when no override is given
    pub fn native() -> Self {
        Self {
            install_dir: PathBuf::from("/opt/autocaliweb"),
            config_dir: PathBuf::from("/var/lib/autocaliweb"),
            library_dir: PathBuf::from("/opt/calibre-library"),
            ingest_dir: PathBuf::from("/opt/acw-book-ingest"),
        }
    }

    /// Native defaults with per-path overrides applied
    pub fn from_overrides(args: &PathArgs) -> Self {
        let native = Self::native();
        Self {
            install_dir: args.install_dir.clone().unwrap_or(native.install_dir),
            config_dir: args.config_dir.clone().unwrap_or(native.config_dir),
            library_dir: args.library_dir.clone().unwrap_or(native.library_dir),
            ingest_dir: args.ingest_dir.clone().unwrap_or(native.ingest_dir),
        }
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.install_dir.join("venv")
    }
}

/// Immutable run configuration, threaded by reference through every step.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    pub target: InstallPaths,
    /// Any target path came from the command line or its environment variable
    pub target_overridden: bool,
    pub legacy: InstallPaths,
    pub service_user: String,
    pub service_group: String,
    pub legacy_user: String,
    /// Real (non-root) user who invoked the installer, owner of backups
    pub invoking_user: String,
    /// Where pre-migration backups go; the invoking user's home
    pub backup_dir: PathBuf,
    pub accept_all: bool,
    pub allow_low_space: bool,
    pub dry_run: bool,
    pub skip_system_deps: bool,
    pub no_start: bool,
    pub log_file: PathBuf,
    pub migration_log_dir: PathBuf,
    /// Directory the installer was launched from; copy source for out-of-tree checkouts
    pub source_dir: PathBuf,
    pub environment_file: PathBuf,
    pub unit_dir: PathBuf,
}

impl InstallConfig {
    /// Configuration with defaults for everything but the target paths
    pub fn new(target: InstallPaths) -> Self {
        let log_file = PathBuf::from(DEFAULT_LOG_FILE);
        let invoking_user = invoking_user();
        let backup_dir = home_dir_of(&invoking_user).unwrap_or_else(|| PathBuf::from("/root"));
        Self {
            target,
            target_overridden: false,
            legacy: InstallPaths::legacy(),
            service_user: DEFAULT_SERVICE_USER.to_string(),
            service_group: DEFAULT_SERVICE_USER.to_string(),
            legacy_user: LEGACY_SERVICE_USER.to_string(),
            invoking_user,
            backup_dir,
            accept_all: false,
            allow_low_space: false,
            dry_run: false,
            skip_system_deps: false,
            no_start: false,
            migration_log_dir: migration_log_dir_for(&log_file),
            log_file,
            source_dir: PathBuf::from("."),
            environment_file: PathBuf::from(ENVIRONMENT_FILE),
            unit_dir: PathBuf::from(UNIT_DIR),
        }
    }

    /// Build from the path overrides alone (read-only sub‑commands)
    pub fn from_paths(paths: &PathArgs) -> Result<Self> {
        let mut cfg = Self::new(InstallPaths::from_overrides(paths));
        cfg.target_overridden = paths.install_dir.is_some()
            || paths.config_dir.is_some()
            || paths.library_dir.is_some()
            || paths.ingest_dir.is_some();
        if let Some(user) = &paths.service_user {
            cfg.service_user = user.clone();
            cfg.service_group = user.clone();
        }
        if let Some(group) = &paths.service_group {
            cfg.service_group = group.clone();
        }
        if let Some(log_file) = &paths.log_file {
            cfg.migration_log_dir = migration_log_dir_for(log_file);
            cfg.log_file = log_file.clone();
        }
        cfg.source_dir =
            std::env::current_dir().context("Could not determine the working directory")?;
        Ok(cfg)
    }

    /// Build from the full `install` argument set
    pub fn from_install_args(args: &InstallArgs) -> Result<Self> {
        let mut cfg = Self::from_paths(&args.paths)?;
        cfg.accept_all = args.accept_all;
        cfg.allow_low_space = args.allow_low_space;
        cfg.dry_run = args.dry_run;
        cfg.skip_system_deps = args.skip_system_deps;
        cfg.no_start = args.no_start;
        Ok(cfg)
    }

    pub fn unit_path(&self, unit: &str) -> PathBuf {
        self.unit_dir.join(format!("{unit}.service"))
    }
}

/// Migration logs live next to the main log, or in the fixed fallback
pub fn migration_log_dir_for(log_file: &Path) -> PathBuf {
    match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from(FALLBACK_LOG_DIR),
    }
}

/// `SUDO_USER` when run through sudo, else the current user
fn invoking_user() -> String {
    if let Ok(user) = std::env::var("SUDO_USER")
        && !user.is_empty()
    {
        return user;
    }

    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| "root".to_string())
}
