//! Error types for the installer and the migration executor

use std::path::PathBuf;

use thiserror::Error;

use super::plan::MigrationComponent;

/// Typed installer failures that callers branch on
#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("installer must run as root (try: sudo acw-install)")]
    PermissionDenied,

    #[error(
        "insufficient disk space on {}: {required_mb} MB required, {available_mb} MB available",
        mount.display()
    )]
    InsufficientSpace {
        mount: PathBuf,
        required_mb: u64,
        available_mb: u64,
    },

    #[error("migration declined by operator")]
    Declined,

    #[error("no Autocaliweb source found in {} or {}", install_dir.display(), source_dir.display())]
    NoSource {
        install_dir: PathBuf,
        source_dir: PathBuf,
    },

    #[error("transfer of {component} failed: {reason}")]
    Transfer {
        component: MigrationComponent,
        reason: String,
    },

    #[error("interrupted by signal")]
    Interrupted,

    #[error("required tool not found: {0}")]
    MissingTool(&'static str),

    #[error("{0}")]
    System(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Failures that abort the migration executor as a whole
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("application source migration failed, installation cannot continue: {0}")]
    AppSourceFailed(#[source] InstallerError),

    #[error("migration interrupted; {} may be partially populated", target.display())]
    Interrupted { target: PathBuf },

    #[error("could not open migration log: {0}")]
    Log(#[source] std::io::Error),
}
