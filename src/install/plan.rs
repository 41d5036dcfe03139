//! Migration planning: which legacy components move, and whether they fit
//!
//! A component is planned when its legacy path differs from the target and
//! its sentinel file exists with non-zero size. The settings database must
//! additionally look like real data (more than [`CONFIG_TABLE_THRESHOLD`]
//! tables) so an untouched placeholder database is left behind.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use super::InstallerError;
use super::linux::file_ops::{dir_size_bytes, is_non_empty_file};
use super::settings::count_tables;
use super::space::{SpaceProbe, bytes_to_mb, nearest_existing_ancestor};
use crate::config::InstallPaths;

/// Settings databases with this many tables or fewer are treated as placeholders
pub const CONFIG_TABLE_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationComponent {
    AppSource,
    ConfigData,
    CalibreLibrary,
}

impl MigrationComponent {
    pub const ALL: [MigrationComponent; 3] = [Self::AppSource, Self::ConfigData, Self::CalibreLibrary];

    /// File whose non-empty presence means there is something to migrate
    pub fn sentinel(self) -> &'static str {
        match self {
            Self::AppSource => "requirements.txt",
            Self::ConfigData => "app.db",
            Self::CalibreLibrary => "metadata.db",
        }
    }

    /// Files copied to the invoking user's home before the transfer
    pub fn backup_files(self) -> &'static [&'static str] {
        match self {
            Self::AppSource => &["dirs.json"],
            Self::ConfigData => &["app.db", "acw.db"],
            Self::CalibreLibrary => &["metadata.db"],
        }
    }

    pub fn path_in(self, paths: &InstallPaths) -> &Path {
        match self {
            Self::AppSource => &paths.install_dir,
            Self::ConfigData => &paths.config_dir,
            Self::CalibreLibrary => &paths.library_dir,
        }
    }

    /// Whether a failed transfer aborts the whole installation
    pub fn is_fatal(self) -> bool {
        self == Self::AppSource
    }
}

impl fmt::Display for MigrationComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AppSource => "application source",
            Self::ConfigData => "configuration data",
            Self::CalibreLibrary => "Calibre library",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMigration {
    pub component: MigrationComponent,
    pub legacy: PathBuf,
    pub target: PathBuf,
    pub size_mb: u64,
}

/// Ordered migration plan, consumed once by the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    pub items: Vec<PlannedMigration>,
    pub total_mb: u64,
    /// `total_mb` plus a 20% margin
    pub required_mb: u64,
    /// Unique mount points of the target paths
    pub mounts: Vec<PathBuf>,
}

impl MigrationPlan {
    pub fn components(&self) -> impl Iterator<Item = MigrationComponent> + '_ {
        self.items.iter().map(|i| i.component)
    }

    pub fn contains(&self, component: MigrationComponent) -> bool {
        self.components().any(|c| c == component)
    }
}

/// Required space for the given legacy sizes, with the 1.2x margin
pub fn required_mb(sizes_mb: &[u64]) -> u64 {
    let total: u64 = sizes_mb.iter().sum();
    total * 12 / 10
}

/// Settings database heuristic: more than a handful of tables means real data
fn looks_like_user_data(db: &Path) -> bool {
    match count_tables(db) {
        Ok(tables) if tables > CONFIG_TABLE_THRESHOLD => true,
        Ok(tables) => {
            info!(
                "{} has only {tables} table(s) (threshold {CONFIG_TABLE_THRESHOLD}); treating as placeholder",
                db.display()
            );
            false
        }
        Err(e) => {
            warn!("Could not inspect {}: {e:#}; not migrating it", db.display());
            false
        }
    }
}

/// Components that need migrating from `legacy` to `target`
pub fn select_components(legacy: &InstallPaths, target: &InstallPaths) -> Vec<MigrationComponent> {
    MigrationComponent::ALL
        .into_iter()
        .filter(|c| {
            let from = c.path_in(legacy);
            if from == c.path_in(target) {
                return false;
            }
            let sentinel = from.join(c.sentinel());
            if !is_non_empty_file(&sentinel) {
                return false;
            }
            *c != MigrationComponent::ConfigData || looks_like_user_data(&sentinel)
        })
        .collect()
}

/// Build the plan, or `None` when nothing needs to move
pub fn plan(
    legacy: &InstallPaths,
    target: &InstallPaths,
    probe: &dyn SpaceProbe,
) -> Result<Option<MigrationPlan>, InstallerError> {
    let components = select_components(legacy, target);
    if components.is_empty() {
        return Ok(None);
    }

    let items: Vec<PlannedMigration> = components
        .into_iter()
        .map(|component| {
            let from = component.path_in(legacy).to_path_buf();
            PlannedMigration {
                component,
                size_mb: bytes_to_mb(dir_size_bytes(&from)),
                legacy: from,
                target: component.path_in(target).to_path_buf(),
            }
        })
        .collect();

    let sizes: Vec<u64> = items.iter().map(|i| i.size_mb).collect();
    let mut mounts: Vec<PathBuf> = Vec::new();
    for item in &items {
        let mount = probe.mount_point(&nearest_existing_ancestor(&item.target))?;
        if !mounts.contains(&mount) {
            mounts.push(mount);
        }
    }

    Ok(Some(MigrationPlan {
        total_mb: sizes.iter().sum(),
        required_mb: required_mb(&sizes),
        items,
        mounts,
    }))
}

/// Check every target mount has room for the whole migration.
///
/// Shortfalls are fatal unless `allow_low_space`, in which case they are
/// logged and returned.
pub fn check_space(
    plan: &MigrationPlan,
    probe: &dyn SpaceProbe,
    allow_low_space: bool,
) -> Result<Vec<InstallerError>, InstallerError> {
    let mut shortfalls = Vec::new();
    for mount in &plan.mounts {
        let available_mb = probe.available_mb(mount)?;
        if available_mb >= plan.required_mb {
            info!("{}: {available_mb} MB free, {} MB needed", mount.display(), plan.required_mb);
            continue;
        }

        let err = InstallerError::InsufficientSpace {
            mount: mount.clone(),
            required_mb: plan.required_mb,
            available_mb,
        };
        if !allow_low_space {
            return Err(err);
        }
        warn!("{err} (continuing: --allow-low-space)");
        shortfalls.push(err);
    }
    Ok(shortfalls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct FixedProbe {
        free_mb: u64,
    }

    impl SpaceProbe for FixedProbe {
        fn mount_point(&self, _path: &Path) -> io::Result<PathBuf> {
            Ok(PathBuf::from("/"))
        }
        fn available_mb(&self, _mount: &Path) -> io::Result<u64> {
            Ok(self.free_mb)
        }
    }

    fn plan_of(sizes: &[u64]) -> MigrationPlan {
        MigrationPlan {
            items: Vec::new(),
            total_mb: sizes.iter().sum(),
            required_mb: required_mb(sizes),
            mounts: vec![PathBuf::from("/")],
        }
    }

    #[test]
    fn margin_is_twenty_percent_of_the_sum() {
        assert_eq!(required_mb(&[600, 400]), 1200);
        assert_eq!(required_mb(&[]), 0);
    }

    #[test]
    fn short_space_is_fatal_without_override() {
        let plan = plan_of(&[600, 400]);
        let err = check_space(&plan, &FixedProbe { free_mb: 1100 }, false).unwrap_err();
        assert!(matches!(
            err,
            InstallerError::InsufficientSpace { required_mb: 1200, available_mb: 1100, .. }
        ));
    }

    #[test]
    fn short_space_warns_with_override() {
        let plan = plan_of(&[600, 400]);
        let shortfalls = check_space(&plan, &FixedProbe { free_mb: 1100 }, true).unwrap();
        assert_eq!(shortfalls.len(), 1);
        assert!(check_space(&plan, &FixedProbe { free_mb: 1200 }, false).unwrap().is_empty());
    }

    #[test]
    fn only_app_source_is_fatal() {
        assert!(MigrationComponent::AppSource.is_fatal());
        assert!(!MigrationComponent::ConfigData.is_fatal());
        assert!(!MigrationComponent::CalibreLibrary.is_fatal());
    }
}
