//! Migration executor: backup, transfer, ownership, settings rewrite
//!
//! Components run one at a time. A failed application-source transfer ends
//! the run; the other components log a warning and the run carries on.
//! Legacy trees are never removed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::heartbeat::{DEFAULT_PERIOD, Heartbeat};
use super::interrupt::checkpoint;
use super::linux::file_ops::{chown_recursive, resolve_owner};
use super::plan::{MigrationComponent, MigrationPlan, PlannedMigration};
use super::settings::{FieldOutcome, rewrite_paths, update_dirs_json};
use super::source::TRACKED_MANIFEST;
use super::{InstallerError, MigrationError};
use crate::config::InstallConfig;
use crate::logging::MigrationLog;

/// What the executor did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: Vec<MigrationComponent>,
    pub warnings: Vec<String>,
    /// Legacy directories that now have a copy at the target
    pub legacy_left: Vec<PathBuf>,
    pub backups: Vec<PathBuf>,
}

fn dir_arg(path: &Path) -> String {
    // Trailing slash: copy the contents, not the directory itself
    format!("{}/", path.display().to_string().trim_end_matches('/'))
}

/// `rsync -a from/ to/` under a heartbeat, abandoned once `cancel` fires
pub async fn transfer(
    from: &Path,
    to: &Path,
    excludes: &[&str],
    label: &str,
    cancel: &CancellationToken,
) -> Result<(), InstallerError> {
    checkpoint(cancel)?;
    let rsync = which::which("rsync").map_err(|_| InstallerError::MissingTool("rsync"))?;
    fs::create_dir_all(to)?;

    let mut cmd = tokio::process::Command::new(rsync);
    cmd.arg("-a");
    for pattern in excludes {
        cmd.arg(format!("--exclude={pattern}"));
    }
    cmd.arg(dir_arg(from))
        .arg(dir_arg(to))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut text = String::new();
        if let Some(mut pipe) = stderr {
            let _ = pipe.read_to_string(&mut text).await;
        }
        text
    });

    let heartbeat = Heartbeat::start(label, DEFAULT_PERIOD);
    let outcome = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };
    heartbeat.finish().await;

    let Some(status) = outcome else {
        let _ = child.kill().await;
        return Err(InstallerError::Interrupted);
    };
    let status = status?;
    let stderr = stderr_task.await.unwrap_or_default();
    if status.success() {
        Ok(())
    } else {
        Err(InstallerError::System(format!(
            "rsync exited with {status}: {}",
            stderr.trim()
        )))
    }
}

/// Remove `__pycache__` directories and stray `.pyc` files; returns entries removed
pub fn purge_bytecode(root: &Path) -> u64 {
    let mut removed = 0;
    let mut walker = WalkDir::new(root).follow_links(false).into_iter();
    while let Some(entry) = walker.next() {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if entry.file_type().is_dir() && entry.file_name() == "__pycache__" {
            walker.skip_current_dir();
            if fs::remove_dir_all(path).is_ok() {
                removed += 1;
            }
        } else if entry.file_type().is_file() && path.extension().is_some_and(|e| e == "pyc") {
            if fs::remove_file(path).is_ok() {
                removed += 1;
            }
        }
    }
    removed
}

/// Copy the component's known files into `backup_dir` with a UTC timestamp suffix.
///
/// Missing files are skipped.
pub fn backup_files(
    component: MigrationComponent,
    legacy: &Path,
    backup_dir: &Path,
    owner: Option<&str>,
) -> Result<Vec<PathBuf>, InstallerError> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let mut written = Vec::new();
    for name in component.backup_files() {
        let src = legacy.join(name);
        if !src.is_file() {
            continue;
        }
        fs::create_dir_all(backup_dir)?;
        let dest = backup_dir.join(format!("{name}.backup-{stamp}"));
        fs::copy(&src, &dest)?;
        written.push(dest);
    }

    if let Some(owner) = owner
        && !written.is_empty()
    {
        let user = nix::unistd::User::from_name(owner)
            .map_err(|e| InstallerError::System(format!("Failed to look up user {owner}: {e}")))?;
        if let Some(user) = user {
            for path in &written {
                std::os::unix::fs::lchown(path, Some(user.uid.as_raw()), Some(user.gid.as_raw()))?;
            }
        }
    }
    Ok(written)
}

struct Executor<'a> {
    cfg: &'a InstallConfig,
    log: &'a MigrationLog,
    cancel: &'a CancellationToken,
    report: MigrationReport,
}

impl Executor<'_> {
    async fn migrate(&mut self, item: &PlannedMigration) -> Result<(), InstallerError> {
        let component = item.component;
        checkpoint(self.cancel)?;
        self.log.info(format!(
            "Migrating {component}: {} -> {} ({} MB)",
            item.legacy.display(),
            item.target.display(),
            item.size_mb
        ));

        match backup_files(component, &item.legacy, &self.cfg.backup_dir, Some(&self.cfg.invoking_user)) {
            Ok(paths) => {
                for p in &paths {
                    self.log.info(format!("Backed up to {}", p.display()));
                }
                self.report.backups.extend(paths);
            }
            Err(e) => self.log.warn(format!("Backup for {component} failed: {e}")),
        }

        checkpoint(self.cancel)?;
        if component == MigrationComponent::AppSource {
            let purged = purge_bytecode(&item.legacy);
            if purged > 0 {
                self.log.info(format!("Purged {purged} bytecode cache entries from {}", item.legacy.display()));
            }
        }

        transfer(&item.legacy, &item.target, &[], &format!("Copying {component}"), self.cancel)
            .await
            .map_err(|e| match e {
                InstallerError::Interrupted => InstallerError::Interrupted,
                other => InstallerError::Transfer {
                    component,
                    reason: other.to_string(),
                },
            })?;

        checkpoint(self.cancel)?;
        match resolve_owner(&self.cfg.service_user, &self.cfg.service_group)
            .and_then(|(uid, gid)| chown_recursive(&item.target, uid, gid))
        {
            Ok(n) => self.log.info(format!(
                "Set ownership of {n} entries under {} to {}:{}",
                item.target.display(),
                self.cfg.service_user,
                self.cfg.service_group
            )),
            Err(e) => self.log.warn(format!("Ownership fix-up of {} failed: {e}", item.target.display())),
        }

        checkpoint(self.cancel)?;
        if component == MigrationComponent::ConfigData {
            self.rewrite_settings(&item.target);
        }
        Ok(())
    }

    fn rewrite_settings(&mut self, config_dir: &Path) {
        let db = config_dir.join(MigrationComponent::ConfigData.sentinel());
        match rewrite_paths(&db, &self.cfg.target) {
            Ok(outcomes) => {
                for (field, outcome) in outcomes {
                    match outcome {
                        FieldOutcome::Rewritten { from, to } => {
                            self.log.info(format!("{}: '{from}' -> '{to}'", field.column()))
                        }
                        FieldOutcome::Preserved(v) => {
                            self.log.info(format!("{}: kept '{v}'", field.column()))
                        }
                    }
                }
            }
            Err(e) => self.warn(format!("Settings path rewrite failed: {e:#}")),
        }

        let manifest = self.cfg.target.install_dir.join(TRACKED_MANIFEST);
        if manifest.exists()
            && let Err(e) = update_dirs_json(&manifest, &self.cfg.target)
        {
            self.warn(format!("{} not updated: {e:#}", manifest.display()));
        }
    }

    fn warn(&mut self, msg: String) {
        self.log.warn(&msg);
        self.report.warnings.push(msg);
    }
}

/// Run every planned component, consuming the plan.
///
/// `cancel` is checked between steps; once it fires the run stops with
/// [`MigrationError::Interrupted`] naming the component's target.
pub async fn execute(
    plan: MigrationPlan,
    cfg: &InstallConfig,
    log: &MigrationLog,
    cancel: &CancellationToken,
) -> Result<MigrationReport, MigrationError> {
    let mut exec = Executor {
        cfg,
        log,
        cancel,
        report: MigrationReport::default(),
    };

    for item in &plan.items {
        match exec.migrate(item).await {
            Ok(()) => {
                exec.report.migrated.push(item.component);
                exec.report.legacy_left.push(item.legacy.clone());
            }
            Err(InstallerError::Interrupted) => {
                log.error(format!(
                    "Interrupted while copying {}; {} may be incomplete",
                    item.component,
                    item.target.display()
                ));
                return Err(MigrationError::Interrupted {
                    target: item.target.clone(),
                });
            }
            Err(e) if item.component.is_fatal() => {
                log.error(format!("{e}"));
                return Err(MigrationError::AppSourceFailed(e));
            }
            Err(e) => exec.warn(format!("{e}; continuing without it")),
        }
    }

    if !exec.report.legacy_left.is_empty() {
        log.info(format!(
            "Legacy directories left in place: {}",
            exec.report
                .legacy_left
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    Ok(exec.report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytecode_is_purged() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cps/__pycache__");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("web.cpython-312.pyc"), b"x").unwrap();
        fs::write(dir.path().join("cps/old.pyc"), b"x").unwrap();
        fs::write(dir.path().join("cps/web.py"), b"print()").unwrap();

        assert_eq!(purge_bytecode(dir.path()), 2);
        assert!(!cache.exists());
        assert!(dir.path().join("cps/web.py").exists());
    }

    #[test]
    fn backups_skip_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join("config");
        fs::create_dir_all(&legacy).unwrap();
        fs::write(legacy.join("app.db"), b"db").unwrap();

        let home = dir.path().join("home");
        let written = backup_files(MigrationComponent::ConfigData, &legacy, &home, None).unwrap();
        assert_eq!(written.len(), 1);
        let name = written[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("app.db.backup-") && name.ends_with('Z'), "{name}");
        assert_eq!(fs::read(&written[0]).unwrap(), b"db");
    }

    #[test]
    fn rsync_arguments_copy_contents() {
        assert_eq!(dir_arg(Path::new("/config")), "/config/");
        assert_eq!(dir_arg(Path::new("/config/")), "/config/");
    }

    #[tokio::test]
    async fn transfer_copies_tree_when_rsync_exists() {
        if which::which("rsync").is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("legacy");
        fs::create_dir_all(from.join("sub")).unwrap();
        fs::write(from.join("sub/metadata.db"), b"books").unwrap();
        fs::write(from.join("skip.log"), b"x").unwrap();

        let to = dir.path().join("target/library");
        transfer(&from, &to, &["*.log"], "test copy", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fs::read(to.join("sub/metadata.db")).unwrap(), b"books");
        assert!(!to.join("skip.log").exists());
        assert!(from.join("sub/metadata.db").exists());
    }

    #[tokio::test]
    async fn cancelled_transfer_does_not_start() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("legacy");
        fs::create_dir_all(&from).unwrap();
        let to = dir.path().join("target");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = transfer(&from, &to, &[], "copy", &cancel).await.unwrap_err();
        assert!(matches!(err, InstallerError::Interrupted));
        assert!(!to.exists());
    }

    #[tokio::test]
    async fn interrupt_between_components_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = InstallConfig::new(crate::config::InstallPaths::native());
        cfg.backup_dir = dir.path().join("home");
        let legacy = dir.path().join("config");
        fs::create_dir_all(&legacy).unwrap();
        fs::write(legacy.join("app.db"), b"db").unwrap();
        let target = dir.path().join("var/lib/autocaliweb");

        let plan = MigrationPlan {
            items: vec![PlannedMigration {
                component: MigrationComponent::ConfigData,
                legacy: legacy.clone(),
                target: target.clone(),
                size_mb: 1,
            }],
            total_mb: 1,
            required_mb: 1,
            mounts: Vec::new(),
        };
        let log = MigrationLog::create(&dir.path().join("log")).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = execute(plan, &cfg, &log, &cancel).await.unwrap_err();
        assert!(matches!(err, MigrationError::Interrupted { target: ref t } if *t == target));
        assert!(!target.exists());
        assert!(!cfg.backup_dir.exists());
        assert!(legacy.join("app.db").exists());
    }
}
