//! Source classification and git checkout housekeeping
//!
//! Decides whether the install dir is a git working tree, an extracted
//! release, or empty, and whether it ships the bundled settings template.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Output;

use anyhow::{Context, Result, bail};
use log::{info, warn};
use serde::Serialize;

use super::identity::{command_as, git_owner_candidates, try_as};
use crate::config::InstallConfig;

/// Dependency declaration shipped at the root of every source tree
pub const MARKER_FILE: &str = "requirements.txt";
/// Empty settings database shipped only in release archives
pub const TEMPLATE_DB: &str = "library/app.db";
/// Tracked manifest the installer rewrites on every run
pub const TRACKED_MANIFEST: &str = "dirs.json";

/// Local-only ignore patterns for installer-generated files
pub const EXCLUDE_PATTERNS: &[&str] = &[
    "venv/",
    "__pycache__/",
    "*.pyc",
    "*.log",
    "calibre-bin/",
    ".acw-install-state",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceClassification {
    pub install_dir: PathBuf,
    pub source_present: bool,
    pub is_git_repo: bool,
    pub has_template: bool,
    pub has_marker: bool,
    /// User that validated the working tree; reused for every git operation
    pub git_owner: Option<String>,
}

impl SourceClassification {
    pub fn checkout(&self) -> Option<GitCheckout> {
        self.git_owner.as_ref().map(|owner| GitCheckout {
            dir: self.install_dir.clone(),
            owner: owner.clone(),
        })
    }
}

/// Classify `install_dir`; `cfg.source_dir` counts as source when it has the marker
pub fn classify(cfg: &InstallConfig, install_dir: &Path) -> SourceClassification {
    let has_marker = install_dir.join(MARKER_FILE).is_file();
    let source_present = dir_has_content(install_dir) || cfg.source_dir.join(MARKER_FILE).is_file();
    let has_template = install_dir.join(TEMPLATE_DB).is_file();

    let git_owner = if install_dir.join(".git").exists() {
        let candidates = git_owner_candidates(cfg, install_dir);
        match try_as(&candidates, |user| probe_work_tree(user, install_dir)) {
            Some((owner, ())) => {
                info!("{} is a git working tree (checked as {owner})", install_dir.display());
                Some(owner)
            }
            None => {
                warn!(
                    "{} has a .git directory but no candidate user ({}) could validate it; treating as non-git",
                    install_dir.display(),
                    candidates.join(", ")
                );
                None
            }
        }
    } else {
        None
    };

    SourceClassification {
        install_dir: install_dir.to_path_buf(),
        source_present,
        is_git_repo: git_owner.is_some(),
        has_template,
        has_marker,
        git_owner,
    }
}

fn dir_has_content(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn probe_work_tree(user: &str, dir: &Path) -> Result<()> {
    let output = command_as(user, "git")
        .arg("-C")
        .arg(dir)
        .args(["rev-parse", "--is-inside-work-tree"])
        .output()
        .context("Failed to execute git rev-parse")?;

    if output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true" {
        Ok(())
    } else {
        bail!("{}", String::from_utf8_lossy(&output.stderr).trim())
    }
}

/// Append missing patterns to a git exclude file; returns how many were added
pub fn register_excludes(exclude_file: &Path, patterns: &[&str]) -> Result<usize> {
    let existing = match fs::read_to_string(exclude_file) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", exclude_file.display())),
    };

    let missing: Vec<&str> = patterns
        .iter()
        .copied()
        .filter(|p| !existing.lines().any(|line| line.trim() == *p))
        .collect();

    if missing.is_empty() {
        return Ok(0);
    }

    if let Some(parent) = exclude_file.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(exclude_file)
        .with_context(|| format!("Failed to open {}", exclude_file.display()))?;

    if !existing.is_empty() && !existing.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    for pattern in &missing {
        writeln!(file, "{pattern}")?;
    }

    Ok(missing.len())
}

/// A git working tree plus the identity allowed to operate on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCheckout {
    pub dir: PathBuf,
    pub owner: String,
}

impl GitCheckout {
    fn git(&self, args: &[&str]) -> Result<Output> {
        command_as(&self.owner, "git")
            .arg("-C")
            .arg(&self.dir)
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute git {}", args.join(" ")))
    }

    fn git_ok(&self, args: &[&str]) -> Result<()> {
        let output = self.git(args)?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Register excludes and hide installer edits to the tracked manifest
    pub fn prepare(&self) -> Result<()> {
        let added = register_excludes(&self.dir.join(".git/info/exclude"), EXCLUDE_PATTERNS)?;
        if added > 0 {
            info!("Registered {added} local git exclude pattern(s)");
        }

        let tracked = self.git(&["ls-files", "--error-unmatch", TRACKED_MANIFEST])?;
        if tracked.status.success() {
            self.git_ok(&["update-index", "--assume-unchanged", TRACKED_MANIFEST])?;
        }
        Ok(())
    }

    pub fn fetch(&self) -> Result<()> {
        self.git_ok(&["fetch", "--quiet", "origin"])
    }

    /// Tracked files modified relative to HEAD
    pub fn has_local_changes(&self) -> Result<bool> {
        let output = self.git(&["diff", "--quiet", "HEAD"])?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => bail!("git diff failed: {}", String::from_utf8_lossy(&output.stderr).trim()),
        }
    }

    pub fn reset_to_fetched(&self) -> Result<()> {
        self.git_ok(&["reset", "--hard", "--quiet", "FETCH_HEAD"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_are_registered_once() {
        let dir = tempfile::tempdir().unwrap();
        let exclude = dir.path().join(".git/info/exclude");

        assert_eq!(register_excludes(&exclude, EXCLUDE_PATTERNS).unwrap(), EXCLUDE_PATTERNS.len());
        assert_eq!(register_excludes(&exclude, EXCLUDE_PATTERNS).unwrap(), 0);
        register_excludes(&exclude, EXCLUDE_PATTERNS).unwrap();

        let content = fs::read_to_string(&exclude).unwrap();
        for pattern in EXCLUDE_PATTERNS {
            assert_eq!(content.lines().filter(|l| l == pattern).count(), 1, "{pattern}");
        }
    }

    #[test]
    fn existing_entries_and_comments_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let exclude = dir.path().join("exclude");
        fs::write(&exclude, "# git ls-files --others --exclude-from=.git/info/exclude\n*.pyc").unwrap();

        let added = register_excludes(&exclude, &["*.pyc", "venv/"]).unwrap();
        assert_eq!(added, 1);
        let content = fs::read_to_string(&exclude).unwrap();
        assert!(content.starts_with("# git ls-files"));
        assert_eq!(content.lines().collect::<Vec<_>>()[1..], ["*.pyc", "venv/"]);
    }

    #[test]
    fn classify_extracted_release() {
        let root = tempfile::tempdir().unwrap();
        let install = root.path().join("opt/autocaliweb");
        fs::create_dir_all(install.join("library")).unwrap();
        fs::write(install.join(MARKER_FILE), "flask\n").unwrap();
        fs::write(install.join(TEMPLATE_DB), b"SQLite format 3\0").unwrap();

        let mut cfg = InstallConfig::new(crate::config::InstallPaths::native());
        cfg.source_dir = root.path().to_path_buf();
        let c = classify(&cfg, &install);
        assert!(c.source_present && c.has_marker && c.has_template);
        assert!(!c.is_git_repo);
        assert!(c.git_owner.is_none());
    }

    #[test]
    fn empty_install_dir_with_source_elsewhere() {
        let root = tempfile::tempdir().unwrap();
        let install = root.path().join("opt/autocaliweb");
        let source = root.path().join("src");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join(MARKER_FILE), "flask\n").unwrap();

        let mut cfg = InstallConfig::new(crate::config::InstallPaths::native());
        cfg.source_dir = source;
        let c = classify(&cfg, &install);
        assert!(c.source_present);
        assert!(!c.has_marker);
    }

    fn git(dir: &Path, args: &[&str]) -> String {
        let out = std::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=acw", "-c", "user.email=acw@localhost", "-c", "commit.gpgsign=false"])
            .args(args)
            .output()
            .unwrap();
        assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
        String::from_utf8_lossy(&out.stdout).into_owned()
    }

    #[test]
    fn git_checkout_is_classified_and_prepared() {
        if which::which("git").is_err() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let install = root.path().join("opt/autocaliweb");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join(MARKER_FILE), "flask\n").unwrap();
        fs::write(install.join(TRACKED_MANIFEST), "{}\n").unwrap();
        git(&install, &["init", "--quiet"]);
        git(&install, &["add", MARKER_FILE, TRACKED_MANIFEST]);
        git(&install, &["commit", "--quiet", "-m", "initial"]);

        let mut cfg = InstallConfig::new(crate::config::InstallPaths::native());
        cfg.legacy.install_dir = root.path().join("app/autocaliweb");
        cfg.source_dir = root.path().to_path_buf();
        let c = classify(&cfg, &install);
        assert!(c.is_git_repo);
        assert!(c.git_owner.is_some());
        assert!(!c.has_template);
        assert_eq!(
            crate::install::resolve(c.source_present, c.is_git_repo, c.has_template, c.has_marker),
            crate::install::Scenario::GitRepoWithoutTemplate
        );

        let checkout = c.checkout().unwrap();
        checkout.prepare().unwrap();
        let listed = git(&install, &["ls-files", "-v", TRACKED_MANIFEST]);
        assert_eq!(listed.trim(), format!("h {TRACKED_MANIFEST}"));
        let exclude = fs::read_to_string(install.join(".git/info/exclude")).unwrap();
        assert!(exclude.lines().any(|l| l == "venv/"));

        fs::write(install.join(TRACKED_MANIFEST), "{\"ingest_folder\": \"/srv\"}\n").unwrap();
        assert!(!checkout.has_local_changes().unwrap());
        fs::write(install.join(MARKER_FILE), "flask\nrequests\n").unwrap();
        assert!(checkout.has_local_changes().unwrap());
    }
}
