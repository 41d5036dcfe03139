//! Persisted environment file and host environment detection
//!
//! The environment file is a flat list of `KEY=VALUE` lines read by every
//! managed unit (`EnvironmentFile=`) and by the prober to recover the
//! current install path of a modern installation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use super::linux::file_ops::write_file_atomic;
use crate::config::InstallConfig;

pub const KEY_INSTALL_DIR: &str = "ACW_INSTALL_DIR";
pub const KEY_CONFIG_DIR: &str = "ACW_CONFIG_DIR";
pub const KEY_USER: &str = "ACW_USER";
pub const KEY_GROUP: &str = "ACW_GROUP";
pub const KEY_LIBRARY_DIR: &str = "LIBRARY_DIR";
pub const KEY_INGEST_DIR: &str = "INGEST_DIR";

/// Ordered `KEY=VALUE` entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: Vec<(String, String)>,
}

impl EnvFile {
    /// Parse file content; the first `=` splits key and value
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.to_string()))
            .collect();
        Self { entries }
    }

    /// Read and parse; `Ok(None)` when the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(Self::parse(&content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Insert or replace, keeping the original position of existing keys
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("# Managed by acw-install. Read by the autocaliweb units.\n");
        for (k, v) in &self.entries {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push('\n');
        }
        out
    }

    /// Environment for the configured target paths and service account
    pub fn for_install(cfg: &InstallConfig) -> Self {
        let t = &cfg.target;
        let mut env = Self::default();
        env.set(KEY_INSTALL_DIR, t.install_dir.display().to_string());
        env.set(KEY_CONFIG_DIR, t.config_dir.display().to_string());
        env.set(KEY_USER, cfg.service_user.as_str());
        env.set(KEY_GROUP, cfg.service_group.as_str());
        env.set(KEY_LIBRARY_DIR, t.library_dir.display().to_string());
        env.set(KEY_INGEST_DIR, t.ingest_dir.display().to_string());
        env.set("ACW_VENV_DIR", t.venv_dir().display().to_string());
        env.set("PYTHONPATH", t.install_dir.display().to_string());
        env.set("CALIBRE_DBPATH", t.config_dir.display().to_string());
        env
    }

    /// Write atomically, creating the parent directory if needed
    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        write_file_atomic(path, &self.render())?;
        Ok(())
    }
}

/// Check if a graphical session is available
///
/// Decides between the headless and desktop graphics package sets. SSH
/// sessions count as headless even when X forwarding sets `DISPLAY`.
pub fn is_desktop_environment() -> bool {
    if std::env::var("SSH_CONNECTION").is_ok() || std::env::var("SSH_CLIENT").is_ok() {
        return false;
    }

    std::env::var("DISPLAY").is_ok() || std::env::var("WAYLAND_DISPLAY").is_ok()
}
