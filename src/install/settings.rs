//! Settings database inspection and post-migration path rewrites
//!
//! Only placeholder values are ever rewritten. A value the operator set
//! deliberately stays byte-for-byte as it was.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Value};

use crate::config::InstallPaths;

pub const SETTINGS_TABLE: &str = "settings";

/// Path-valued settings columns the migration may rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    LogFile,
    AccessLogFile,
    CalibreDir,
}

impl SettingsField {
    pub const ALL: [SettingsField; 3] = [Self::LogFile, Self::AccessLogFile, Self::CalibreDir];

    pub fn column(self) -> &'static str {
        match self {
            Self::LogFile => "config_logfile",
            Self::AccessLogFile => "config_access_logfile",
            Self::CalibreDir => "config_calibre_dir",
        }
    }

    /// Values known to be defaults or container-era leftovers
    fn placeholders(self) -> &'static [&'static str] {
        match self {
            Self::LogFile => &["", "autocaliweb.log", "/tmp/autocaliweb.log", "/config/autocaliweb.log"],
            Self::AccessLogFile => &["", "access.log", "/tmp/access.log", "/config/access.log"],
            Self::CalibreDir => &["", "/calibre-library"],
        }
    }

    /// Post-migration value for this field
    pub fn target_value(self, paths: &InstallPaths) -> String {
        match self {
            Self::LogFile => paths.config_dir.join("autocaliweb.log"),
            Self::AccessLogFile => paths.config_dir.join("access.log"),
            Self::CalibreDir => paths.library_dir.clone(),
        }
        .display()
        .to_string()
    }

    /// Whether `current` may be overwritten
    pub fn is_placeholder(self, current: &str) -> bool {
        if self.placeholders().contains(&current.trim()) {
            return true;
        }
        // A library path that does not exist on this machine is unusable
        self == Self::CalibreDir && !Path::new(current).is_dir()
    }
}

/// Outcome for one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOutcome {
    Rewritten { from: String, to: String },
    Preserved(String),
}

/// Number of tables in a SQLite database
pub fn count_tables(db: &Path) -> Result<u32> {
    let conn = Connection::open_with_flags(db, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("Failed to open {}", db.display()))?;
    let count: u32 = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table'",
            [],
            |row| row.get(0),
        )
        .with_context(|| format!("Failed to count tables in {}", db.display()))?;
    Ok(count)
}

fn has_settings_row(conn: &Connection) -> Result<bool> {
    let sql = format!("SELECT EXISTS (SELECT 1 FROM {SETTINGS_TABLE})");
    conn.query_row(&sql, [], |row| row.get(0))
        .with_context(|| format!("Failed to read {SETTINGS_TABLE}"))
}

/// Current value of `field`; NULL reads as empty
fn read_field(conn: &Connection, field: SettingsField) -> Result<String> {
    let sql = format!("SELECT {} FROM {SETTINGS_TABLE} LIMIT 1", field.column());
    let value: Option<String> = conn
        .query_row(&sql, [], |row| row.get(0))
        .with_context(|| format!("Failed to read {}", field.column()))?;
    Ok(value.unwrap_or_default())
}

/// Rewrite the three path settings where they still hold placeholders.
///
/// Each update is its own autocommit statement. A database without a
/// settings row has nothing to rewrite and yields no outcomes.
pub fn rewrite_paths(db: &Path, target: &InstallPaths) -> Result<Vec<(SettingsField, FieldOutcome)>> {
    let conn = Connection::open(db).with_context(|| format!("Failed to open {}", db.display()))?;
    if !has_settings_row(&conn)? {
        warn!("{} has no {SETTINGS_TABLE} row; nothing to rewrite", db.display());
        return Ok(Vec::new());
    }

    let mut outcomes = Vec::with_capacity(SettingsField::ALL.len());
    for field in SettingsField::ALL {
        let current = read_field(&conn, field)?;
        let outcome = if field.is_placeholder(&current) {
            let to = field.target_value(target);
            let sql = format!("UPDATE {SETTINGS_TABLE} SET {} = ?1", field.column());
            conn.execute(&sql, [&to])
                .with_context(|| format!("Failed to update {}", field.column()))?;
            info!("{}: '{}' -> '{}'", field.column(), current, to);
            FieldOutcome::Rewritten { from: current, to }
        } else {
            info!("{}: keeping operator value '{}'", field.column(), current);
            FieldOutcome::Preserved(current)
        };
        outcomes.push((field, outcome));
    }

    Ok(outcomes)
}

/// Point `dirs.json` at the target ingest and library directories
pub fn update_dirs_json(path: &Path, target: &InstallPaths) -> Result<()> {
    let mut dirs = match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str::<Map<String, Value>>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    dirs.insert("ingest_folder".into(), Value::String(target.ingest_dir.display().to_string()));
    dirs.insert(
        "calibre_library_dir".into(),
        Value::String(target.library_dir.display().to_string()),
    );
    dirs.entry("tmp_conversion_dir")
        .or_insert_with(|| Value::String(default_conversion_dir().display().to_string()));

    let rendered = serde_json::to_string_pretty(&Value::Object(dirs))?;
    fs::write(path, rendered + "\n").with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn default_conversion_dir() -> PathBuf {
    PathBuf::from("/tmp/autocaliweb/book-conversion")
}
