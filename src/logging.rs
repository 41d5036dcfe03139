//! Console + file logging, and the per-run migration log

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use log::{info, warn};

/// Writes every record to stderr and, when it could be opened, the main log file
struct Tee {
    file: Option<File>,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            // A full disk must not take console logging down with it
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Initialise the global logger; `log_file` receives a copy of the console output
pub fn init(log_file: Option<&Path>) {
    let file = log_file.and_then(|path| match open_append(path) {
        Ok(f) => Some(f),
        Err(e) => {
            eprintln!("warning: cannot open log file {}: {e}", path.display());
            None
        }
    });

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(Tee { file })))
        .init();
}

/// Timestamped log dedicated to one migration run
pub struct MigrationLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl MigrationLog {
    /// Create `<dir>/migration-<UTC timestamp>.log`
    pub fn create(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("migration-{}.log", Utc::now().format("%Y%m%dT%H%M%SZ")));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Migration log: {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, level: &str, msg: &str) {
        let line = format!("{} [{level}] {msg}\n", Utc::now().to_rfc3339());
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()) {
                    warn!("Could not write migration log {}: {e}", self.path.display());
                }
            }
            Err(_) => warn!("Migration log {} is poisoned", self.path.display()),
        }
    }

    /// Record to the migration log and the main log at info level
    pub fn info(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        info!("{msg}");
        self.append("INFO", msg);
    }

    /// Record to the migration log and the main log at warn level
    pub fn warn(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        warn!("{msg}");
        self.append("WARN", msg);
    }

    /// Record a failure; the main log gets it at error level
    pub fn error(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        log::error!("{msg}");
        self.append("ERROR", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_log_name_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = MigrationLog::create(&dir.path().join("logs")).unwrap();
        let name = log.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("migration-") && name.ends_with("Z.log"), "{name}");

        log.info("planned ConfigData");
        log.error("rsync exited with status 23");
        let content = fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("[INFO] planned ConfigData"));
        assert!(content.contains("[ERROR] rsync exited with status 23"));
    }
}
