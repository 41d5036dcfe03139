use std::fs;
use std::path::Path;

use acw_installer::config::InstallPaths;
use acw_installer::install::settings::{FieldOutcome, SettingsField, rewrite_paths, update_dirs_json};
use rusqlite::Connection;

fn target_under(root: &Path) -> InstallPaths {
    InstallPaths {
        install_dir: root.join("opt/autocaliweb"),
        config_dir: root.join("var/lib/autocaliweb"),
        library_dir: root.join("opt/calibre-library"),
        ingest_dir: root.join("opt/acw-book-ingest"),
    }
}

fn db_with(path: &Path, logfile: &str, access: &str, calibre: &str) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE settings (id INTEGER PRIMARY KEY, config_logfile TEXT, config_access_logfile TEXT, config_calibre_dir TEXT);",
    )
    .unwrap();
    conn.execute(
        "INSERT INTO settings (config_logfile, config_access_logfile, config_calibre_dir) VALUES (?1, ?2, ?3)",
        [logfile, access, calibre],
    )
    .unwrap();
}

fn read(path: &Path) -> (String, String, String) {
    let conn = Connection::open(path).unwrap();
    conn.query_row(
        "SELECT config_logfile, config_access_logfile, config_calibre_dir FROM settings",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .unwrap()
}

#[test]
fn operator_values_survive_byte_for_byte() {
    let dir = tempfile::tempdir().unwrap();
    let library = dir.path().join("books");
    fs::create_dir_all(&library).unwrap();
    let library = library.display().to_string();

    let db = dir.path().join("app.db");
    db_with(&db, "/var/log/acw/custom.log", "/var/log/acw/access-custom.log", &library);

    let outcomes = rewrite_paths(&db, &target_under(dir.path())).unwrap();
    assert!(outcomes.iter().all(|(_, o)| matches!(o, FieldOutcome::Preserved(_))));
    assert_eq!(
        read(&db),
        ("/var/log/acw/custom.log".into(), "/var/log/acw/access-custom.log".into(), library)
    );
}

#[test]
fn placeholders_point_at_the_target_layout() {
    let dir = tempfile::tempdir().unwrap();
    let target = target_under(dir.path());
    let db = dir.path().join("app.db");
    db_with(&db, "", "/config/access.log", "/calibre-library");

    let outcomes = rewrite_paths(&db, &target).unwrap();
    assert_eq!(outcomes.len(), 3);

    let (log, access, calibre) = read(&db);
    assert_eq!(log, SettingsField::LogFile.target_value(&target));
    assert_eq!(access, SettingsField::AccessLogFile.target_value(&target));
    assert_eq!(calibre, target.library_dir.display().to_string());
}

#[test]
fn dirs_manifest_keeps_unrelated_keys() {
    let dir = tempfile::tempdir().unwrap();
    let target = target_under(dir.path());
    let manifest = dir.path().join("dirs.json");
    fs::write(&manifest, r#"{"ingest_folder": "/acw-book-ingest", "tmp_conversion_folder": "/tmp/x"}"#).unwrap();

    update_dirs_json(&manifest, &target).unwrap();
    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&manifest).unwrap()).unwrap();
    assert_eq!(value["ingest_folder"], target.ingest_dir.display().to_string());
    assert_eq!(value["calibre_library_dir"], target.library_dir.display().to_string());
    assert_eq!(value["tmp_conversion_folder"], "/tmp/x");
}
