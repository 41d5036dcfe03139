use std::fs;
use std::path::Path;

use acw_installer::config::{InstallConfig, InstallPaths};
use acw_installer::install::migrate::execute;
use acw_installer::install::plan::plan;
use acw_installer::install::space::StatvfsProbe;
use acw_installer::install::source::classify;
use acw_installer::install::{MigrationComponent, Scenario, probe, resolve};
use acw_installer::logging::MigrationLog;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;

fn paths_under(root: &Path) -> InstallPaths {
    InstallPaths {
        install_dir: root.join("app"),
        config_dir: root.join("config"),
        library_dir: root.join("library"),
        ingest_dir: root.join("ingest"),
    }
}

fn container_settings(db: &Path) {
    let conn = Connection::open(db).unwrap();
    conn.execute_batch(
        "CREATE TABLE settings (id INTEGER PRIMARY KEY, config_logfile TEXT,
             config_access_logfile TEXT, config_calibre_dir TEXT);
         INSERT INTO settings (config_logfile, config_access_logfile, config_calibre_dir)
             VALUES ('', '/config/access.log', '/calibre-library-that-is-gone');
         CREATE TABLE user (id INTEGER PRIMARY KEY);
         CREATE TABLE shelf (id INTEGER PRIMARY KEY);
         CREATE TABLE book_shelf_link (id INTEGER PRIMARY KEY);
         CREATE TABLE downloads (id INTEGER PRIMARY KEY);
         CREATE TABLE flask_dance_oauth (id INTEGER PRIMARY KEY);",
    )
    .unwrap();
}

/// A container-era host: unit file, no environment file, data at the legacy paths
fn legacy_host(root: &Path) -> InstallConfig {
    let mut cfg = InstallConfig::new(paths_under(&root.join("native")));
    cfg.legacy = paths_under(&root.join("legacy"));
    cfg.unit_dir = root.join("systemd");
    cfg.environment_file = root.join("etc/environment");
    cfg.backup_dir = root.join("home");
    cfg.migration_log_dir = root.join("log");
    if let Ok(Some(me)) = nix::unistd::User::from_uid(nix::unistd::geteuid()) {
        cfg.invoking_user = me.name;
    }

    fs::create_dir_all(&cfg.unit_dir).unwrap();
    fs::write(cfg.unit_path("autocaliweb"), "[Unit]\n").unwrap();

    let app = &cfg.legacy.install_dir;
    fs::create_dir_all(app.join("cps/__pycache__")).unwrap();
    fs::write(app.join("requirements.txt"), "flask\n").unwrap();
    fs::write(app.join("cps/web.py"), "print('hi')\n").unwrap();
    fs::write(app.join("cps/__pycache__/web.cpython-312.pyc"), b"\0").unwrap();

    fs::create_dir_all(&cfg.legacy.config_dir).unwrap();
    container_settings(&cfg.legacy.config_dir.join("app.db"));

    // Library directory without a metadata.db: nothing to carry over
    fs::create_dir_all(&cfg.legacy.library_dir).unwrap();
    cfg
}

#[test]
fn legacy_host_is_detected_and_planned() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = legacy_host(dir.path());

    let state = probe(&cfg);
    assert!(state.is_existing_installation);
    assert!(state.is_legacy_migration);
    assert!(state.is_update);
    assert_eq!(state.current_install_path, cfg.legacy.install_dir);

    let plan = plan(&cfg.legacy, &cfg.target, &StatvfsProbe).unwrap().unwrap();
    assert_eq!(
        plan.components().collect::<Vec<_>>(),
        vec![MigrationComponent::AppSource, MigrationComponent::ConfigData]
    );
    assert_eq!(plan.mounts.len(), 1);
}

#[tokio::test]
async fn legacy_host_migrates_and_keeps_its_originals() {
    if which::which("rsync").is_err() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let cfg = legacy_host(dir.path());
    let plan = plan(&cfg.legacy, &cfg.target, &StatvfsProbe).unwrap().unwrap();

    let log = MigrationLog::create(&cfg.migration_log_dir).unwrap();
    let report = execute(plan, &cfg, &log, &CancellationToken::new()).await.unwrap();

    assert_eq!(
        report.migrated,
        vec![MigrationComponent::AppSource, MigrationComponent::ConfigData]
    );
    assert_eq!(report.legacy_left, vec![cfg.legacy.install_dir.clone(), cfg.legacy.config_dir.clone()]);

    let target_app = &cfg.target.install_dir;
    assert!(target_app.join("requirements.txt").is_file());
    assert!(target_app.join("cps/web.py").is_file());
    assert!(!target_app.join("cps/__pycache__").exists());
    assert!(cfg.legacy.config_dir.join("app.db").is_file());
    assert!(!cfg.target.library_dir.exists());

    let conn = Connection::open(cfg.target.config_dir.join("app.db")).unwrap();
    let calibre: String = conn
        .query_row("SELECT config_calibre_dir FROM settings", [], |row| row.get(0))
        .unwrap();
    assert_eq!(calibre, cfg.target.library_dir.display().to_string());

    // The legacy database itself is left untouched
    let legacy = Connection::open(cfg.legacy.config_dir.join("app.db")).unwrap();
    let old: String = legacy
        .query_row("SELECT config_calibre_dir FROM settings", [], |row| row.get(0))
        .unwrap();
    assert_eq!(old, "/calibre-library-that-is-gone");

    assert!(report.backups.iter().any(|b| {
        b.file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with("app.db.backup-"))
    }));

    let log_text = fs::read_to_string(log.path()).unwrap();
    assert!(log_text.contains("[INFO] Migrating application source"));
    assert!(log_text.contains("Legacy directories left in place"));
}

fn git(dir: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=acw", "-c", "user.email=acw@localhost", "-c", "commit.gpgsign=false"])
        .args(args)
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?}");
}

#[tokio::test]
async fn migrated_git_checkout_resolves_to_a_git_scenario() {
    if which::which("rsync").is_err() || which::which("git").is_err() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let cfg = legacy_host(dir.path());
    let app = &cfg.legacy.install_dir;
    git(app, &["init", "--quiet"]);
    git(app, &["add", "requirements.txt", "cps/web.py"]);
    git(app, &["commit", "--quiet", "-m", "container build"]);

    let plan = plan(&cfg.legacy, &cfg.target, &StatvfsProbe).unwrap().unwrap();
    assert!(plan.contains(MigrationComponent::ConfigData));
    assert!(!plan.contains(MigrationComponent::CalibreLibrary));

    let log = MigrationLog::create(&cfg.migration_log_dir).unwrap();
    execute(plan, &cfg, &log, &CancellationToken::new()).await.unwrap();

    let source = classify(&cfg, &cfg.target.install_dir);
    assert!(source.is_git_repo);
    let scenario = resolve(source.source_present, source.is_git_repo, source.has_template, source.has_marker);
    assert_eq!(scenario, Scenario::GitRepoWithoutTemplate);

    let conn = Connection::open(cfg.target.config_dir.join("app.db")).unwrap();
    let calibre: String = conn
        .query_row("SELECT config_calibre_dir FROM settings", [], |row| row.get(0))
        .unwrap();
    assert_eq!(calibre, cfg.target.library_dir.display().to_string());
}
