//! Top-level runners for each sub-command
//!
//! `run_install` drives the whole flow: probe, plan, confirm, stop services,
//! migrate, place or update the source, provision the host, write units and
//! start them.

use std::fs;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::detection::{self, InstallationState};
use super::environment::{EnvFile, is_desktop_environment};
use super::interrupt::{self, checkpoint};
use super::linux::file_ops::{chown_recursive, resolve_owner};
use super::linux::{account, check_privileges, packages, python, unit};
use super::migrate::{self, MigrationReport};
use super::plan::{self, MigrationPlan};
use super::scenario::{self, Scenario};
use super::settings::update_dirs_json;
use super::source::{self, EXCLUDE_PATTERNS, MARKER_FILE, SourceClassification, TEMPLATE_DB, TRACKED_MANIFEST};
use super::space::StatvfsProbe;
use super::wizard::{self, InstallSummary};
use super::{InstallerError, MigrationError};
use crate::cli::ServiceAction;
use crate::config::{InstallConfig, MANAGED_UNITS};
use crate::control::{self, KillPolicy, ProcTable, Systemctl, UnitManager};
use crate::logging::MigrationLog;

/// Everything `detect` reports
#[derive(Debug, Serialize)]
pub struct DetectReport {
    pub state: InstallationState,
    pub source: SourceClassification,
    pub scenario: Scenario,
}

/// Probe, classify and resolve without changing anything
pub fn detect(cfg: &InstallConfig) -> DetectReport {
    let state = detection::probe(cfg);
    let cfg = &detection::for_state(cfg, &state);
    let source = source::classify(cfg, &cfg.target.install_dir);
    let scenario = scenario::resolve(
        source.source_present,
        source.is_git_repo,
        source.has_template,
        source.has_marker,
    );
    DetectReport {
        state,
        source,
        scenario,
    }
}

pub fn run_detect(cfg: &InstallConfig) -> Result<()> {
    let report = detect(cfg);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Migration plan for this host, if the installation state calls for one
pub fn migration_plan(cfg: &InstallConfig, state: &InstallationState) -> Result<Option<MigrationPlan>> {
    if !state.wants_migration_plan() {
        info!("Native installation; no legacy paths to migrate");
        return Ok(None);
    }
    Ok(plan::plan(&cfg.legacy, &cfg.target, &StatvfsProbe)?)
}

pub fn run_plan(cfg: &InstallConfig) -> Result<()> {
    let state = detection::probe(cfg);
    let plan = migration_plan(&detection::for_state(cfg, &state), &state)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn worker_users(cfg: &InstallConfig) -> Vec<String> {
    super::identity::dedup_preserving_order([cfg.service_user.clone(), cfg.legacy_user.clone()])
}

pub async fn run_services(cfg: &InstallConfig, action: ServiceAction) -> Result<()> {
    check_privileges()?;
    let manager = Systemctl;
    match action {
        ServiceAction::Start => {
            let started = control::start_units(MANAGED_UNITS, &manager, &cfg.target.install_dir)?;
            info!("Started: {}", started.join(", "));
        }
        ServiceAction::Stop => {
            let failures =
                control::stop_units(MANAGED_UNITS, &manager, &ProcTable, &worker_users(cfg), &KillPolicy::default())
                    .await;
            if !failures.is_empty() {
                anyhow::bail!("{} unit(s) left worker processes running", failures.len());
            }
        }
        ServiceAction::Restart => {
            let restarted = control::restart_units(MANAGED_UNITS, &manager, &cfg.target.install_dir)?;
            info!("Restarted: {}", restarted.join(", "));
        }
    }
    Ok(())
}

/// Copy an out-of-tree source checkout into the install dir
async fn place_source(cfg: &InstallConfig, cancel: &CancellationToken) -> Result<()> {
    if !cfg.source_dir.join(MARKER_FILE).is_file() {
        return Err(InstallerError::NoSource {
            install_dir: cfg.target.install_dir.clone(),
            source_dir: cfg.source_dir.clone(),
        }
        .into());
    }
    info!(
        "Copying source from {} to {}",
        cfg.source_dir.display(),
        cfg.target.install_dir.display()
    );
    let mut excludes = EXCLUDE_PATTERNS.to_vec();
    excludes.push(".git/");
    migrate::transfer(&cfg.source_dir, &cfg.target.install_dir, &excludes, "Copying source", cancel).await?;
    Ok(())
}

/// Fast-forward a git checkout unless it carries local edits
fn update_checkout(source: &SourceClassification) -> Result<()> {
    let Some(checkout) = source.checkout() else {
        return Ok(());
    };
    checkout.fetch()?;
    if checkout.has_local_changes()? {
        warn!(
            "{} has local modifications; not resetting to the fetched revision",
            checkout.dir.display()
        );
        return Ok(());
    }
    checkout.reset_to_fetched()?;
    info!("Updated {} to the latest fetched revision (as {})", checkout.dir.display(), checkout.owner);
    Ok(())
}

fn prepare_directories(cfg: &InstallConfig) -> Result<()> {
    let (uid, gid) = resolve_owner(&cfg.service_user, &cfg.service_group)?;
    for dir in [
        &cfg.target.install_dir,
        &cfg.target.config_dir,
        &cfg.target.library_dir,
        &cfg.target.ingest_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let n = chown_recursive(dir, uid, gid)?;
        info!("{}: {n} entries owned by {}:{}", dir.display(), cfg.service_user, cfg.service_group);
    }
    Ok(())
}

/// Seed the settings database from the bundled template on first install
fn bootstrap_config(cfg: &InstallConfig, scenario: Scenario) -> Result<bool> {
    let db = cfg.target.config_dir.join("app.db");
    if db.exists() || !scenario.has_template() {
        return Ok(false);
    }
    let template = cfg.target.install_dir.join(TEMPLATE_DB);
    fs::copy(&template, &db)
        .with_context(|| format!("Failed to copy {} to {}", template.display(), db.display()))?;
    let (uid, gid) = resolve_owner(&cfg.service_user, &cfg.service_group)?;
    chown_recursive(&db, uid, gid)?;
    info!("Seeded {} from the bundled template", db.display());
    Ok(true)
}

/// Merge this run's paths and account into the environment file
pub fn write_environment(cfg: &InstallConfig) -> Result<()> {
    let mut env = EnvFile::load(&cfg.environment_file)?.unwrap_or_default();
    for (k, v) in EnvFile::for_install(cfg).entries() {
        env.set(k, v);
    }
    env.store(&cfg.environment_file)?;
    info!("Wrote {}", cfg.environment_file.display());
    Ok(())
}

/// Write every unit; reload and enable only when systemd is managing the host
fn install_units(cfg: &InstallConfig, manager: &dyn UnitManager, systemd: bool) -> Result<()> {
    for u in MANAGED_UNITS {
        let path = unit::write_unit(cfg, u.name)?;
        info!("Wrote {}", path.display());
    }
    if !systemd {
        return Ok(());
    }
    manager.daemon_reload()?;
    for u in MANAGED_UNITS {
        if cfg.target.install_dir.join(u.entry_point).exists() {
            manager.enable(u.name)?;
        }
    }
    Ok(())
}

fn print_dry_run(state: &InstallationState, plan: Option<&MigrationPlan>, scenario: Scenario) {
    println!("Installation state: {}", serde_json::to_string(state).unwrap_or_default());
    match plan {
        Some(plan) => wizard::show_plan(plan),
        None => println!("No migration needed"),
    }
    println!("Source layout: {scenario}");
    println!("Dry run: stopping before any change");
}

fn legacy_dirs(report: &MigrationReport) -> Vec<String> {
    report.legacy_left.iter().map(|p| p.display().to_string()).collect()
}

/// Full install, update or migration
pub async fn run_install(cfg: &InstallConfig) -> Result<()> {
    if !cfg.dry_run {
        check_privileges()?;
    }
    let cancel = interrupt::watch()?;

    let state = detection::probe(cfg);
    let resolved = detection::for_state(cfg, &state);
    let cfg = &resolved;

    wizard::show_welcome(cfg);
    let mut summary = InstallSummary::default();
    let mut n = 0;
    let mut step = |title: &str| {
        n += 1;
        wizard::step(n, title);
    };

    step("Detecting existing installation");
    info!(
        "existing={} legacy={} update={} current={}",
        state.is_existing_installation,
        state.is_legacy_migration,
        state.is_update,
        state.current_install_path.display()
    );

    step("Planning migration");
    let plan = migration_plan(cfg, &state)?;
    if let Some(plan) = &plan {
        plan::check_space(plan, &StatvfsProbe, cfg.allow_low_space)?;
    }

    checkpoint(&cancel)?;
    if cfg.dry_run {
        let source = source::classify(cfg, &cfg.target.install_dir);
        let scenario =
            scenario::resolve(source.source_present, source.is_git_repo, source.has_template, source.has_marker);
        print_dry_run(&state, plan.as_ref(), scenario);
        return Ok(());
    }

    if let Some(plan) = &plan {
        wizard::confirm_plan(plan, wizard::operator_for(cfg).as_ref())?;
    }

    checkpoint(&cancel)?;
    step("Preparing service account");
    account::ensure_service_account(&cfg.service_user, &cfg.service_group, &cfg.target.install_dir)?;

    let manager = Systemctl;
    let systemd = Systemctl::available();
    if !systemd {
        warn!("systemd is not running; units will be written but not managed");
    }

    if systemd && (state.is_existing_installation || plan.is_some()) {
        checkpoint(&cancel)?;
        step("Stopping services");
        let failures = control::stop_units_strict(
            MANAGED_UNITS,
            &manager,
            &ProcTable,
            &worker_users(cfg),
            &KillPolicy::default(),
        )
        .await;
        for e in failures {
            summary.migration_warnings.push(format!("{e:#}"));
        }
    }

    if let Some(plan) = plan {
        step("Migrating legacy data");
        let log = MigrationLog::create(&cfg.migration_log_dir).map_err(MigrationError::Log)?;
        let report = migrate::execute(plan, cfg, &log, &cancel).await?;
        summary.migrated = report.migrated.iter().map(ToString::to_string).collect();
        summary.migration_warnings.extend(report.warnings.iter().cloned());
        summary.legacy_dirs_left = legacy_dirs(&report);
    }

    checkpoint(&cancel)?;
    step("Resolving source layout");
    let mut source = source::classify(cfg, &cfg.target.install_dir);
    let scenario =
        scenario::resolve(source.source_present, source.is_git_repo, source.has_template, source.has_marker);
    info!("Scenario: {scenario}");
    summary.scenario = Some(scenario);
    if let Some(checkout) = source.checkout()
        && let Err(e) = checkout.prepare()
    {
        warn!("Could not register local git excludes: {e:#}");
    }
    match scenario {
        Scenario::NoSource => {
            return Err(InstallerError::NoSource {
                install_dir: cfg.target.install_dir.clone(),
                source_dir: cfg.source_dir.clone(),
            }
            .into());
        }
        Scenario::OutsideWithoutTemplate => {
            place_source(cfg, &cancel).await?;
            source = source::classify(cfg, &cfg.target.install_dir);
        }
        s if s.is_git() && state.is_update => {
            if let Err(e) = update_checkout(&source) {
                warn!("Git update skipped: {e:#}");
            }
        }
        _ => {}
    }

    if cfg.skip_system_deps {
        info!("Skipping system packages (--skip-system-deps)");
    } else {
        checkpoint(&cancel)?;
        step("Installing system packages");
        let family = packages::DistroFamily::detect()?;
        packages::install_packages(family, is_desktop_environment())?;
    }

    checkpoint(&cancel)?;
    step("Preparing directories");
    prepare_directories(cfg)?;
    bootstrap_config(cfg, scenario)?;

    checkpoint(&cancel)?;
    step("Setting up Python environment");
    python::ensure_venv(
        &cfg.service_user,
        &cfg.target.venv_dir(),
        &source.install_dir.join(MARKER_FILE),
    )?;

    checkpoint(&cancel)?;
    step("Writing configuration");
    write_environment(cfg)?;
    update_dirs_json(&cfg.target.install_dir.join(TRACKED_MANIFEST), &cfg.target)?;
    let (uid, gid) = resolve_owner(&cfg.service_user, &cfg.service_group)?;
    chown_recursive(&cfg.target.install_dir.join(TRACKED_MANIFEST), uid, gid)?;

    checkpoint(&cancel)?;
    step("Installing services");
    install_units(cfg, &manager, systemd)?;
    if systemd && !cfg.no_start {
        checkpoint(&cancel)?;
        let started = control::start_units(MANAGED_UNITS, &manager, &cfg.target.install_dir)?;
        summary.started_units = started.iter().map(ToString::to_string).collect();
    }

    wizard::show_completion(cfg, &summary);
    Ok(())
}
