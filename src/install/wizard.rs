//! Operator interaction: confirmation prompts and terminal banners

use std::io::{IsTerminal, Write};

use anyhow::Result;
use inquire::Confirm;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use super::InstallerError;
use super::plan::MigrationPlan;
use super::scenario::Scenario;
use crate::config::InstallConfig;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Answers yes/no questions on behalf of the operator
pub trait Operator {
    fn confirm(&self, question: &str, default: bool) -> Result<bool>;
}

/// Prompts on the terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct InteractiveOperator;

impl Operator for InteractiveOperator {
    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        if !std::io::stdin().is_terminal() {
            anyhow::bail!("cannot ask \"{question}\" without a terminal; rerun with --accept-all");
        }
        Confirm::new(question)
            .with_default(default)
            .prompt()
            .map_err(|e| anyhow::anyhow!("Prompt cancelled: {}", e))
    }
}

/// Says yes to everything (`--accept-all`)
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Operator for AcceptAll {
    fn confirm(&self, _question: &str, _default: bool) -> Result<bool> {
        Ok(true)
    }
}

/// Operator for this run
pub fn operator_for(cfg: &InstallConfig) -> Box<dyn Operator> {
    if cfg.accept_all {
        Box::new(AcceptAll)
    } else {
        Box::new(InteractiveOperator)
    }
}

fn stdout() -> StandardStream {
    let choice = if std::io::stdout().is_terminal() { ColorChoice::Auto } else { ColorChoice::Never };
    StandardStream::stdout(choice)
}

fn rule(out: &mut StandardStream) {
    let _ = out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)));
    let _ = writeln!(out, "{RULE}");
    let _ = out.reset();
}

/// Show the plan and ask for go-ahead; declining is fatal
pub fn confirm_plan(plan: &MigrationPlan, operator: &dyn Operator) -> Result<(), InstallerError> {
    show_plan(plan);
    match operator.confirm("Migrate these components now?", true) {
        Ok(true) => Ok(()),
        Ok(false) => Err(InstallerError::Declined),
        Err(e) => {
            log::warn!("{e:#}");
            Err(InstallerError::Declined)
        }
    }
}

pub fn show_plan(plan: &MigrationPlan) {
    let mut out = stdout();
    rule(&mut out);
    let _ = out.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true));
    let _ = writeln!(out, "Legacy data found, migration required");
    let _ = out.reset();
    for item in &plan.items {
        let _ = writeln!(
            out,
            "  • {:<20} {} → {} ({} MB)",
            item.component.to_string(),
            item.legacy.display(),
            item.target.display(),
            item.size_mb
        );
    }
    let _ = writeln!(
        out,
        "\n  Total {} MB, {} MB required with margin on {}",
        plan.total_mb,
        plan.required_mb,
        plan.mounts.iter().map(|m| m.display().to_string()).collect::<Vec<_>>().join(", ")
    );
    rule(&mut out);
}

pub fn show_welcome(cfg: &InstallConfig) {
    let mut out = stdout();
    rule(&mut out);
    let _ = out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true));
    let _ = writeln!(out, "\n                A U T O C A L I W E B");
    let _ = out.reset();
    let _ = writeln!(out, "\n                  native installer\n");
    rule(&mut out);
    let _ = writeln!(out, "  Install dir : {}", cfg.target.install_dir.display());
    let _ = writeln!(out, "  Config dir  : {}", cfg.target.config_dir.display());
    let _ = writeln!(out, "  Library dir : {}", cfg.target.library_dir.display());
    let _ = writeln!(out, "  Ingest dir  : {}", cfg.target.ingest_dir.display());
    let _ = writeln!(out, "  Service     : {}:{}", cfg.service_user, cfg.service_group);
    if cfg.dry_run {
        let _ = out.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)));
        let _ = writeln!(out, "  Dry run: nothing will be changed");
        let _ = out.reset();
    }
    let _ = writeln!(out);
}

/// Numbered step header
pub fn step(n: usize, title: &str) {
    let mut out = stdout();
    let _ = out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true));
    let _ = writeln!(out, "\n[{n}] {title}");
    let _ = out.reset();
}

/// What the install run ended up doing
#[derive(Debug, Clone, Default)]
pub struct InstallSummary {
    pub scenario: Option<Scenario>,
    pub migrated: Vec<String>,
    pub migration_warnings: Vec<String>,
    pub legacy_dirs_left: Vec<String>,
    pub started_units: Vec<String>,
}

pub fn show_completion(cfg: &InstallConfig, summary: &InstallSummary) {
    let mut out = stdout();
    let _ = writeln!(out);
    rule(&mut out);
    let _ = out.set_color(ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true));
    let _ = writeln!(out, "\n                ✓ INSTALLATION COMPLETE\n");
    let _ = out.reset();
    rule(&mut out);

    if let Some(scenario) = summary.scenario {
        let _ = writeln!(out, "Source layout: {scenario}");
    }

    if !summary.migrated.is_empty() {
        let _ = writeln!(out, "\nMigrated:");
        let _ = out.set_color(ColorSpec::new().set_fg(Some(Color::Green)));
        for m in &summary.migrated {
            let _ = writeln!(out, "  ✓ {m}");
        }
        let _ = out.reset();
    }
    if !summary.migration_warnings.is_empty() {
        let _ = out.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)));
        for w in &summary.migration_warnings {
            let _ = writeln!(out, "  ⚠ {w}");
        }
        let _ = out.reset();
    }
    if !summary.legacy_dirs_left.is_empty() {
        let _ = writeln!(out, "\nLegacy data was copied, not moved. Once you have checked the new");
        let _ = writeln!(out, "installation you may remove these by hand:");
        for dir in &summary.legacy_dirs_left {
            let _ = writeln!(out, "  {dir}");
        }
    }

    let _ = writeln!(out, "\nService status:");
    if summary.started_units.is_empty() {
        let _ = out.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)));
        let _ = writeln!(out, "  ⚠ Installed but not started");
        let _ = out.reset();
    } else {
        let _ = out.set_color(ColorSpec::new().set_fg(Some(Color::Green)));
        for unit in &summary.started_units {
            let _ = writeln!(out, "  ✓ {unit}");
        }
        let _ = out.reset();
    }

    let _ = writeln!(out, "\nInstallation location:\n  {}", cfg.target.install_dir.display());
    rule(&mut out);
}

/// Red error banner on stderr
pub fn show_failure(err: &anyhow::Error) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true));
    let _ = writeln!(stderr, "\n❌ Installation failed");
    let _ = stderr.reset();
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
    let _ = writeln!(stderr, "   {err:#}");
    let _ = stderr.reset();
}
