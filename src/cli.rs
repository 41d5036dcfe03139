//! CLI argument parsing for acw-install

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "acw-install")]
#[command(version, about = "Install, update or migrate an Autocaliweb instance as native systemd services")]
pub struct Args {
    /// Sub‑commands (install, detect, plan, etc.)
    #[command(subcommand)]
    pub sub: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Fresh install, update, or legacy-path migration (default if no sub‑command)
    Install(InstallArgs),
    /// Print the detected installation state and scenario as JSON
    Detect(PathArgs),
    /// Print the migration plan without touching anything
    Plan(PathArgs),
    /// Control the managed services
    Services {
        #[arg(value_enum)]
        action: ServiceAction,
    },
    /// Remove units and the environment file (library data is never removed)
    Uninstall {
        /// Also remove the install and config directories
        #[arg(long)]
        purge: bool,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        accept_all: bool,

        #[command(flatten)]
        paths: PathArgs,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

/// Target path overrides shared by every sub‑command that inspects the host
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct PathArgs {
    /// Application install directory
    #[arg(long, env = "ACW_INSTALL_DIR")]
    pub install_dir: Option<PathBuf>,

    /// Configuration directory (holds app.db)
    #[arg(long, env = "ACW_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Calibre library directory (holds metadata.db)
    #[arg(long, env = "LIBRARY_DIR")]
    pub library_dir: Option<PathBuf>,

    /// Book ingest directory
    #[arg(long, env = "INGEST_DIR")]
    pub ingest_dir: Option<PathBuf>,

    /// Service account the managed units run as
    #[arg(long, env = "ACW_USER")]
    pub service_user: Option<String>,

    /// Service group the managed units run as
    #[arg(long, env = "ACW_GROUP")]
    pub service_group: Option<String>,

    /// Main install log file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct InstallArgs {
    /// Answer yes to every confirmation prompt (unattended mode)
    #[arg(long, short = 'y')]
    pub accept_all: bool,

    /// Downgrade insufficient-disk-space failures to warnings
    #[arg(long)]
    pub allow_low_space: bool,

    /// Show what would be done without doing it
    #[arg(long)]
    pub dry_run: bool,

    /// Do not install distribution packages
    #[arg(long)]
    pub skip_system_deps: bool,

    /// Don't start services after install
    #[arg(long)]
    pub no_start: bool,

    #[command(flatten)]
    pub paths: PathArgs,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
