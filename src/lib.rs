//! Autocaliweb native installer
//!
//! Resolves the installation scenario of a host and migrates container-era
//! legacy paths to a native systemd layout.

pub mod cli;
pub mod config;
pub mod control;
pub mod install;
pub mod logging;

use std::path::PathBuf;

use anyhow::Result;

use cli::{Args, Cmd, InstallArgs};
use config::InstallConfig;

/// Dispatch a parsed command line
pub async fn run(args: Args) -> Result<()> {
    match args.sub.unwrap_or_else(|| Cmd::Install(InstallArgs::default())) {
        Cmd::Install(a) => {
            let cfg = InstallConfig::from_install_args(&a)?;
            install::runners::run_install(&cfg).await
        }
        Cmd::Detect(paths) => install::runners::run_detect(&InstallConfig::from_paths(&paths)?),
        Cmd::Plan(paths) => install::runners::run_plan(&InstallConfig::from_paths(&paths)?),
        Cmd::Services { action } => {
            let mut cfg = InstallConfig::from_paths(&cli::PathArgs::default())?;
            cfg.target.install_dir = install::detection::installed_dirs(&cfg).0;
            install::runners::run_services(&cfg, action).await
        }
        Cmd::Uninstall {
            purge,
            accept_all,
            paths,
        } => {
            let mut cfg = InstallConfig::from_paths(&paths)?;
            cfg.accept_all = accept_all;
            install::uninstall::run_uninstall(&cfg, purge).await
        }
    }
}

/// Main log file for a command line, before the config is built
pub fn log_file_for(args: &Args) -> Option<PathBuf> {
    match &args.sub {
        None => Some(PathBuf::from(config::DEFAULT_LOG_FILE)),
        Some(Cmd::Install(a)) => Some(
            a.paths
                .log_file
                .clone()
                .unwrap_or_else(|| PathBuf::from(config::DEFAULT_LOG_FILE)),
        ),
        Some(Cmd::Uninstall { paths, .. } | Cmd::Detect(paths) | Cmd::Plan(paths)) => paths.log_file.clone(),
        Some(Cmd::Services { .. }) => None,
    }
}
