//! System account for the managed services

use std::path::Path;
use std::process::Command;

use log::info;
use nix::unistd::{Group, User};

use crate::install::InstallerError;

fn run(program: &'static str, args: &[&str]) -> Result<(), InstallerError> {
    let path = which::which(program).map_err(|_| InstallerError::MissingTool(program))?;
    let output = Command::new(path)
        .args(args)
        .output()
        .map_err(|e| InstallerError::System(format!("Failed to execute {program}: {e}")))?;

    if !output.status.success() {
        return Err(InstallerError::System(format!(
            "{program} {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

fn lookup_failed(what: &str, e: nix::Error) -> InstallerError {
    InstallerError::System(format!("Failed to look up {what}: {e}"))
}

/// Create the group and user if missing; returns true if anything was created
pub fn ensure_service_account(user: &str, group: &str, home: &Path) -> Result<bool, InstallerError> {
    let mut created = false;

    if Group::from_name(group).map_err(|e| lookup_failed(group, e))?.is_none() {
        run("groupadd", &["--system", group])?;
        info!("Created system group {group}");
        created = true;
    }

    if User::from_name(user).map_err(|e| lookup_failed(user, e))?.is_none() {
        let home = home.display().to_string();
        run(
            "useradd",
            &[
                "--system",
                "--gid",
                group,
                "--home-dir",
                &home,
                "--no-create-home",
                "--shell",
                "/usr/sbin/nologin",
                user,
            ],
        )?;
        info!("Created system user {user}");
        created = true;
    }

    Ok(created)
}

pub fn account_exists(user: &str) -> bool {
    User::from_name(user).ok().flatten().is_some()
}
