//! Python virtual environment for the web application, owned by the service account

use std::path::Path;
use std::process::Command;

use log::info;

use crate::install::InstallerError;
use crate::install::identity::command_as;

fn run_as(user: &str, program: &str, configure: impl FnOnce(&mut Command)) -> Result<(), InstallerError> {
    let mut cmd = command_as(user, program);
    configure(&mut cmd);
    let output = cmd
        .output()
        .map_err(|e| InstallerError::System(format!("Failed to execute {program}: {e}")))?;
    if !output.status.success() {
        return Err(InstallerError::System(format!(
            "{program} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Create `venv_dir` if needed and install `requirements` into it as `user`
pub fn ensure_venv(user: &str, venv_dir: &Path, requirements: &Path) -> Result<(), InstallerError> {
    which::which("python3").map_err(|_| InstallerError::MissingTool("python3"))?;

    if !venv_dir.join("bin/python").exists() {
        info!("Creating virtual environment at {}", venv_dir.display());
        run_as(user, "python3", |c| {
            c.args(["-m", "venv"]).arg(venv_dir);
        })?;
    }

    let pip = venv_dir.join("bin/pip").display().to_string();
    run_as(user, &pip, |c| {
        c.args(["install", "--quiet", "--upgrade", "pip", "wheel"]);
    })?;

    if requirements.is_file() {
        info!("Installing Python requirements from {}", requirements.display());
        run_as(user, &pip, |c| {
            c.args(["install", "--quiet", "-r"]).arg(requirements);
        })?;
    }
    Ok(())
}
