//! Systemd unit files rendered from the bundled templates.

use std::fs;
use std::path::PathBuf;

use super::file_ops::{set_mode, write_file_atomic};
use crate::config::InstallConfig;
use crate::install::InstallerError;

const WEB_TEMPLATE: &str = include_str!("../../../templates/autocaliweb.service.template");
const INGEST_TEMPLATE: &str = include_str!("../../../templates/acw-ingest-service.service.template");
const ZIPPER_TEMPLATE: &str = include_str!("../../../templates/acw-auto-zipper.service.template");

/// Template text for a managed unit
pub fn template_for(unit: &str) -> Option<&'static str> {
    match unit {
        "autocaliweb" => Some(WEB_TEMPLATE),
        "acw-ingest-service" => Some(INGEST_TEMPLATE),
        "acw-auto-zipper" => Some(ZIPPER_TEMPLATE),
        _ => None,
    }
}

/// Named substitutions shared by every unit template
pub fn params_for(cfg: &InstallConfig) -> Vec<(&'static str, String)> {
    vec![
        ("SERVICE_USER", cfg.service_user.clone()),
        ("SERVICE_GROUP", cfg.service_group.clone()),
        ("INSTALL_DIR", cfg.target.install_dir.display().to_string()),
        ("CONFIG_DIR", cfg.target.config_dir.display().to_string()),
        ("VENV_DIR", cfg.target.venv_dir().display().to_string()),
        ("ENVIRONMENT_FILE", cfg.environment_file.display().to_string()),
    ]
}

/// Substitute `{{NAME}}` placeholders; any placeholder left over is an error
pub fn render(template: &str, params: &[(&str, String)]) -> Result<String, InstallerError> {
    let mut content = template.to_string();
    for (name, value) in params {
        content = content.replace(&format!("{{{{{name}}}}}"), value);
    }

    if let Some(start) = content.find("{{") {
        let rest = &content[start..];
        let end = rest.find("}}").map_or(rest.len(), |i| i + 2);
        return Err(InstallerError::System(format!(
            "unit template has unreplaced placeholder {}",
            &rest[..end]
        )));
    }
    Ok(content)
}

/// Render and write `<unit_dir>/<unit>.service`
pub fn write_unit(cfg: &InstallConfig, unit: &str) -> Result<PathBuf, InstallerError> {
    let template = template_for(unit)
        .ok_or_else(|| InstallerError::System(format!("no template for unit {unit}")))?;
    let content = render(template, &params_for(cfg))?;

    let unit_path = cfg.unit_path(unit);
    if let Some(parent) = unit_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            InstallerError::System(format!("Failed to create systemd directory: {}", e))
        })?;
    }
    write_file_atomic(&unit_path, &content)?;
    set_mode(&unit_path, 0o644)?;
    Ok(unit_path)
}

/// Remove a unit file if present; returns whether anything was removed
pub fn remove_unit(cfg: &InstallConfig, unit: &str) -> Result<bool, InstallerError> {
    let unit_path = cfg.unit_path(unit);
    if !unit_path.exists() {
        return Ok(false);
    }
    fs::remove_file(&unit_path)
        .map_err(|e| InstallerError::System(format!("Failed to remove unit file: {}", e)))?;
    Ok(true)
}
