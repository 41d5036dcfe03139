//! Linux unit control via systemctl, process lookup via /proc

use std::fs;
use std::process::Command;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use super::{ProcessTable, UnitManager};

/// System-scope systemd units
#[derive(Debug, Default, Clone, Copy)]
pub struct Systemctl;

impl Systemctl {
    fn run(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("systemctl")
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute systemctl {}", args.join(" ")))?;

        if !output.status.success() {
            anyhow::bail!(
                "systemctl {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn unit_action(&self, action: &str, unit: &str) -> Result<()> {
        let service_name = format!("{unit}.service");
        self.run(&[action, &service_name])
    }

    /// Whether systemd is the running init system
    pub fn available() -> bool {
        std::path::Path::new("/run/systemd/system").is_dir() && which::which("systemctl").is_ok()
    }
}

impl UnitManager for Systemctl {
    fn start(&self, unit: &str) -> Result<()> {
        self.unit_action("start", unit)
    }

    fn stop(&self, unit: &str) -> Result<()> {
        self.unit_action("stop", unit)
    }

    fn restart(&self, unit: &str) -> Result<()> {
        self.unit_action("restart", unit)
    }

    fn enable(&self, unit: &str) -> Result<()> {
        self.unit_action("enable", unit)
    }

    fn disable(&self, unit: &str) -> Result<()> {
        self.unit_action("disable", unit)
    }

    fn daemon_reload(&self) -> Result<()> {
        self.run(&["daemon-reload"])
    }
}

/// `/proc` scanner
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcTable;

fn real_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|uid| uid.parse().ok())
}

impl ProcessTable for ProcTable {
    fn find(&self, user: &str, pattern: &str) -> Vec<i32> {
        let Ok(Some(user)) = nix::unistd::User::from_name(user) else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir("/proc") else {
            return Vec::new();
        };
        let me = std::process::id() as i32;

        entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().to_str()?.parse::<i32>().ok())
            .filter(|pid| *pid != me)
            .filter(|pid| {
                fs::read_to_string(format!("/proc/{pid}/status"))
                    .ok()
                    .and_then(|s| real_uid(&s))
                    == Some(user.uid.as_raw())
            })
            .filter(|pid| {
                fs::read(format!("/proc/{pid}/cmdline"))
                    .map(|raw| String::from_utf8_lossy(&raw).replace('\0', " ").contains(pattern))
                    .unwrap_or(false)
            })
            .collect()
    }

    fn signal(&self, pid: i32, sig: Signal) -> Result<()> {
        match signal::kill(Pid::from_raw(pid), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to send {sig} to {pid}")),
        }
    }
}
