//! Service lifecycle control for the managed units
//!
//! Stopping is stop-then-verify: ask the service manager, then look for
//! surviving worker processes and escalate through bounded signal rounds.
//! The strict variant disables the unit first so it cannot respawn workers
//! while the kill loop runs.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use log::{info, warn};
use nix::sys::signal::Signal;

use crate::config::ManagedUnit;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux_control;
        pub use linux_control::{ProcTable, Systemctl};
    } else {
        compile_error!("acw-install only supports Linux hosts");
    }
}

/// Service-manager operations on a single unit
pub trait UnitManager {
    fn start(&self, unit: &str) -> Result<()>;
    fn stop(&self, unit: &str) -> Result<()>;
    fn restart(&self, unit: &str) -> Result<()>;
    fn enable(&self, unit: &str) -> Result<()>;
    fn disable(&self, unit: &str) -> Result<()>;
    fn daemon_reload(&self) -> Result<()>;
}

/// Process lookup and signalling
pub trait ProcessTable {
    /// Pids owned by `user` whose command line contains `pattern`
    fn find(&self, user: &str, pattern: &str) -> Vec<i32>;
    fn signal(&self, pid: i32, signal: Signal) -> Result<()>;
}

/// Bounds for the kill loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillPolicy {
    pub rounds: u32,
    pub round_delay: Duration,
    /// Presence re-checks after the kill loop (strict variant only)
    pub verify_attempts: u32,
    pub verify_interval: Duration,
}

impl Default for KillPolicy {
    fn default() -> Self {
        Self {
            rounds: 3,
            round_delay: Duration::from_secs(2),
            verify_attempts: 30,
            verify_interval: Duration::from_secs(1),
        }
    }
}

fn find_workers(table: &dyn ProcessTable, users: &[String], pattern: &str) -> Vec<i32> {
    let mut pids: Vec<i32> = users.iter().flat_map(|u| table.find(u, pattern)).collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Signal matching workers until none remain, for at most `policy.rounds` rounds.
///
/// Round one sends SIGTERM, later rounds SIGKILL. Returns the number of
/// rounds in which signals were sent.
pub async fn terminate_workers(
    table: &dyn ProcessTable,
    users: &[String],
    pattern: &str,
    policy: &KillPolicy,
) -> Result<u32> {
    for round in 0..policy.rounds {
        let pids = find_workers(table, users, pattern);
        if pids.is_empty() {
            return Ok(round);
        }

        let signal = if round == 0 { Signal::SIGTERM } else { Signal::SIGKILL };
        info!("Round {}: sending {signal} to {pattern} workers {pids:?}", round + 1);
        for pid in pids {
            if let Err(e) = table.signal(pid, signal) {
                warn!("Failed to signal {pid}: {e:#}");
            }
        }
        tokio::time::sleep(policy.round_delay).await;
    }

    let survivors = find_workers(table, users, pattern);
    if survivors.is_empty() {
        Ok(policy.rounds)
    } else {
        bail!(
            "{pattern} workers {survivors:?} still running after {} signal rounds",
            policy.rounds
        )
    }
}

/// Stop each unit, then make sure its workers are gone.
///
/// Survivors are reported per unit; the caller decides whether to carry on.
pub async fn stop_units(
    units: &[ManagedUnit],
    manager: &dyn UnitManager,
    table: &dyn ProcessTable,
    users: &[String],
    policy: &KillPolicy,
) -> Vec<anyhow::Error> {
    let mut failures = Vec::new();
    for unit in units {
        if let Err(e) = manager.stop(unit.name) {
            warn!("systemctl stop {} failed: {e:#}", unit.name);
        }
        if let Err(e) = terminate_workers(table, users, unit.worker_pattern, policy).await {
            warn!("{e:#}");
            failures.push(e);
        }
    }
    failures
}

/// Disable, stop, kill, then keep re-checking until the workers stay gone
pub async fn stop_units_strict(
    units: &[ManagedUnit],
    manager: &dyn UnitManager,
    table: &dyn ProcessTable,
    users: &[String],
    policy: &KillPolicy,
) -> Vec<anyhow::Error> {
    let mut failures = Vec::new();
    for unit in units {
        if let Err(e) = manager.disable(unit.name) {
            warn!("systemctl disable {} failed: {e:#}", unit.name);
        }
        if let Err(e) = manager.stop(unit.name) {
            warn!("systemctl stop {} failed: {e:#}", unit.name);
        }
        if let Err(e) = terminate_workers(table, users, unit.worker_pattern, policy).await {
            warn!("{e:#}");
        }

        match verify_gone(table, users, unit.worker_pattern, policy).await {
            Ok(()) => info!("{} stopped", unit.name),
            Err(e) => {
                warn!("{e:#}");
                failures.push(e);
            }
        }
    }
    failures
}

async fn verify_gone(
    table: &dyn ProcessTable,
    users: &[String],
    pattern: &str,
    policy: &KillPolicy,
) -> Result<()> {
    for _ in 0..policy.verify_attempts {
        let pids = find_workers(table, users, pattern);
        if pids.is_empty() {
            return Ok(());
        }
        // Respawned behind our back
        for pid in pids {
            let _ = table.signal(pid, Signal::SIGKILL);
        }
        tokio::time::sleep(policy.verify_interval).await;
    }

    let survivors = find_workers(table, users, pattern);
    if survivors.is_empty() {
        Ok(())
    } else {
        bail!(
            "{pattern} workers {survivors:?} keep coming back after {} checks",
            policy.verify_attempts
        )
    }
}

/// Start every unit whose entry point exists; returns the started unit names
pub fn start_units<'a>(
    units: &'a [ManagedUnit],
    manager: &dyn UnitManager,
    install_dir: &Path,
) -> Result<Vec<&'a str>> {
    let mut started = Vec::new();
    for unit in units {
        let entry = install_dir.join(unit.entry_point);
        if !entry.exists() {
            info!("Skipping {}: {} not installed", unit.name, entry.display());
            continue;
        }
        manager.start(unit.name)?;
        started.push(unit.name);
    }
    Ok(started)
}

/// Restart every installed unit
pub fn restart_units<'a>(
    units: &'a [ManagedUnit],
    manager: &dyn UnitManager,
    install_dir: &Path,
) -> Result<Vec<&'a str>> {
    let mut restarted = Vec::new();
    for unit in units {
        if !install_dir.join(unit.entry_point).exists() {
            continue;
        }
        manager.restart(unit.name)?;
        restarted.push(unit.name);
    }
    Ok(restarted)
}
