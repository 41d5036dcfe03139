//! Run-as identities and first-success probing across candidate users.
//!
//! Working-tree checks need read access as a user git trusts for that
//! directory, which root frequently is not (`safe.directory`). Candidates are
//! tried in priority order and the first one that succeeds is kept for every
//! later operation on the same checkout.

use std::fmt::Display;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::process::Command;

use log::debug;

use crate::config::InstallConfig;

fn owner_name(path: &Path) -> Option<String> {
    let uid = std::fs::metadata(path).ok()?.uid();
    nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|u| u.name)
}

/// Candidate users for operating on `dir`, deduplicated, order preserved:
/// legacy service account, owner of the legacy install dir, owner of `dir`,
/// root, service account, invoking user.
///
/// The legacy owner comes before `dir`'s owner since a migrated tree has
/// already been handed to the service account.
pub fn git_owner_candidates(cfg: &InstallConfig, dir: &Path) -> Vec<String> {
    let ordered = [
        Some(cfg.legacy_user.clone()),
        owner_name(&cfg.legacy.install_dir),
        owner_name(dir),
        Some("root".to_string()),
        Some(cfg.service_user.clone()),
        Some(cfg.invoking_user.clone()),
    ];

    dedup_preserving_order(ordered.into_iter().flatten())
}

pub fn dedup_preserving_order(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Run `op` as each candidate in turn; the first success wins.
///
/// Returns the winning identity with the operation's value, or `None` when
/// every candidate failed.
pub fn try_as<T, E, F>(candidates: &[String], mut op: F) -> Option<(String, T)>
where
    F: FnMut(&str) -> Result<T, E>,
    E: Display,
{
    for user in candidates {
        match op(user) {
            Ok(value) => return Some((user.clone(), value)),
            Err(e) => debug!("candidate {user} failed: {e}"),
        }
    }
    None
}

/// Build a command that runs `program` as `user`.
///
/// Runs directly when `user` is the current user, otherwise through
/// `runuser` (root) so no password prompt can appear.
pub fn command_as(user: &str, program: &str) -> Command {
    if is_current_user(user) {
        return Command::new(program);
    }

    let mut cmd = Command::new("runuser");
    cmd.args(["-u", user, "--", program]);
    cmd
}

fn is_current_user(user: &str) -> bool {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .is_some_and(|u| u.name == user)
}

/// Home directory of `user`, used for backups owned by the invoking user
pub fn home_dir_of(user: &str) -> Option<std::path::PathBuf> {
    nix::unistd::User::from_name(user)
        .ok()
        .flatten()
        .map(|u| u.dir)
        .or_else(dirs::home_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence() {
        let got = dedup_preserving_order(
            ["abc", "root", "abc", "autocaliweb", "root", ""].map(String::from),
        );
        assert_eq!(got, ["abc", "root", "autocaliweb"]);
    }

    fn me() -> String {
        nix::unistd::User::from_uid(nix::unistd::getuid())
            .unwrap()
            .unwrap()
            .name
    }

    #[test]
    fn legacy_owner_follows_legacy_account() {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = InstallConfig::new(crate::config::InstallPaths::native());
        cfg.legacy_user = "abc".into();
        cfg.service_user = "autocaliweb".into();
        cfg.invoking_user = "alice".into();
        cfg.legacy.install_dir = root.path().to_path_buf();

        let got = git_owner_candidates(&cfg, &root.path().join("missing"));
        assert_eq!(got[0], "abc");
        assert_eq!(got[1], me());
        assert!(got.ends_with(&["autocaliweb".to_string(), "alice".to_string()]));
    }

    #[test]
    fn target_owner_is_tried_when_legacy_dir_is_gone() {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = InstallConfig::new(crate::config::InstallPaths::native());
        cfg.legacy_user = "abc".into();
        cfg.legacy.install_dir = root.path().join("gone");

        let got = git_owner_candidates(&cfg, root.path());
        assert_eq!(got[..2], ["abc".to_string(), me()]);
        assert!(got.contains(&"root".to_string()));
    }

    #[test]
    fn first_success_wins_and_stops() {
        let candidates = ["abc", "alice", "root"].map(String::from);
        let mut tried = Vec::new();
        let won = try_as(&candidates, |user| {
            tried.push(user.to_string());
            if user == "alice" { Ok(7) } else { Err("not a work tree") }
        });
        assert_eq!(won, Some(("alice".to_string(), 7)));
        assert_eq!(tried, ["abc", "alice"]);
    }

    #[test]
    fn all_failures_yield_none() {
        let candidates = ["abc"].map(String::from);
        let won: Option<(String, ())> = try_as(&candidates, |_| Err("nope"));
        assert!(won.is_none());
    }
}
