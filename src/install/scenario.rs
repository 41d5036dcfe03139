//! Installation scenario resolution

use std::fmt;

use serde::Serialize;

/// Source layout detected for this run. Exactly one is selected per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Scenario {
    /// Nothing to install from
    NoSource,
    /// Source lives outside the install dir and must be copied in
    OutsideWithoutTemplate,
    GitRepoWithTemplate,
    GitRepoWithoutTemplate,
    /// Release archive extracted directly into the install dir
    ExtractedWithTemplate,
    ExtractedWithoutTemplate,
}

impl Scenario {
    pub fn is_git(self) -> bool {
        matches!(self, Self::GitRepoWithTemplate | Self::GitRepoWithoutTemplate)
    }

    pub fn has_template(self) -> bool {
        matches!(self, Self::GitRepoWithTemplate | Self::ExtractedWithTemplate)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoSource => "no source",
            Self::OutsideWithoutTemplate => "source outside install dir, no template",
            Self::GitRepoWithTemplate => "git checkout with template",
            Self::GitRepoWithoutTemplate => "git checkout without template",
            Self::ExtractedWithTemplate => "extracted release with template",
            Self::ExtractedWithoutTemplate => "extracted release without template",
        };
        f.write_str(s)
    }
}

/// Pick the scenario; first matching row wins.
///
/// `has_marker` is the dependency manifest inside the install dir; without
/// it a non-git, template-less source is treated as living elsewhere.
pub fn resolve(source_present: bool, is_git_repo: bool, has_template: bool, has_marker: bool) -> Scenario {
    match (source_present, is_git_repo, has_template) {
        (false, _, _) => Scenario::NoSource,
        (true, true, true) => Scenario::GitRepoWithTemplate,
        (true, true, false) => Scenario::GitRepoWithoutTemplate,
        (true, false, true) => Scenario::ExtractedWithTemplate,
        (true, false, false) if has_marker => Scenario::ExtractedWithoutTemplate,
        (true, false, false) => Scenario::OutsideWithoutTemplate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_source_short_circuits() {
        for git in [false, true] {
            for template in [false, true] {
                for marker in [false, true] {
                    assert_eq!(resolve(false, git, template, marker), Scenario::NoSource);
                }
            }
        }
    }

    #[test]
    fn marker_only_matters_without_git_and_template() {
        assert_eq!(resolve(true, false, false, true), Scenario::ExtractedWithoutTemplate);
        assert_eq!(resolve(true, false, false, false), Scenario::OutsideWithoutTemplate);
        assert_eq!(resolve(true, true, false, false), Scenario::GitRepoWithoutTemplate);
        assert_eq!(resolve(true, false, true, false), Scenario::ExtractedWithTemplate);
    }
}
