//! Distribution detection and system package installation

use std::fmt;
use std::fs;
use std::process::Command;

use log::info;

use crate::install::InstallerError;

pub const OS_RELEASE: &str = "/etc/os-release";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistroFamily {
    Debian,
    Fedora,
    Suse,
    Arch,
    Alpine,
}

/// Packages one family needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageSet {
    pub common: &'static [&'static str],
    /// Offscreen rendering libraries for the bundled Calibre tools
    pub headless_graphics: &'static [&'static str],
    pub desktop_graphics: &'static [&'static str],
}

impl PackageSet {
    pub fn for_host(&self, desktop: bool) -> Vec<&'static str> {
        let graphics = if desktop { self.desktop_graphics } else { self.headless_graphics };
        self.common.iter().chain(graphics).copied().collect()
    }
}

const DEBIAN: PackageSet = PackageSet {
    common: &[
        "python3", "python3-venv", "python3-pip", "python3-dev", "build-essential", "git", "rsync",
        "sqlite3", "curl", "xz-utils", "inotify-tools", "imagemagick", "ghostscript", "libmagic1",
        "libldap2-dev", "libsasl2-dev",
    ],
    headless_graphics: &["libegl1", "libopengl0", "libxkbcommon0", "libxcb-cursor0", "libnss3"],
    desktop_graphics: &["libgl1", "libxkbcommon-x11-0", "libxcomposite1", "libxdamage1", "libxrandr2"],
};

const FEDORA: PackageSet = PackageSet {
    common: &[
        "python3", "python3-pip", "python3-devel", "gcc", "git", "rsync", "sqlite", "curl", "xz",
        "inotify-tools", "ImageMagick", "ghostscript", "file-libs", "openldap-devel", "cyrus-sasl-devel",
    ],
    headless_graphics: &["mesa-libEGL", "libglvnd-opengl", "libxkbcommon", "nss"],
    desktop_graphics: &["mesa-libGL", "libxkbcommon-x11", "libXcomposite", "libXdamage", "libXrandr"],
};

const SUSE: PackageSet = PackageSet {
    common: &[
        "python3", "python3-pip", "python3-devel", "gcc", "git", "rsync", "sqlite3", "curl", "xz",
        "inotify-tools", "ImageMagick", "ghostscript", "libmagic1", "openldap2-devel", "cyrus-sasl-devel",
    ],
    headless_graphics: &["libEGL1", "libOpenGL0", "libxkbcommon0", "mozilla-nss"],
    desktop_graphics: &["Mesa-libGL1", "libxkbcommon-x11-0", "libXcomposite1", "libXdamage1", "libXrandr2"],
};

const ARCH: PackageSet = PackageSet {
    common: &[
        "python", "python-pip", "base-devel", "git", "rsync", "sqlite", "curl", "xz", "inotify-tools",
        "imagemagick", "ghostscript", "file", "libldap", "libsasl",
    ],
    headless_graphics: &["libglvnd", "libxkbcommon", "nss"],
    desktop_graphics: &["mesa", "libxkbcommon-x11", "libxcomposite", "libxdamage", "libxrandr"],
};

const ALPINE: PackageSet = PackageSet {
    common: &[
        "python3", "py3-pip", "python3-dev", "build-base", "bash", "git", "rsync", "sqlite", "curl",
        "xz", "inotify-tools", "imagemagick", "ghostscript", "libmagic", "openldap-dev", "cyrus-sasl-dev",
    ],
    headless_graphics: &["mesa-egl", "libxkbcommon", "nss"],
    desktop_graphics: &["mesa-gl", "libxcomposite", "libxdamage", "libxrandr"],
};

impl DistroFamily {
    fn from_id(id: &str) -> Option<Self> {
        match id {
            "debian" | "ubuntu" | "raspbian" | "linuxmint" | "pop" | "elementary" => Some(Self::Debian),
            "fedora" | "rhel" | "centos" | "rocky" | "almalinux" | "ol" => Some(Self::Fedora),
            "suse" | "sles" | "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" => Some(Self::Suse),
            "arch" | "manjaro" | "endeavouros" => Some(Self::Arch),
            "alpine" => Some(Self::Alpine),
            _ => None,
        }
    }

    /// Family from `/etc/os-release` content: `ID` first, then each `ID_LIKE` entry
    pub fn from_os_release(content: &str) -> Option<Self> {
        let value = |key: &str| {
            content.lines().find_map(|line| {
                let (k, v) = line.split_once('=')?;
                (k.trim() == key).then(|| v.trim().trim_matches('"').trim_matches('\'').to_lowercase())
            })
        };

        let id = value("ID").unwrap_or_default();
        let like = value("ID_LIKE").unwrap_or_default();
        std::iter::once(id.as_str())
            .chain(like.split_whitespace())
            .find_map(Self::from_id)
    }

    pub fn detect() -> Result<Self, InstallerError> {
        let content = fs::read_to_string(OS_RELEASE)?;
        Self::from_os_release(&content)
            .ok_or_else(|| InstallerError::System(format!("unsupported distribution (see {OS_RELEASE})")))
    }

    pub fn packages(self) -> &'static PackageSet {
        match self {
            Self::Debian => &DEBIAN,
            Self::Fedora => &FEDORA,
            Self::Suse => &SUSE,
            Self::Arch => &ARCH,
            Self::Alpine => &ALPINE,
        }
    }

    /// Package manager program and its non-interactive install arguments
    pub fn install_command(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Debian => ("apt-get", &["install", "-y", "--no-install-recommends"]),
            Self::Fedora => ("dnf", &["install", "-y"]),
            Self::Suse => ("zypper", &["--non-interactive", "install"]),
            Self::Arch => ("pacman", &["-S", "--needed", "--noconfirm"]),
            Self::Alpine => ("apk", &["add", "--no-cache"]),
        }
    }

    /// Index refresh to run first, if the manager needs one
    fn refresh_command(self) -> Option<(&'static str, &'static [&'static str])> {
        match self {
            Self::Debian => Some(("apt-get", &["update"])),
            Self::Arch => Some(("pacman", &["-Sy"])),
            _ => None,
        }
    }
}

impl fmt::Display for DistroFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debian => "Debian",
            Self::Fedora => "Fedora",
            Self::Suse => "SUSE",
            Self::Arch => "Arch",
            Self::Alpine => "Alpine",
        })
    }
}

fn run(program: &'static str, args: &[&str]) -> Result<(), InstallerError> {
    let path = which::which(program).map_err(|_| InstallerError::MissingTool(program))?;
    let status = Command::new(path)
        .args(args)
        .env("DEBIAN_FRONTEND", "noninteractive")
        .status()
        .map_err(|e| InstallerError::System(format!("Failed to execute {program}: {e}")))?;
    if !status.success() {
        return Err(InstallerError::System(format!("{program} {} exited with {status}", args.join(" "))));
    }
    Ok(())
}

/// Install the family's packages for a headless or desktop host
pub fn install_packages(family: DistroFamily, desktop: bool) -> Result<(), InstallerError> {
    let packages = family.packages().for_host(desktop);
    info!("Installing {} {} packages", packages.len(), family);

    if let Some((program, args)) = family.refresh_command() {
        run(program, args)?;
    }
    let (program, args) = family.install_command();
    let all: Vec<&str> = args.iter().copied().chain(packages).collect();
    run(program, &all)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_family_from_id_like() {
        let ubuntu = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n";
        assert_eq!(DistroFamily::from_os_release(ubuntu), Some(DistroFamily::Debian));

        let rocky = "ID=\"rocky\"\nID_LIKE=\"rhel centos fedora\"\n";
        assert_eq!(DistroFamily::from_os_release(rocky), Some(DistroFamily::Fedora));

        let derivative = "ID=somethingnew\nID_LIKE=\"arch\"\n";
        assert_eq!(DistroFamily::from_os_release(derivative), Some(DistroFamily::Arch));

        assert_eq!(DistroFamily::from_os_release("ID=gentoo\n"), None);
    }

    #[test]
    fn every_family_ships_rsync_and_git() {
        for family in [
            DistroFamily::Debian,
            DistroFamily::Fedora,
            DistroFamily::Suse,
            DistroFamily::Arch,
            DistroFamily::Alpine,
        ] {
            let headless = family.packages().for_host(false);
            assert!(headless.contains(&"rsync") && headless.contains(&"git"), "{family}");
            assert_ne!(family.packages().for_host(true), headless, "{family}");
        }
    }
}
