//! Browser driver discovery.
//!
//! With the DevTools protocol the "driver" is the Chromium-family executable
//! itself. Lookup order: explicit override, `ATTENDANCE_BROWSER`, PATH, then
//! well-known install locations (skipped when `ATTENDANCE_SKIP_OS_PATHS` is set).

use std::env;
use std::path::{Path, PathBuf};

use attendance_core_types::{DriverInfo, Strategy};
use tracing::{debug, warn};

use crate::error::DriverError;

pub const BROWSER_ENV: &str = "ATTENDANCE_BROWSER";
pub const SKIP_OS_PATHS_ENV: &str = "ATTENDANCE_SKIP_OS_PATHS";

/// Filesystem/environment reads performed by the locator.
pub trait FsProbe: Send + Sync {
    fn env(&self, key: &str) -> Option<String>;
    fn is_executable(&self, path: &Path) -> bool;
    fn which(&self, name: &str) -> Option<PathBuf>;
}

/// Probe backed by the real process environment and filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProbe;

impl FsProbe for SystemProbe {
    fn env(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn is_executable(&self, path: &Path) -> bool {
        is_executable_file(path)
    }

    fn which(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }
}

impl<P: FsProbe + ?Sized> FsProbe for std::sync::Arc<P> {
    fn env(&self, key: &str) -> Option<String> {
        (**self).env(key)
    }

    fn is_executable(&self, path: &Path) -> bool {
        (**self).is_executable(path)
    }

    fn which(&self, name: &str) -> Option<PathBuf> {
        (**self).which(name)
    }
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

#[derive(Clone, Debug, Default)]
pub struct DriverLocator<P = SystemProbe> {
    probe: P,
}

impl DriverLocator<SystemProbe> {
    pub fn system() -> Self {
        Self { probe: SystemProbe }
    }
}

impl<P: FsProbe> DriverLocator<P> {
    pub fn with_probe(probe: P) -> Self {
        Self { probe }
    }

    /// Resolves the driver for `strategy`. The lightweight strategy needs no
    /// driver and returns `None` without any lookup.
    pub fn locate(
        &self,
        strategy: Strategy,
        override_path: Option<&Path>,
    ) -> Result<Option<DriverInfo>, DriverError> {
        if !strategy.needs_driver() {
            return Ok(None);
        }

        let mut searched = Vec::new();

        if let Some(path) = override_path.filter(|p| !p.as_os_str().is_empty()) {
            searched.push(path.display().to_string());
            if self.probe.is_executable(path) {
                debug!(path = %path.display(), "using driver override");
                return Ok(Some(DriverInfo::new(path)));
            }
            warn!(
                path = %path.display(),
                "driver override is missing or not executable; searching defaults"
            );
        }

        if let Some(raw) = self.probe.env(BROWSER_ENV) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                let candidate = PathBuf::from(trimmed);
                searched.push(format!("${BROWSER_ENV}={trimmed}"));
                if self.probe.is_executable(&candidate) {
                    return Ok(Some(DriverInfo::new(candidate)));
                }
            }
        }

        for name in browser_executable_names() {
            searched.push(format!("PATH:{name}"));
            if let Some(path) = self.probe.which(name) {
                debug!(path = %path.display(), "driver found on PATH");
                return Ok(Some(DriverInfo::new(path)));
            }
        }

        let skip_defaults = self
            .probe
            .env(SKIP_OS_PATHS_ENV)
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false);

        if !skip_defaults {
            for candidate in os_specific_browser_paths() {
                searched.push(candidate.display().to_string());
                if self.probe.is_executable(&candidate) {
                    return Ok(Some(DriverInfo::new(candidate)));
                }
            }
        }

        Err(DriverError::NotFound { searched })
    }

    /// Re-checks that a previously located driver is still usable.
    pub fn revalidate(&self, info: &DriverInfo) -> Result<(), DriverError> {
        if self.probe.is_executable(&info.path) {
            Ok(())
        } else {
            Err(DriverError::NotFound {
                searched: vec![info.path.display().to_string()],
            })
        }
    }
}

/// Convenience wrapper over the system probe.
pub fn locate(
    strategy: Strategy,
    override_path: Option<&Path>,
) -> Result<Option<DriverInfo>, DriverError> {
    DriverLocator::system().locate(strategy, override_path)
}

pub fn browser_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(any(
        target_os = "macos",
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd"
    ))]
    {
        &[
            "chromium",
            "chromium-browser",
            "google-chrome-stable",
            "google-chrome",
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd"
    )))]
    {
        &["chrome"]
    }
}

fn os_specific_browser_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for root in windows_search_roots() {
            paths.push(root.join("Google/Chrome/Application/chrome.exe"));
            paths.push(root.join("Chromium/Application/chrome.exe"));
            paths.push(root.join("Microsoft/Edge/Application/msedge.exe"));
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    // Termux ships chromium under its prefix; proot distros use the usual
    // Debian/Ubuntu locations or snap.
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    {
        vec![
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/lib/chromium/chromium"),
            PathBuf::from("/usr/lib/chromium-browser/chromium-browser"),
            PathBuf::from("/snap/bin/chromium"),
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/data/data/com.termux/files/usr/bin/chromium"),
            PathBuf::from("/data/data/com.termux/files/usr/bin/chromium-browser"),
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd"
    )))]
    {
        Vec::new()
    }
}

#[cfg(target_os = "windows")]
fn windows_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                roots.push(PathBuf::from(trimmed));
            }
        }
    }
    roots
}
