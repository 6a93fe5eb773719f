//! Browser discovery and launch configuration.
//!
//! Single source of truth for:
//! * Finding a usable executable for the configured browser family.
//! * Building the chromiumoxide `BrowserConfig` around a persistent profile
//!   directory, so a QR pairing survives across runs.
//! * Clearing a stale `SingletonLock` left behind by a crashed run.

use crate::core::config::{self, BrowserFamily};
use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

// A fixed desktop UA: WhatsApp ties the paired session to it, and headless
// Chrome's default UA is refused outright.
const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36";

// ── Browser executable discovery ─────────────────────────────────────────────

/// What this machine can drive. Built once and passed into the session
/// manager instead of being probed from global state on every call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrowserCapability {
    pub family: BrowserFamily,
    pub executable: Option<String>,
    pub reason: Option<String>,
}

impl BrowserCapability {
    pub fn detect(family: BrowserFamily) -> Self {
        if family == BrowserFamily::Firefox {
            return Self::unavailable(
                family,
                "firefox cannot be driven over CDP; use chrome or edge",
            );
        }
        match find_browser_executable(family) {
            Some(exe) => Self {
                family,
                executable: Some(exe),
                reason: None,
            },
            None => Self::unavailable(
                family,
                &format!(
                    "no {} executable found (set {} if installed in a non-standard location)",
                    family.as_str(),
                    match family {
                        BrowserFamily::Edge => config::ENV_EDGE_EXECUTABLE,
                        _ => config::ENV_CHROME_EXECUTABLE,
                    }
                ),
            ),
        }
    }

    pub fn unavailable(family: BrowserFamily, reason: &str) -> Self {
        Self {
            family,
            executable: None,
            reason: Some(reason.to_string()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.executable.is_some()
    }
}

/// Find an executable for `family`.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` / `EDGE_EXECUTABLE` env var (explicit override)
/// 2. PATH lookup via `which`.
/// 3. OS-specific well-known install paths.
pub fn find_browser_executable(family: BrowserFamily) -> Option<String> {
    if let Some(p) = config::browser_executable_override(family) {
        return Some(p);
    }

    let path_candidates: &[&str] = match family {
        BrowserFamily::Chrome => &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "chrome",
        ],
        BrowserFamily::Edge => &["microsoft-edge", "microsoft-edge-stable", "msedge"],
        BrowserFamily::Firefox => return None,
    };
    for exe in path_candidates {
        if let Ok(path) = which::which(exe) {
            return Some(path.to_string_lossy().to_string());
        }
    }

    well_known_paths(family)
        .iter()
        .find(|c| Path::new(c).exists())
        .map(|c| c.to_string())
}

fn well_known_paths(family: BrowserFamily) -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        match family {
            BrowserFamily::Chrome => &[
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "/Applications/Chromium.app/Contents/MacOS/Chromium",
            ],
            BrowserFamily::Edge => {
                &["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
            }
            BrowserFamily::Firefox => &[],
        }
    }

    #[cfg(target_os = "linux")]
    {
        match family {
            BrowserFamily::Chrome => &[
                "/usr/bin/google-chrome",
                "/usr/bin/chromium",
                "/usr/bin/chromium-browser",
                "/usr/local/bin/chromium",
                "/snap/bin/chromium",
            ],
            BrowserFamily::Edge => &["/usr/bin/microsoft-edge", "/opt/microsoft/msedge/msedge"],
            BrowserFamily::Firefox => &[],
        }
    }

    #[cfg(target_os = "windows")]
    {
        match family {
            BrowserFamily::Chrome => &[
                r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            ],
            BrowserFamily::Edge => &[
                r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
                r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
            ],
            BrowserFamily::Firefox => &[],
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        let _ = family;
        &[]
    }
}

// ── Launch config builder ────────────────────────────────────────────────────

/// Build a `BrowserConfig` that keeps its state in `profile_dir`.
///
/// Headful by default: the first run needs a visible window for QR pairing.
pub fn build_session_config(exe: &str, profile_dir: &Path, headless: bool) -> Result<BrowserConfig> {
    let builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .user_data_dir(PathBuf::from(profile_dir))
        .window_size(1280, 900)
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-infobars")
        .arg("--disable-session-crashed-bubble")
        .arg("--restore-last-session=false")
        .arg("--password-store=basic")
        .arg("--disable-dev-shm-usage")
        // Stealth: suppress CDP automation fingerprint
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", DESKTOP_USER_AGENT));

    let builder = if headless {
        builder.new_headless_mode()
    } else {
        builder.with_head()
    };

    builder
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {}", e))
}

/// Remove `SingletonLock` from a profile when it is older than a short grace
/// window. Callers hold the profile's exclusive file lock, so no live session
/// of ours can own it.
pub fn remove_stale_singleton_lock(profile_dir: &Path) {
    let lock_path = profile_dir.join("SingletonLock");
    let meta = match std::fs::symlink_metadata(&lock_path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let stale = SystemTime::now()
        .duration_since(modified)
        .map(|d| d >= Duration::from_secs(120))
        .unwrap_or(false);
    if !stale {
        return;
    }

    match std::fs::remove_file(&lock_path) {
        Ok(_) => info!(
            "browser_manager: removed stale SingletonLock at {}",
            lock_path.display()
        ),
        Err(e) => warn!(
            "browser_manager: failed to remove stale SingletonLock at {}: {}",
            lock_path.display(),
            e
        ),
    }
}
