//! Chrome process lifecycle for one account.
//!
//! This module is the single source of truth for:
//! * Finding a usable Chrome/Chromium executable (env override → PATH →
//!   well-known install paths).
//! * Probing the remote-debugging endpoint (`/json/version`).
//! * Forcibly reclaiming the fixed debug port from a stale process.
//! * Spawning an isolated Chrome (fresh profile dir, own process group) and
//!   tearing the whole helper tree down afterwards.
//!
//! The CDP side of the session lives in `session.rs`; this file never talks
//! the protocol, it only gets a process to the point where the websocket
//! endpoint answers.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use super::BrowserError;

/// Attempts made against `/json/version` before giving up, at 1s intervals.
const PORT_READY_ATTEMPTS: u32 = 20;

/// Grace period after killing the process tree before the port is considered
/// free for the next account.
const PORT_RELEASE_GRACE: Duration = Duration::from_secs(2);

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chrome-family executable.
///
/// Resolution order:
/// 1. Explicit path from config / `CHROME_EXECUTABLE` (checked by the caller).
/// 2. PATH scan — finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "chrome",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

// ── Debug endpoint probe ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Liveness probe for the debug endpoint. Returns the websocket URL when a
/// browser answers on `port`, `None` otherwise.
pub async fn probe_debug_port(http: &reqwest::Client, port: u16) -> Option<String> {
    let url = format!("http://127.0.0.1:{}/json/version", port);
    let resp = http
        .get(&url)
        .timeout(Duration::from_secs(1))
        .send()
        .await
        .ok()?;
    let info: VersionInfo = resp.json().await.ok()?;
    Some(info.web_socket_debugger_url)
}

/// The fixed port is reused serially across accounts, so a process still bound
/// to it is a leftover from a previous account (or a previous run). Kill it
/// before launching; continuing against a foreign browser would hand the new
/// account a contaminated session.
pub async fn reclaim_debug_port(http: &reqwest::Client, port: u16) {
    if probe_debug_port(http, port).await.is_none() {
        return;
    }
    warn!("debug port {} is busy — reclaiming from stale process", port);
    kill_by_port_marker(port);
    tokio::time::sleep(PORT_RELEASE_GRACE).await;
}

/// Kill anything whose command line carries our debug-port flag. Used both for
/// pre-launch reclaim and as the teardown fallback when the process-group kill
/// leaves a detached helper behind.
fn kill_by_port_marker(port: u16) {
    #[cfg(not(target_os = "windows"))]
    {
        let pattern = format!("remote-debugging-port={}", port);
        let _ = Command::new("pkill").args(["-9", "-f", &pattern]).output();
    }

    #[cfg(target_os = "windows")]
    {
        // No pkill equivalent that matches on command line; enumerate and
        // tree-kill matching chrome.exe processes instead.
        let marker = format!("remote-debugging-port={}", port);
        if let Ok(out) = Command::new("wmic")
            .args([
                "process",
                "where",
                "Name='chrome.exe'",
                "get",
                "ProcessId,CommandLine",
                "/FORMAT:CSV",
            ])
            .output()
        {
            let stdout = String::from_utf8_lossy(&out.stdout);
            for line in stdout.lines().filter(|l| l.contains(&marker)) {
                if let Some(pid) = line
                    .split(',')
                    .filter_map(|s| s.trim().parse::<u32>().ok())
                    .last()
                {
                    let _ = Command::new("taskkill")
                        .args(["/PID", &pid.to_string(), "/T", "/F"])
                        .output();
                }
            }
        }
    }
}

// ── Launch & teardown ────────────────────────────────────────────────────────

/// A spawned Chrome process plus the on-disk state it owns.
pub struct LaunchedChrome {
    child: Child,
    pub profile_dir: PathBuf,
    pub port: u16,
    pub ws_url: String,
}

impl LaunchedChrome {
    /// Spawn an isolated Chrome for `account_index` and wait for its debug
    /// endpoint to answer.
    ///
    /// The profile directory is namespaced by timestamp + account index so
    /// serial accounts never share cookies, and the process gets its own
    /// process group so the whole helper tree can be signalled at teardown.
    pub async fn spawn(
        http: &reqwest::Client,
        chrome_path: Option<String>,
        port: u16,
        headless: bool,
        account_index: usize,
    ) -> Result<Self, BrowserError> {
        let exe = chrome_path
            .or_else(find_chrome_executable)
            .ok_or(BrowserError::ChromeNotFound)?;

        let profile_dir = std::env::temp_dir().join(format!(
            "hiden_renew_{}_{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S"),
            account_index
        ));
        let _ = std::fs::create_dir_all(&profile_dir);

        info!("🚀 launching Chrome for account {} ({})", account_index, exe);

        let mut cmd = Command::new(&exe);
        cmd.arg(format!("--remote-debugging-port={}", port))
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-gpu")
            .arg("--window-size=1280,720")
            // Required on constrained hosts (CI containers, root)
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            // Hide the automation fingerprint at the engine level
            .arg("--disable-blink-features=AutomationControlled")
            // Keep cross-origin frames in the page's target so the challenge
            // solver can reach their execution contexts over one CDP session.
            .arg("--disable-features=IsolateOrigins,site-per-process")
            .arg("--disable-site-isolation-trials")
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if headless {
            cmd.arg("--headless=new");
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .map_err(|e| BrowserError::LaunchFailed(format!("spawn {}: {}", exe, e)))?;

        info!("⏳ waiting for debug port {}...", port);
        for _ in 0..PORT_READY_ATTEMPTS {
            if let Some(ws_url) = probe_debug_port(http, port).await {
                return Ok(Self {
                    child,
                    profile_dir,
                    port,
                    ws_url,
                });
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        // Never leave the half-started process behind on a failed launch.
        let mut failed = Self {
            child,
            profile_dir,
            port,
            ws_url: String::new(),
        };
        failed.terminate_tree().await;
        Err(BrowserError::LaunchTimeout(PORT_READY_ATTEMPTS))
    }

    /// Kill the browser and every helper it forked, then free the port.
    ///
    /// Chrome forks renderers and GPU helpers that outlive a plain child kill,
    /// so this goes process-group first, command-line-marker second, and only
    /// reports — never propagates — what went wrong. Always followed by a
    /// grace wait so the next account's launch finds the port closed.
    pub async fn terminate_tree(&mut self) {
        #[cfg(unix)]
        {
            let pid = self.child.id();
            // Negative pid addresses the whole process group.
            let _ = Command::new("kill")
                .args(["-9", &format!("-{}", pid)])
                .output();
        }

        #[cfg(windows)]
        {
            let _ = Command::new("taskkill")
                .args(["/PID", &self.child.id().to_string(), "/T", "/F"])
                .output();
        }

        if let Err(e) = self.child.kill() {
            // Already gone is the normal case after the group kill.
            tracing::debug!("child kill: {}", e);
        }
        let _ = self.child.wait();

        kill_by_port_marker(self.port);
        tokio::time::sleep(PORT_RELEASE_GRACE).await;

        if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
            tracing::debug!(
                "profile cleanup {} failed: {}",
                self.profile_dir.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_parses_devtools_payload() {
        let raw = r#"{
            "Browser": "Chrome/131.0.6778.85",
            "Protocol-Version": "1.3",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/abc-123"
        }"#;
        let info: VersionInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(
            info.web_socket_debugger_url,
            "ws://127.0.0.1:9222/devtools/browser/abc-123"
        );
    }

    #[tokio::test]
    async fn probe_on_closed_port_is_none() {
        let http = reqwest::Client::new();
        // Port 1 is never a devtools endpoint.
        assert!(probe_debug_port(&http, 1).await.is_none());
    }
}
