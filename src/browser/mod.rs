pub mod launcher;
pub mod session;

pub use launcher::{find_chrome_executable, probe_debug_port, reclaim_debug_port, LaunchedChrome};
pub use session::BrowserSession;

use thiserror::Error;

/// Failures around the managed Chrome process and its CDP connection.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("no Chrome/Chromium executable found — install Chrome or set CHROME_EXECUTABLE")]
    ChromeNotFound,

    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("browser did not open its debug port within {0} attempts")]
    LaunchTimeout(u32),

    #[error("browser connection lost: {0}")]
    ConnectionLost(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("in-page script error: {0}")]
    Javascript(String),
}
