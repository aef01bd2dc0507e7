//! Batch driver: one isolated browser per account, strictly serial.
//!
//! The fixed debug port is the only resource shared across accounts, so each
//! iteration is reclaim → launch → login → renew → teardown, with teardown
//! guaranteed regardless of how the middle went. Per-account failures are
//! recorded in the summary and never stop the batch.

pub mod login;

use tracing::{error, info, warn};

use crate::browser::{launcher, BrowserSession, LaunchedChrome};
use crate::challenge::TurnstileSolver;
use crate::core::config::RenewConfig;
use crate::core::types::{Account, RunResult, RunStatus, RunSummary};
use crate::portal::RenewalBot;

pub async fn run_batch(
    http: &reqwest::Client,
    cfg: &RenewConfig,
    accounts: &[Account],
) -> RunSummary {
    let port = cfg.resolve_debug_port();
    let chrome_path = cfg.resolve_chrome_path();
    let headless = cfg.resolve_headless();
    let renew_days = cfg.resolve_renew_days();

    let mut summary = RunSummary::default();
    for (index, account) in accounts.iter().enumerate() {
        info!(
            "=== processing account {} of {}: {} ===",
            index + 1,
            accounts.len(),
            account.username
        );
        let result = process_account(
            http,
            chrome_path.clone(),
            port,
            headless,
            renew_days,
            account,
            index,
        )
        .await;
        info!(
            "[{}] account finished: {} ({} service(s))",
            result.username, result.status, result.services
        );
        summary.push(result);
    }
    summary
}

/// Run one account end to end. Always returns a result — every failure mode
/// maps onto a `RunStatus` — and always tears the browser down.
async fn process_account(
    http: &reqwest::Client,
    chrome_path: Option<String>,
    port: u16,
    headless: bool,
    renew_days: u32,
    account: &Account,
    index: usize,
) -> RunResult {
    let failed = |status: RunStatus| RunResult {
        username: account.username.clone(),
        status,
        services: 0,
    };

    // The port is reused serially; a binding left over from the previous
    // account (or a crashed run) must die before this launch.
    launcher::reclaim_debug_port(http, port).await;

    let launched =
        match LaunchedChrome::spawn(http, chrome_path, port, headless, index).await {
            Ok(l) => l,
            Err(e) => {
                error!("[{}] browser launch failed: {}", account.username, e);
                return failed(RunStatus::LoginFailed);
            }
        };

    let session = match BrowserSession::connect(launched).await {
        Ok(s) => s,
        Err(e) => {
            // connect() already tore the launched process down.
            error!("[{}] CDP attach failed: {}", account.username, e);
            return failed(RunStatus::LoginFailed);
        }
    };

    let result = drive_account(&session, account, index, renew_days).await;

    session.close().await;
    result
}

/// Login + renewal against an established session. Screenshots on failure are
/// advisory and never affect the outcome.
async fn drive_account(
    session: &BrowserSession,
    account: &Account,
    index: usize,
    renew_days: u32,
) -> RunResult {
    let mut solver = TurnstileSolver::new();

    let logged_in = match login::sign_in(session, &mut solver, account).await {
        Ok(ok) => ok,
        Err(e) => {
            error!("[{}] login phase faulted: {}", account.username, e);
            session
                .save_screenshot(&format!("error_process_{}.png", index))
                .await;
            false
        }
    };

    if !logged_in {
        session
            .save_screenshot(&format!("login_failed_{}.png", index))
            .await;
        return RunResult {
            username: account.username.clone(),
            status: RunStatus::LoginFailed,
            services: 0,
        };
    }

    info!("[{}] --- phase 2: renewal ---", account.username);
    let mut bot = RenewalBot::new(session, &account.username, renew_days);
    match bot.run().await {
        Ok(services) => RunResult {
            username: account.username.clone(),
            status: RunStatus::Success,
            services,
        },
        Err(e) => {
            warn!("[{}] renewal aborted: {}", account.username, e);
            session
                .save_screenshot(&format!("error_process_{}.png", index))
                .await;
            RunResult {
                username: account.username.clone(),
                status: RunStatus::ApiInitFailed,
                services: 0,
            }
        }
    }
}
