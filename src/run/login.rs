//! Browser login against the challenge-protected login page.
//!
//! The page may interpose the challenge widget before the form, after the
//! form, or not at all, so the flow is: wait for either the username textbox
//! or a solvable challenge (bounded), fill credentials through raw key
//! events, run a few final solver bursts, submit, and wait for the dashboard
//! URL. Form controls are located by accessible name — the portal's markup
//! shuffles ids and classes between deploys, its labels don't.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::browser::{BrowserError, BrowserSession};
use crate::challenge::TurnstileSolver;
use crate::core::types::Account;
use crate::pacing::sleep_between;
use crate::portal::{LOGIN_PATH, PORTAL_ORIGIN};

const USERNAME_FIELD: &str = "Email or Username";
const PASSWORD_FIELD: &str = "Password";
const SIGN_IN_BUTTON: &str = "Sign in to your account";

/// Solver passes while waiting for the login form to appear (1s cadence).
const CHALLENGE_WAIT_ROUNDS: u32 = 30;
/// Short solver bursts between filling credentials and submitting.
const PRE_SUBMIT_BURSTS: u32 = 5;
/// Ceiling for the post-submit dashboard redirect.
const DASHBOARD_WAIT: Duration = Duration::from_secs(30);

/// Drive the login flow. `Ok(true)` means the dashboard was reached;
/// `Ok(false)` means the portal rejected or stalled the login (wrong
/// password, form never appeared, no redirect). `Err` is a browser fault.
pub async fn sign_in(
    session: &BrowserSession,
    solver: &mut TurnstileSolver,
    account: &Account,
) -> Result<bool, BrowserError> {
    info!("[{}] --- phase 1: browser login ---", account.username);
    session
        .navigate(&format!("{}{}", PORTAL_ORIGIN, LOGIN_PATH))
        .await?;

    // Initial challenge: keep poking until the login form shows up or the
    // rounds run out. No visible challenge is not an error — the page may
    // simply not be gated this time.
    info!("[{}] checking for challenge...", account.username);
    for _ in 0..CHALLENGE_WAIT_ROUNDS {
        if textbox_visible(session, USERNAME_FIELD).await? {
            info!("[{}] login form detected", account.username);
            break;
        }
        solver.attempt(session).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    if !focus_textbox(session, USERNAME_FIELD).await? {
        warn!("[{}] username field never became available", account.username);
        return Ok(false);
    }
    session.type_text(&account.username).await?;

    if !focus_textbox(session, PASSWORD_FIELD).await? {
        warn!("[{}] password field not found", account.username);
        return Ok(false);
    }
    session.type_text(&account.password).await?;

    // The widget sometimes re-arms on form interaction; give it a few short
    // chances before submitting.
    info!("[{}] checking for a second challenge...", account.username);
    for _ in 0..PRE_SUBMIT_BURSTS {
        if solver.attempt(session).await {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    info!("[{}] clicking sign-in...", account.username);
    if !click_button(session, SIGN_IN_BUTTON).await? {
        warn!("[{}] sign-in button not found", account.username);
        return Ok(false);
    }

    if wait_for_dashboard(session).await? {
        info!("[{}] ✅ browser login succeeded", account.username);
        sleep_between(1_000, 2_000).await;
        return Ok(true);
    }

    if text_visible(session, "Incorrect password").await? {
        error!("[{}] login rejected: incorrect password", account.username);
    } else {
        error!("[{}] dashboard never loaded after sign-in", account.username);
    }
    Ok(false)
}

async fn wait_for_dashboard(session: &BrowserSession) -> Result<bool, BrowserError> {
    let deadline = tokio::time::Instant::now() + DASHBOARD_WAIT;
    while tokio::time::Instant::now() < deadline {
        // Mid-navigation the target can briefly refuse URL queries; that is
        // "not there yet", not a fault.
        if let Ok(url) = session.current_url().await {
            if url.contains("/dashboard") {
                return Ok(true);
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Ok(false)
}

// ── Accessible-name locators ────────────────────────────────────────────────
//
// Accessible name resolution, reduced to what the login page needs:
// aria-label, an associated <label>, or the placeholder for textboxes;
// visible text, value, or aria-label for buttons.

async fn eval_bool(session: &BrowserSession, script: String) -> Result<bool, BrowserError> {
    Ok(session.evaluate(script).await?.as_bool().unwrap_or(false))
}

fn quoted(name: &str) -> String {
    serde_json::to_string(name).unwrap_or_else(|_| "\"\"".into())
}

async fn textbox_visible(session: &BrowserSession, name: &str) -> Result<bool, BrowserError> {
    let script = format!(
        r#"(function (want) {{
            want = want.toLowerCase();
            var fields = document.querySelectorAll('input:not([type="hidden"]), textarea');
            for (var i = 0; i < fields.length; i++) {{
                var el = fields[i];
                var label = el.getAttribute('aria-label') ||
                    (el.labels && el.labels.length ? el.labels[0].textContent : '') ||
                    el.placeholder || '';
                if (label.toLowerCase().indexOf(want) === -1) continue;
                var rect = el.getBoundingClientRect();
                if (rect.width > 0 && rect.height > 0) return true;
            }}
            return false;
        }})({})"#,
        quoted(name)
    );
    eval_bool(session, script).await
}

async fn focus_textbox(session: &BrowserSession, name: &str) -> Result<bool, BrowserError> {
    let script = format!(
        r#"(function (want) {{
            want = want.toLowerCase();
            var fields = document.querySelectorAll('input:not([type="hidden"]), textarea');
            for (var i = 0; i < fields.length; i++) {{
                var el = fields[i];
                var label = el.getAttribute('aria-label') ||
                    (el.labels && el.labels.length ? el.labels[0].textContent : '') ||
                    el.placeholder || '';
                if (label.toLowerCase().indexOf(want) === -1) continue;
                var rect = el.getBoundingClientRect();
                if (rect.width === 0 || rect.height === 0) continue;
                el.focus();
                el.value = '';
                return true;
            }}
            return false;
        }})({})"#,
        quoted(name)
    );
    eval_bool(session, script).await
}

async fn click_button(session: &BrowserSession, name: &str) -> Result<bool, BrowserError> {
    let script = format!(
        r#"(function (want) {{
            want = want.toLowerCase();
            var buttons = document.querySelectorAll('button, input[type="submit"]');
            for (var i = 0; i < buttons.length; i++) {{
                var el = buttons[i];
                var label = (el.textContent || '') || el.value || el.getAttribute('aria-label') || '';
                if (label.toLowerCase().indexOf(want) === -1) continue;
                el.click();
                return true;
            }}
            return false;
        }})({})"#,
        quoted(name)
    );
    eval_bool(session, script).await
}

async fn text_visible(session: &BrowserSession, needle: &str) -> Result<bool, BrowserError> {
    let script = format!(
        r#"(function (want) {{
            return document.body ? document.body.innerText.indexOf(want) !== -1 : false;
        }})({})"#,
        quoted(needle)
    );
    eval_bool(session, script).await
}
