use std::path::PathBuf;

use crate::core::types::Account;

// ---------------------------------------------------------------------------
// RenewConfig — file-based config loader (hiden-renew.json) with env-var fallback
// ---------------------------------------------------------------------------

/// Top-level config loaded from `hiden-renew.json`. Every field is optional;
/// the `resolve_*` accessors layer env vars and defaults on top.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct RenewConfig {
    /// Chrome/Chromium executable. Default: auto-discovery.
    pub chrome_path: Option<String>,
    /// Run the browser headless. Default: `true`.
    pub headless: Option<bool>,
    /// Remote debugging port. One port, reused serially across accounts.
    pub debug_port: Option<u16>,
    /// Renewal period submitted with each renew form, in days.
    pub renew_days: Option<u32>,
    /// Telegram bot token. Never logged.
    pub tg_bot_token: Option<String>,
    /// Telegram chat id for the end-of-run summary.
    pub tg_chat_id: Option<String>,
}

impl RenewConfig {
    /// Chrome path: JSON field → `CHROME_EXECUTABLE` / `CHROME_PATH` env → `None`
    /// (auto-discovery in the launcher).
    pub fn resolve_chrome_path(&self) -> Option<String> {
        if let Some(p) = &self.chrome_path {
            if !p.trim().is_empty() {
                return Some(p.clone());
            }
        }
        for key in ["CHROME_EXECUTABLE", "CHROME_PATH"] {
            if let Ok(v) = std::env::var(key) {
                if !v.trim().is_empty() {
                    return Some(v);
                }
            }
        }
        None
    }

    /// Headless mode: JSON field → `HIDEN_HEADLESS` env ("0"/"false" disables) → `true`.
    pub fn resolve_headless(&self) -> bool {
        if let Some(b) = self.headless {
            return b;
        }
        match std::env::var("HIDEN_HEADLESS") {
            Ok(v) => !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            ),
            Err(_) => true,
        }
    }

    /// Debug port: JSON field → `HIDEN_DEBUG_PORT` env → 9222.
    pub fn resolve_debug_port(&self) -> u16 {
        if let Some(p) = self.debug_port {
            return p;
        }
        std::env::var("HIDEN_DEBUG_PORT")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(9222)
    }

    /// Renewal period: JSON field → `RENEW_DAYS` env → 30.
    pub fn resolve_renew_days(&self) -> u32 {
        if let Some(d) = self.renew_days {
            return d;
        }
        std::env::var("RENEW_DAYS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(30)
    }

    /// Telegram credentials: JSON fields → `TG_BOT_TOKEN` / `TG_CHAT_ID` env.
    /// `None` when either half is missing — the notifier logs a skip.
    pub fn resolve_telegram(&self) -> Option<(String, String)> {
        let token = self
            .tg_bot_token
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| std::env::var("TG_BOT_TOKEN").ok().filter(|v| !v.trim().is_empty()))?;
        let chat_id = self
            .tg_chat_id
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| std::env::var("TG_CHAT_ID").ok().filter(|v| !v.trim().is_empty()))?;
        Some((token, chat_id))
    }
}

/// Load `hiden-renew.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `HIDEN_RENEW_CONFIG` env var path
/// 2. `./hiden-renew.json` (process cwd)
/// 3. `~/.hiden-renew/hiden-renew.json`
///
/// Missing file → defaults (env-var fallbacks apply). Parse error → warn and
/// fall back to defaults rather than aborting the batch.
pub fn load_config() -> RenewConfig {
    let mut candidates: Vec<PathBuf> = vec![PathBuf::from("hiden-renew.json")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".hiden-renew").join("hiden-renew.json"));
    }
    if let Ok(env_path) = std::env::var("HIDEN_RENEW_CONFIG") {
        candidates.insert(0, PathBuf::from(env_path));
    }

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RenewConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("hiden-renew.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "hiden-renew.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return RenewConfig::default();
                }
            },
            Err(_) => continue,
        }
    }

    RenewConfig::default()
}

// ---------------------------------------------------------------------------
// Account source
// ---------------------------------------------------------------------------

/// Accepts either a bare JSON array of accounts or `{ "users": [...] }`.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum AccountsDocument {
    List(Vec<Account>),
    Wrapped { users: Vec<Account> },
}

fn parse_accounts(raw: &str) -> Option<Vec<Account>> {
    match serde_json::from_str::<AccountsDocument>(raw) {
        Ok(AccountsDocument::List(users)) => Some(users),
        Ok(AccountsDocument::Wrapped { users }) => Some(users),
        Err(e) => {
            tracing::error!("account JSON parse error: {}", e);
            None
        }
    }
}

/// Load the account list: `USERS_JSON` env var first, then a local
/// `users.json` file. An empty result is the caller's fatal precondition.
pub fn load_accounts() -> Vec<Account> {
    if let Ok(raw) = std::env::var("USERS_JSON") {
        return parse_accounts(&raw).unwrap_or_default();
    }

    let local = PathBuf::from("users.json");
    if local.exists() {
        tracing::info!("loading accounts from local users.json");
        match std::fs::read_to_string(&local) {
            Ok(raw) => return parse_accounts(&raw).unwrap_or_default(),
            Err(e) => tracing::error!("failed to read users.json: {}", e),
        }
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounts_from_bare_array() {
        let users =
            parse_accounts(r#"[{"username":"a","password":"p1"},{"username":"b","password":"p2"}]"#)
                .unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].username, "a");
    }

    #[test]
    fn accounts_from_wrapped_object() {
        let users = parse_accounts(r#"{"users":[{"username":"a","password":"p"}]}"#).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].password, "p");
    }

    #[test]
    fn malformed_accounts_yield_none() {
        assert!(parse_accounts("{not json").is_none());
        assert!(parse_accounts(r#"{"users": 3}"#).is_none());
    }

    #[test]
    fn defaults_without_file_or_env() {
        let cfg = RenewConfig::default();
        assert_eq!(cfg.resolve_renew_days(), 30);
        assert_eq!(cfg.resolve_debug_port(), 9222);
        assert!(cfg.resolve_headless());
    }

    #[test]
    fn json_fields_win_over_defaults() {
        let cfg: RenewConfig =
            serde_json::from_str(r#"{"renew_days": 7, "debug_port": 9333, "headless": false}"#)
                .unwrap();
        assert_eq!(cfg.resolve_renew_days(), 7);
        assert_eq!(cfg.resolve_debug_port(), 9333);
        assert!(!cfg.resolve_headless());
    }

    #[test]
    fn telegram_requires_both_halves() {
        let cfg: RenewConfig = serde_json::from_str(r#"{"tg_bot_token": "t"}"#).unwrap();
        // chat id missing (and env unset in the test environment for this pair)
        if std::env::var("TG_CHAT_ID").is_err() {
            assert!(cfg.resolve_telegram().is_none());
        }
        let cfg: RenewConfig =
            serde_json::from_str(r#"{"tg_bot_token": "t", "tg_chat_id": "c"}"#).unwrap();
        assert_eq!(cfg.resolve_telegram(), Some(("t".into(), "c".into())));
    }
}
