//! End-of-run Telegram notification.
//!
//! Best-effort by design: missing credentials or a failed send are logged and
//! swallowed — the console report and the exit code are the source of truth.

use tracing::{info, warn};

use crate::core::config::RenewConfig;
use crate::core::types::RunSummary;

pub async fn send_telegram_summary(
    http: &reqwest::Client,
    cfg: &RenewConfig,
    summary: &RunSummary,
) {
    let Some((token, chat_id)) = cfg.resolve_telegram() else {
        info!("TG_BOT_TOKEN / TG_CHAT_ID not set — skipping Telegram notification");
        return;
    };

    info!("📨 sending Telegram notification...");
    let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
    let payload = serde_json::json!({
        "chat_id": chat_id,
        "text": summary.to_markdown(),
        "parse_mode": "Markdown",
    });

    match http.post(&url).json(&payload).send().await {
        Ok(resp) if resp.status().is_success() => {
            info!("✅ Telegram notification sent");
        }
        Ok(resp) => {
            warn!("Telegram API answered {}", resp.status());
        }
        Err(e) => {
            warn!("Telegram notification failed: {}", e);
        }
    }
}
