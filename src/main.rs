use std::env;

use tracing::{error, info};

use hiden_renew::{load_accounts, load_config, notify, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cfg = load_config();

    let accounts = load_accounts();
    if accounts.is_empty() {
        error!("no accounts found in USERS_JSON or users.json");
        std::process::exit(1);
    }

    info!("🚀 starting renewal batch for {} account(s)", accounts.len());

    // Shared utility client: debug-port probe + Telegram
    let http_timeout = env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(30);
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(http_timeout))
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()?;

    let summary = run::run_batch(&http, &cfg, &accounts).await;

    println!("\n╔════════════════════════════════════════════╗");
    println!("║               Final Summary                ║");
    println!("╚════════════════════════════════════════════╝");
    for line in summary.console_lines() {
        println!("{}", line);
    }

    notify::send_telegram_summary(&http, &cfg, &summary).await;

    std::process::exit(summary.exit_code());
}
