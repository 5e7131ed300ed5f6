use chrono::TimeDelta;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use volatility_notifier::config::AppConfig;
use volatility_notifier::notifier::TelegramNotifier;
use volatility_notifier::notify::NotificationManager;
use volatility_notifier::run_connection;
use volatility_notifier::tracker::VolatilityNotifier;

#[tokio::main]
async fn main() {
    // Defaults to "info" level if RUST_LOG is not set.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration ONCE at startup; without it the application cannot
    // function.
    let cfg = match AppConfig::load("config.yaml") {
        Ok(c) => c,
        Err(e) => {
            error!("❌ Critical Error: Failed to load configuration: {}", e);
            return;
        }
    };

    let telegram = match TelegramNotifier::new(&cfg.telegram) {
        Ok(t) => t,
        Err(e) => {
            error!("❌ Critical Error: {}", e);
            return;
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(telegram.run(rx));

    // Defined outside the loop so aggregator history survives reconnections.
    let mut notifier = VolatilityNotifier::new(cfg.notifier.clone());
    let mut manager =
        NotificationManager::new(TimeDelta::seconds(cfg.notifier.flush_secs as i64), tx);

    loop {
        info!("🚀 Starting volatility notifier...");

        if let Err(e) = run_connection(&mut notifier, &mut manager, &cfg).await {
            error!("⚠️ Connection lost: {:?}. Retrying in 5s...", e);
        }

        sleep(Duration::from_secs(5)).await;
    }
}
