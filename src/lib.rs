pub mod agg;
pub mod config;
pub mod models;
pub mod notifier;
pub mod notify;
pub mod timeframe;
pub mod tracker;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::models::StreamEnvelope;
use crate::notify::NotificationManager;
use crate::tracker::VolatilityNotifier;

/// Builds the combined-stream URL subscribing one `bookTicker` stream per
/// configured symbol.
pub fn stream_url(cfg: &AppConfig) -> String {
    let streams: Vec<String> = cfg
        .notifier
        .symbols
        .keys()
        .map(|symbol| format!("{}@bookTicker", symbol.to_lowercase()))
        .collect();
    format!("{}?streams={}", cfg.feed.endpoint, streams.join("/"))
}

/// Main logic loop: establishes the WebSocket connection, feeds ticks to the
/// trackers, and drives batch flushes. Returns on connection loss so the
/// caller can reconnect; tracker state lives outside and survives.
pub async fn run_connection(
    notifier: &mut VolatilityNotifier,
    manager: &mut NotificationManager,
    cfg: &AppConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = stream_url(cfg);
    let (ws_stream, _) = connect_async(&url).await?;
    let (mut write, mut read) = ws_stream.split();

    info!(
        "✅ Connected to {} ({} symbol stream(s))",
        cfg.feed.endpoint,
        cfg.notifier.symbols.len()
    );

    while let Some(message) = read.next().await {
        let msg = message?;
        match msg {
            Message::Text(text_bytes) => {
                let text = text_bytes.as_str();

                if let Ok(envelope) = serde_json::from_str::<StreamEnvelope>(text) {
                    match envelope.data.to_tick() {
                        Ok(tick) => {
                            let symbol = envelope.data.symbol.to_uppercase();
                            for alert in notifier.on_tick(&symbol, &tick) {
                                manager.enqueue(alert);
                            }
                        }
                        Err(e) => {
                            warn!("Skipping malformed tick from {}: {}", envelope.stream, e);
                        }
                    }
                }

                // Flushes are driven by stream traffic, not a timer.
                manager.flush_due(Utc::now());
            }
            Message::Ping(payload) => {
                write.send(Message::Pong(payload)).await?;
            }
            Message::Close(_) => {
                warn!("Received Close Frame from server.");
                break;
            }
            _ => (),
        }
    }
    Ok(())
}
