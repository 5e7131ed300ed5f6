//! Telegram delivery backend.
//!
//! Consumes rendered batch messages from the notification channel and posts
//! them to the Telegram Bot API.

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::{ConfigError, TelegramConfig};

/// Telegram caps messages at 4096 characters.
const MAX_MESSAGE_LEN: usize = 4096;

pub struct TelegramNotifier {
    client: reqwest::Client,
    api_url: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self, ConfigError> {
        if config.bot_token.is_empty() || config.chat_id.is_empty() {
            return Err(ConfigError::Invalid(
                "telegram bot_token and chat_id must be set".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_url: format!("https://api.telegram.org/bot{}/sendMessage", config.bot_token),
            chat_id: config.chat_id.clone(),
        })
    }

    pub async fn send_message(&self, text: &str) {
        let text = truncate_message(text);
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        match self.client.post(&self.api_url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                info!("🚀 Telegram alert delivered successfully.");
            }
            Ok(response) => {
                error!("❌ Telegram API returned {}", response.status());
            }
            Err(e) => {
                error!("❌ Failed to send Telegram alert: {:?}", e);
            }
        }
    }

    /// Drains the notification channel until all senders are dropped.
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<String>) {
        while let Some(message) = inbound.recv().await {
            self.send_message(&message).await;
        }
        info!("Notification channel closed, Telegram task exiting.");
    }
}

fn truncate_message(text: &str) -> String {
    if text.len() <= MAX_MESSAGE_LEN {
        return text.to_string();
    }
    let mut cut = MAX_MESSAGE_LEN - 3;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: &str, chat: &str) -> TelegramConfig {
        TelegramConfig {
            bot_token: token.to_string(),
            chat_id: chat.to_string(),
        }
    }

    #[test]
    fn rejects_empty_credentials() {
        assert!(TelegramNotifier::new(&config("", "123")).is_err());
        assert!(TelegramNotifier::new(&config("token", "")).is_err());
        assert!(TelegramNotifier::new(&config("token", "123")).is_ok());
    }

    #[test]
    fn api_url_embeds_the_token() {
        let notifier = TelegramNotifier::new(&config("abc:def", "123")).unwrap();
        assert_eq!(
            notifier.api_url,
            "https://api.telegram.org/botabc:def/sendMessage"
        );
    }

    #[test]
    fn short_messages_pass_through() {
        assert_eq!(truncate_message("hello"), "hello");
        let exact = "x".repeat(MAX_MESSAGE_LEN);
        assert_eq!(truncate_message(&exact), exact);
    }

    #[test]
    fn long_messages_truncate_with_ellipsis() {
        let long = "x".repeat(MAX_MESSAGE_LEN + 100);
        let truncated = truncate_message(&long);
        assert_eq!(truncated.len(), MAX_MESSAGE_LEN);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_MESSAGE_LEN);
        let truncated = truncate_message(&long);
        assert!(truncated.len() <= MAX_MESSAGE_LEN);
        assert!(truncated.ends_with("..."));
    }
}
