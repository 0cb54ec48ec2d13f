use anyhow::Result;
use async_trait::async_trait;
use kubot_core::truncate_head;
use kubot_jobs::JobNotifier;

use crate::telegram_api_client::TelegramApiClient;

/// Telegram rejects message text above this many characters.
pub const TELEGRAM_MESSAGE_MAX_CHARS: usize = 4_096;
const MESSAGE_TRUNCATION_MARKER: &str = "\n... (message truncated)";

/// Delivers job notifications with `sendMessage`.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: TelegramApiClient,
}

impl TelegramNotifier {
    pub fn new(client: TelegramApiClient) -> Self {
        Self { client }
    }
}

/// Clamps `text` so it fits in a single Telegram message, marker included.
pub fn bound_telegram_message(text: &str) -> String {
    let keep = TELEGRAM_MESSAGE_MAX_CHARS - MESSAGE_TRUNCATION_MARKER.chars().count();
    if text.chars().count() <= TELEGRAM_MESSAGE_MAX_CHARS {
        return text.to_string();
    }
    truncate_head(text, keep, MESSAGE_TRUNCATION_MARKER)
}

#[async_trait]
impl JobNotifier for TelegramNotifier {
    async fn send(&self, chat_id: i64, message: &str) -> Result<()> {
        self.client
            .send_message(chat_id, &bound_telegram_message(message))
            .await?;
        Ok(())
    }
}
