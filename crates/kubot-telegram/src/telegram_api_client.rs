//! Telegram Bot API client used by long polling and job notifications.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const ERROR_BODY_MAX_CHARS: usize = 800;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramApiConfig {
    pub api_base: String,
    pub bot_token: String,
    /// Per-request timeout for calls other than long polls, which add their own wait.
    pub request_timeout_ms: u64,
}

impl TelegramApiConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            bot_token: bot_token.into(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

/// One entry of a `getUpdates` result. Update kinds other than messages are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Clone)]
pub struct TelegramApiClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    request_timeout: Duration,
}

impl TelegramApiClient {
    pub fn new(config: TelegramApiConfig) -> Result<Self> {
        let bot_token = config.bot_token.trim().to_string();
        if bot_token.is_empty() {
            bail!("telegram bot token cannot be empty");
        }
        let api_base = config.api_base.trim().trim_end_matches('/').to_string();
        if api_base.is_empty() {
            bail!("telegram api base cannot be empty");
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("kubot"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to create telegram api client")?;

        Ok(Self {
            http,
            api_base,
            bot_token,
            request_timeout: Duration::from_millis(config.request_timeout_ms.max(1)),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    /// Returns the bot's own account, used to recognise `/cmd@botname` addressing.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let request = self
            .http
            .get(self.method_url("getMe"))
            .timeout(self.request_timeout);
        self.request_json("getMe", request).await
    }

    /// Long-polls for updates with ids at or above `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<TelegramUpdate>> {
        let request = self
            .http
            .get(self.method_url("getUpdates"))
            .timeout(self.request_timeout + Duration::from_secs(timeout_secs))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout_secs.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ]);
        self.request_json("getUpdates", request).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<TelegramMessage> {
        let request = self
            .http
            .post(self.method_url("sendMessage"))
            .timeout(self.request_timeout)
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "disable_web_page_preview": true,
            }));
        self.request_json("sendMessage", request).await
    }

    async fn request_json<T>(&self, operation: &str, request: reqwest::RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = request
            .send()
            .await
            .with_context(|| format!("telegram api {operation} request failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "telegram api {operation} failed with status {}: {}",
                status.as_u16(),
                truncate_for_error(&body, ERROR_BODY_MAX_CHARS)
            );
        }

        let parsed = response
            .json::<TelegramResponse<T>>()
            .await
            .with_context(|| format!("failed to decode telegram {operation}"))?;
        if !parsed.ok {
            bail!(
                "telegram api {operation} rejected: {}",
                parsed
                    .description
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        parsed
            .result
            .ok_or_else(|| anyhow!("telegram api {operation} response missing result"))
    }
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
