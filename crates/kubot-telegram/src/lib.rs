//! Telegram front end for kubot.
//!
//! Wraps the Bot API calls kubot needs, delivers job notifications, routes
//! chat commands to the job runner and the execution backend, and runs the
//! long-polling loop that ties them together.

pub mod bot_access;
pub mod bot_commands;
pub mod job_render;
pub mod telegram_api_client;
pub mod telegram_notifier;
pub mod telegram_runtime;

pub use bot_access::{AuthorizedUsers, AuthorizedUsersError};
pub use bot_commands::{
    BotCommand, BotCommandRouter, BotCommandRouterConfig, BotReply, InboundMessage,
};
pub use job_render::{render_exec_started, render_job_detail, render_jobs_listing};
pub use telegram_api_client::{
    TelegramApiClient, TelegramApiConfig, TelegramMessage, TelegramUpdate, TelegramUser,
};
pub use telegram_notifier::{bound_telegram_message, TelegramNotifier, TELEGRAM_MESSAGE_MAX_CHARS};
pub use telegram_runtime::{TelegramPollingConfig, TelegramPollingRuntime};
