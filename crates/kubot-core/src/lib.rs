//! Foundational low-level utilities shared across kubot crates.
//!
//! Provides wall-clock helpers and the text shaping used when command output
//! has to fit a chat transport's payload limit.

pub mod text_utils;
pub mod time_utils;

pub use text_utils::{render_command, render_command_preview, truncate_head};
pub use time_utils::{elapsed_seconds_between, format_duration_seconds, utc_now};
