//! Output shaping for chat transports with bounded message sizes.
//!
//! Lengths are counted in `char`s, not bytes, so multi-byte output is never
//! split inside a code point.

/// Keeps the first `max_chars` characters and appends `marker` when `text` is longer.
pub fn truncate_head(text: &str, max_chars: usize, marker: &str) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}{marker}", &text[..cut]),
    }
}

/// Joins a command vector with single spaces.
pub fn render_command(command: &[String]) -> String {
    command.join(" ")
}

/// Joins at most `max_words` command words, adding `...` when more were dropped.
pub fn render_command_preview(command: &[String], max_words: usize) -> String {
    let shown = command
        .iter()
        .take(max_words)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");
    if command.len() > max_words {
        format!("{shown}...")
    } else {
        shown
    }
}
