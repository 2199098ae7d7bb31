//! Session title derivation
//!
//! Titles are best-effort: any failure falls back to a truncation of the
//! first message and is never reported to the caller.

use crate::engine::InvocationConfig;
use crate::providers::{ClientFactory, Message};
use crate::storage::DEFAULT_TITLE;

/// Longest title the summarizer will store, in characters
pub const MAX_TITLE_CHARS: usize = 50;

/// Characters of the first message kept by the fallback title
pub const FALLBACK_TITLE_CHARS: usize = 40;

const TITLE_INSTRUCTION: &str = "Write a short title of at most 5 words for a conversation \
that begins with the user's message. Reply with the title only, without quotes or trailing \
punctuation.";

/// Derive a session title from the first user message
///
/// Makes one `complete` call with a fixed instruction. Never fails: a
/// provider error, a missing key or an empty answer yields
/// [`fallback_title`].
pub async fn summarize_title(
    gateway: &dyn ClientFactory,
    config: &InvocationConfig,
    first_message: &str,
) -> String {
    let client = match gateway.create_client(&config.provider, &config.model, &config.api_key) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("Title generation unavailable, using fallback: {}", e);
            return fallback_title(first_message);
        }
    };

    match client
        .complete(TITLE_INSTRUCTION, &[], &Message::user(first_message))
        .await
    {
        Ok(reply) => clean_title(&reply.content).unwrap_or_else(|| {
            tracing::warn!("Title generation returned no usable text, using fallback");
            fallback_title(first_message)
        }),
        Err(e) => {
            tracing::warn!("Title generation failed, using fallback: {}", e);
            fallback_title(first_message)
        }
    }
}

/// Normalize a model-produced title
///
/// Keeps the first non-blank line, strips surrounding quotes and trailing
/// punctuation, and caps the result at [`MAX_TITLE_CHARS`].
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = strip_label(line);
    let title = line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '\u{201c}' | '\u{201d}' | '*'))
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ',' | ';' | ':'))
        .trim();

    if title.is_empty() {
        return None;
    }
    Some(truncate_with_ellipsis(title, MAX_TITLE_CHARS - 3, MAX_TITLE_CHARS))
}

/// Deterministic title used when summarization is unavailable
///
/// The first [`FALLBACK_TITLE_CHARS`] characters of the trimmed message,
/// with "..." appended when the message was longer.
pub fn fallback_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    truncate_with_ellipsis(trimmed, FALLBACK_TITLE_CHARS, FALLBACK_TITLE_CHARS)
}

fn strip_label(line: &str) -> &str {
    match line.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("title:") => line[6..].trim_start(),
        _ => line,
    }
}

/// Keep `text` if it has at most `limit` chars, else its first `keep` chars plus "..."
fn truncate_with_ellipsis(text: &str, keep: usize, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}
