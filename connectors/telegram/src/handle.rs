//! Channel handle parsing.
//!
//! Accepted forms: `@name`, `name`, `t.me/name`, `https://t.me/name` (with or
//! without a trailing path such as a post id), and numeric chat ids like
//! `-1001234567890`. Private invite links cannot be resolved by a bot and are
//! rejected.

use crate::error::{TelegramError, TelegramResult};
use crate::types::ChatId;

const LINK_HOSTS: [&str; 3] = ["t.me/", "telegram.me/", "telegram.dog/"];

fn invalid(handle: &str, reason: &str) -> TelegramError {
    TelegramError::InvalidHandle {
        handle: handle.to_string(),
        reason: reason.to_string(),
    }
}

/// Normalize a configured handle into a `getChat` target.
///
/// # Errors
/// Returns [`TelegramError::InvalidHandle`] for empty handles, invite links
/// and names with characters Telegram does not allow.
pub fn parse_handle(handle: &str) -> TelegramResult<ChatId> {
    let raw = handle.trim();
    if raw.is_empty() {
        return Err(invalid(handle, "empty handle"));
    }

    if let Ok(id) = raw.parse::<i64>() {
        return Ok(ChatId::Id(id));
    }

    let without_scheme = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
        .unwrap_or(raw);
    let without_www = without_scheme
        .strip_prefix("www.")
        .unwrap_or(without_scheme);

    let name = match LINK_HOSTS
        .iter()
        .find_map(|host| without_www.strip_prefix(host))
    {
        Some(path) => {
            let first = path.split(['/', '?', '#']).next().unwrap_or_default();
            if first.starts_with('+') || first == "joinchat" {
                return Err(invalid(handle, "private invite links cannot be resolved"));
            }
            if first == "s" {
                // t.me/s/name is the public web preview of a channel.
                path.split('/').nth(1).unwrap_or_default()
            } else {
                first
            }
        }
        None if without_www != raw => {
            return Err(invalid(handle, "not a Telegram link"));
        }
        None => raw.strip_prefix('@').unwrap_or(raw),
    };

    if name.is_empty() {
        return Err(invalid(handle, "missing channel name"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid(handle, "usernames contain only letters, digits and '_'"));
    }
    Ok(ChatId::Username(format!("@{name}")))
}
