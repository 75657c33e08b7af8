//! Access policy — which senders and conversations may reach the handler.
//!
//! Two-tiered:
//! - Groups: `group_policy` → `group_allow_from` (chat ID or sender ID)
//! - Direct chats: `dm_policy` → `allow_from` (sender ID)

use imgate_core::config::{ChannelConfig, DmPolicy, GroupPolicy};
use imgate_core::ChatType;

/// Check an inbound message against the channel's access policy.
///
/// Returns `Some(reason)` when the message must be dropped, `None` to accept.
pub fn check_policy(
    config: &ChannelConfig,
    chat_type: ChatType,
    chat_id: &str,
    sender_id: &str,
) -> Option<String> {
    match chat_type {
        ChatType::Group => match config.group_policy {
            GroupPolicy::Disabled => Some("group messages are disabled".to_string()),
            GroupPolicy::Allowlist => {
                if contains_id(&config.group_allow_from, chat_id)
                    || contains_id(&config.group_allow_from, sender_id)
                {
                    None
                } else {
                    Some(format!(
                        "group {chat_id} / sender {sender_id} not in groupAllowFrom"
                    ))
                }
            }
            GroupPolicy::Unrestricted => None,
        },
        ChatType::Direct => match config.dm_policy {
            DmPolicy::Allowlist => {
                if contains_id(&config.allow_from, sender_id) {
                    None
                } else {
                    Some(format!("sender {sender_id} not in allowFrom"))
                }
            }
            DmPolicy::Unrestricted => None,
        },
    }
}

fn contains_id(list: &[String], id: &str) -> bool {
    !id.is_empty() && list.iter().any(|entry| entry == id)
}

/// Trim, drop blanks, and de-duplicate an ID list, keeping first-seen order.
pub fn normalize_id_list(ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim();
        if !id.is_empty() && !out.iter().any(|seen| seen == id) {
            out.push(id.to_string());
        }
    }
    out
}

/// Whether `text` contains a literal `@handle` mention of the bot.
///
/// Telegram handles are case-insensitive; the match requires a non-handle
/// character (or end of text) after the handle so `@bot` does not match
/// `@bot_helper`.
pub fn mentions_handle(text: &str, handle: &str) -> bool {
    find_mention(text, handle).is_some()
}

/// Remove every literal `@handle` mention and trim the result.
pub fn strip_mention(text: &str, handle: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some((start, end)) = find_mention(rest, handle) {
        out.push_str(&rest[..start]);
        rest = &rest[end..];
        if out.is_empty() || out.ends_with(char::is_whitespace) {
            rest = rest.trim_start_matches(' ');
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Byte range of the first `@handle` mention in `text`.
fn find_mention(text: &str, handle: &str) -> Option<(usize, usize)> {
    let handle = handle.trim_start_matches('@');
    if handle.is_empty() {
        return None;
    }
    let needle = format!("@{}", handle.to_ascii_lowercase());
    let haystack = text.to_ascii_lowercase();

    let mut from = 0;
    while let Some(pos) = haystack[from..].find(&needle) {
        let start = from + pos;
        let end = start + needle.len();
        let boundary = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '_'));
        if boundary {
            return Some((start, end));
        }
        from = end;
    }
    None
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
