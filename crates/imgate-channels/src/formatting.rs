//! Outbound text shaping — length-bounded splitting and Markdown → HTML.
//!
//! Platforms cap message length, so long replies are cut into ordered
//! chunks at natural boundaries. Platforms with rich formatting (Telegram's
//! HTML parse mode) get converted text; the plain chunk is the fallback.
//!
//! Supported HTML conversions:
//! - Code blocks (```) → `<pre><code>...</code></pre>`
//! - Inline code (`) → `<code>...</code>`
//! - Bold (** / __) → `<b>...</b>`
//! - Italic (_) → `<i>...</i>`
//! - Strikethrough (~~) → `<s>...</s>`
//! - Links [text](url) → `<a href="url">text</a>`
//! - Headers and blockquotes → stripped to plain text
//! - Bullets (- / *) → `•`

use std::sync::LazyLock;

use regex::{Captures, Regex};

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($pattern).expect("static regex is valid"));
    };
}

static_regex!(RE_CODE_BLOCK, r"(?s)```(?:\w+)?\n?(.*?)```");
static_regex!(RE_INLINE_CODE, r"`([^`]+)`");
static_regex!(RE_HEADER, r"(?m)^#{1,6}\s+(.+)$");
static_regex!(RE_BLOCKQUOTE, r"(?m)^>\s?(.*)$");
static_regex!(RE_LINK, r"\[([^\]]+)\]\(([^)]+)\)");
static_regex!(RE_BOLD_STAR, r"\*\*(.+?)\*\*");
static_regex!(RE_BOLD_UNDER, r"__(.+?)__");
// No lookbehind in `regex`: capture the surrounding context instead so
// snake_case identifiers are left alone.
static_regex!(RE_ITALIC, r"(^|[^a-zA-Z0-9_])_([^_]+?)_($|[^a-zA-Z0-9_])");
static_regex!(RE_STRIKE, r"~~(.+?)~~");
static_regex!(RE_BULLET, r"(?m)^[\s]*[-*]\s+");

// ─────────────────────────────────────────────
// Splitting
// ─────────────────────────────────────────────

/// Split `text` into ordered chunks of at most `max_len` characters.
///
/// Within each budget the cut goes, in order of preference:
/// 1. at the last newline, if it lies past half the budget;
/// 2. at the last space, if it lies past half the budget;
/// 3. at the budget boundary.
///
/// Leading whitespace is trimmed off the remainder before continuing, so
/// the separator a chunk was cut at does not start the next chunk.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        // Byte offset of the first char past the budget; None = fits.
        let Some((budget_end, _)) = remaining.char_indices().nth(max_len) else {
            chunks.push(remaining.to_string());
            break;
        };

        let window = &remaining[..budget_end];
        let half = remaining
            .char_indices()
            .nth(max_len / 2)
            .map_or(0, |(idx, _)| idx);

        let cut = match window.rfind('\n') {
            Some(idx) if idx > half => idx,
            _ => match window.rfind(' ') {
                Some(idx) if idx > half => idx,
                _ => budget_end,
            },
        };

        chunks.push(remaining[..cut].to_string());
        remaining = remaining[cut..].trim_start();
    }

    chunks
}

// ─────────────────────────────────────────────
// Markdown → Telegram HTML
// ─────────────────────────────────────────────

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Replace every match with a NUL-delimited placeholder, stashing the
/// captured body so later passes cannot touch it.
fn protect(text: &str, re: &Regex, tag: &str, store: &mut Vec<String>) -> String {
    re.replace_all(text, |caps: &Captures| {
        let idx = store.len();
        store.push(caps[1].to_string());
        format!("\x00{tag}{idx}\x00")
    })
    .into_owned()
}

fn restore(mut text: String, tag: &str, store: &[String], open: &str, close: &str) -> String {
    for (idx, body) in store.iter().enumerate() {
        text = text.replace(
            &format!("\x00{tag}{idx}\x00"),
            &format!("{open}{}{close}", escape_html(body)),
        );
    }
    text
}

/// Convert Markdown text to Telegram-compatible HTML.
///
/// If the platform rejects the result, the caller falls back to plain text.
pub fn markdown_to_telegram_html(text: &str) -> String {
    let mut code_blocks = Vec::new();
    let mut inline_codes = Vec::new();

    let text = protect(text, &RE_CODE_BLOCK, "CB", &mut code_blocks);
    let text = protect(&text, &RE_INLINE_CODE, "IC", &mut inline_codes);

    let text = RE_HEADER.replace_all(&text, "$1");
    let text = RE_BLOCKQUOTE.replace_all(&text, "$1");
    let text = escape_html(&text);

    let text = RE_LINK.replace_all(&text, r#"<a href="$2">$1</a>"#);
    let text = RE_BOLD_STAR.replace_all(&text, "<b>$1</b>");
    let text = RE_BOLD_UNDER.replace_all(&text, "<b>$1</b>");
    let text = RE_ITALIC.replace_all(&text, "$1<i>$2</i>$3");
    let text = RE_STRIKE.replace_all(&text, "<s>$1</s>");
    let text = RE_BULLET.replace_all(&text, "• ");

    let text = restore(text.into_owned(), "IC", &inline_codes, "<code>", "</code>");
    restore(text, "CB", &code_blocks, "<pre><code>", "</code></pre>")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
