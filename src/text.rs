//! Plain-text extraction from message bodies.

use std::sync::LazyLock;

use regex::Regex;

use crate::mail::IncomingMessage;

/// Hard input limit of the key phrase service, in characters.
pub const MAX_ANALYSIS_CHARS: usize = 1000;

static BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<body[^>]*>(.*?)(?:</body>|$)").expect("valid regex"));
static HIDDEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<!--.*?-->")
        .expect("valid regex")
});
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&.{1,10};").expect("valid regex"));

/// Convert an HTML body into plain text.
///
/// Only the `<body>` content is kept when there is one. Entities are not
/// decoded, they become spaces.
pub fn html_to_text(html: &str) -> String {
    let body = BODY_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map_or(html, |m| m.as_str());
    let visible = HIDDEN_RE.replace_all(body, " ");

    let mut result = String::with_capacity(visible.len());
    let mut in_tag = false;
    for ch in visible.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    let without_entities = ENTITY_RE.replace_all(&result, " ");
    without_entities.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Text to submit for key phrase extraction.
///
/// The plain-text body wins; the HTML body is only converted when there is
/// no plain-text body. Returns `None` when there is nothing but whitespace.
pub fn extract_plain_text(message: &IncomingMessage) -> Option<String> {
    let text = match (&message.text_body, &message.html_body) {
        (Some(text), _) => text.clone(),
        (None, Some(html)) => html_to_text(html),
        (None, None) => return None,
    };
    if text.trim().is_empty() {
        return None;
    }
    Some(truncate_chars(&text, MAX_ANALYSIS_CHARS).to_string())
}
