//! Lenient JSON recovery for model output.
//!
//! Stages run in order and stop at the first successful parse:
//! direct parse, Markdown fence stripping, bracket extraction, quote normalization.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

static FENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"```[A-Za-z0-9_-]*[ \t]*\r?\n?([\s\S]*?)\s*```").ok());
static SINGLE_QUOTED: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"(?P<pre>[\{\[,:]\s*)'(?P<body>[^'\\]*(?:\\.[^'\\]*)*)'"#).ok()
});
static TRAILING_COMMA: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r",\s*(?P<close>[\}\]])").ok());

/// The stage that produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStage {
    Direct,
    FenceStripped,
    BracketExtracted,
    QuotesNormalized,
}

/// Parse `text` as JSON, repairing common model formatting mistakes.
pub fn parse_lenient(text: &str) -> Option<Value> {
    repair_json(text).map(|(v, _)| v)
}

/// Like [`parse_lenient`], also reporting which stage succeeded.
pub fn repair_json(text: &str) -> Option<(Value, RepairStage)> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some((v, RepairStage::Direct));
    }

    let unfenced = strip_fences(trimmed);
    if let Some(inner) = unfenced {
        if let Ok(v) = serde_json::from_str::<Value>(inner) {
            return Some((v, RepairStage::FenceStripped));
        }
    }

    let base = unfenced.unwrap_or(trimmed);
    let candidate = extract_brackets(base);
    if let Some(c) = candidate {
        if let Ok(v) = serde_json::from_str::<Value>(c) {
            return Some((v, RepairStage::BracketExtracted));
        }
    }

    let normalized = normalize_quotes(candidate.unwrap_or(base));
    serde_json::from_str::<Value>(&normalized)
        .ok()
        .map(|v| (v, RepairStage::QuotesNormalized))
}

/// Content of the first fenced code block, if any.
fn strip_fences(text: &str) -> Option<&str> {
    FENCE
        .as_ref()?
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// From the first `{` or `[` to the last matching closer.
fn extract_brackets(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Smart quotes to ASCII, single-quoted strings to double-quoted, trailing commas dropped.
fn normalize_quotes(text: &str) -> String {
    let ascii: String = text
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => '\'',
            other => other,
        })
        .collect();

    let double_quoted = match SINGLE_QUOTED.as_ref() {
        Some(re) => re
            .replace_all(&ascii, |caps: &Captures| {
                let body = caps["body"].replace("\\'", "'").replace('"', "\\\"");
                format!("{}\"{}\"", &caps["pre"], body)
            })
            .into_owned(),
        None => ascii,
    };
    match TRAILING_COMMA.as_ref() {
        Some(re) => re.replace_all(&double_quoted, "$close").into_owned(),
        None => double_quoted,
    }
}
