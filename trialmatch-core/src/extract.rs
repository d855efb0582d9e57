//! Payload extraction and display sanitizing for reasoning-service replies.
//!
//! The service embeds its decision as JSON inside free-form text, normally in
//! a single fenced ```` ```json ```` block. Everything here treats that
//! convention as untrusted: a missing or malformed payload is a normal
//! outcome, never an error.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::models::DecisionPayload;

/// One fence pair: opening backticks, optional info tag, body up to the next
/// backticks (or the end of the text when the fence never closes).
fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"```([A-Za-z0-9_+-]*)([\s\S]*?)(```|\z)").expect("valid fence regex")
    })
}

fn final_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""final"\s*:\s*true\b"#).expect("valid final marker regex"))
}

/// Result of looking for a payload in a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadScan {
    /// A candidate was found and decoded into a payload.
    Parsed(DecisionPayload),
    /// A candidate was found but did not decode into a payload.
    Malformed,
    /// No candidate at all.
    Absent,
}

impl PayloadScan {
    pub fn payload(&self) -> Option<&DecisionPayload> {
        match self {
            Self::Parsed(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn into_payload(self) -> Option<DecisionPayload> {
        match self {
            Self::Parsed(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Locate the last payload candidate and try to decode it.
///
/// Fenced blocks take priority; the rightmost one wins. Without any fenced
/// block, the last top-level brace span of the raw text is tried instead.
pub fn scan_payload(text: &str) -> PayloadScan {
    let fences = fences(text);
    let fenced_last = fences
        .iter()
        .filter(|f| f.holds_object())
        .last()
        .map(|f| f.body.trim());

    let candidate = match fenced_last {
        Some(block) => Some(block),
        None => scan_braces(text)
            .complete
            .last()
            .map(|&(start, end)| &text[start..end]),
    };

    let Some(candidate) = candidate else {
        if fences.iter().any(|f| f.is_json_tagged()) || has_unterminated_candidate(text) {
            return PayloadScan::Malformed;
        }
        return PayloadScan::Absent;
    };

    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => match DecisionPayload::from_value(value) {
            Some(payload) => PayloadScan::Parsed(payload),
            None => PayloadScan::Malformed,
        },
        Err(e) => {
            tracing::debug!(error = %e, candidate_len = candidate.len(), "Payload candidate failed to parse");
            PayloadScan::Malformed
        }
    }
}

/// The last structured payload in `text`, if any decodes.
pub fn extract_payload(text: &str) -> Option<DecisionPayload> {
    scan_payload(text).into_payload()
}

/// True when the raw text carries a `"final": true` marker, whether or not
/// the surrounding payload decodes.
pub fn claims_final(text: &str) -> bool {
    final_marker_re().is_match(text)
}

/// Whether the reply is the terminal decision reply.
///
/// A decoded payload decides on its own `final` flag. A malformed candidate
/// still counts as terminal when the raw text claims `"final": true`, so a
/// truncated final reply is persisted as `Unknown` instead of being dropped.
pub fn is_terminal(scan: &PayloadScan, raw: &str) -> bool {
    match scan {
        PayloadScan::Parsed(payload) => payload.is_final,
        PayloadScan::Malformed => claims_final(raw),
        PayloadScan::Absent => false,
    }
}

/// User-safe rendering of a reply.
///
/// Stages run in order: fenced JSON blocks, a trailing bare brace span, then
/// the control token. The passes repeat until nothing changes, so a removal
/// that exposes an earlier-stage match is handled and the function is
/// idempotent.
pub fn sanitize_for_display(text: &str, contact_token: &str) -> String {
    let mut current = text.trim().to_string();
    loop {
        let next = sanitize_pass(&current, contact_token);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn sanitize_pass(text: &str, contact_token: &str) -> String {
    let without_fences = fence_re().replace_all(text, |caps: &Captures| {
        let fence = Fence::from_captures(caps);
        if fence.is_json_tagged() || fence.holds_object() {
            String::new()
        } else {
            caps[0].to_string()
        }
    });
    let without_trailing = strip_trailing_brace_span(without_fences.trim());

    let mut out = without_trailing.trim().to_string();
    if !contact_token.is_empty() {
        out = out.replace(contact_token, "");
    }
    out.trim().to_string()
}

/// Remove a brace span that ends the text, or an unterminated JSON-looking
/// object running to the end.
fn strip_trailing_brace_span(text: &str) -> &str {
    let spans = scan_braces(text);

    if let Some(start) = spans.unclosed {
        if looks_like_json_object(&text[start..]) {
            return &text[..start];
        }
        return text;
    }

    match spans.complete.last() {
        Some(&(start, end)) if text[end..].trim().is_empty() => &text[..start],
        _ => text,
    }
}

fn looks_like_json_object(span: &str) -> bool {
    span.strip_prefix('{')
        .map(|rest| rest.trim_start().starts_with('"'))
        .unwrap_or(false)
}

fn has_unterminated_candidate(text: &str) -> bool {
    scan_braces(text)
        .unclosed
        .is_some_and(|start| looks_like_json_object(&text[start..]))
}

/// A fenced block. Only untagged or `json`-tagged fences can carry a payload.
struct Fence<'a> {
    tag: &'a str,
    body: &'a str,
}

impl<'a> Fence<'a> {
    fn from_captures(caps: &Captures<'a>) -> Self {
        Self {
            tag: caps.get(1).map_or("", |m| m.as_str()),
            body: caps.get(2).map_or("", |m| m.as_str()),
        }
    }

    fn is_json_tagged(&self) -> bool {
        self.tag.eq_ignore_ascii_case("json")
    }

    fn holds_object(&self) -> bool {
        (self.tag.is_empty() || self.is_json_tagged()) && self.body.trim_start().starts_with('{')
    }
}

/// Fences in order, each paired with the next closing backticks.
fn fences(text: &str) -> Vec<Fence<'_>> {
    fence_re()
        .captures_iter(text)
        .map(|caps| Fence::from_captures(&caps))
        .collect()
}

/// Top-level `{...}` spans as byte ranges, plus the start of a trailing span
/// that never closed. Quotes are only tracked inside braces so prose
/// punctuation cannot desynchronise the scan.
struct BraceSpans {
    complete: Vec<(usize, usize)>,
    unclosed: Option<usize>,
}

fn scan_braces(text: &str) -> BraceSpans {
    let mut complete = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    complete.push((start, i + 1));
                }
            }
            _ => {}
        }
    }

    BraceSpans {
        complete,
        unclosed: (depth > 0).then_some(start),
    }
}
