//! Recovery of structured values from generated text.
//!
//! Models rarely return exactly what was asked for. Each parser here runs
//! a sequence of increasingly lenient strategies and reports failure as a
//! [`ParseError`], which the dispatcher answers with a regeneration:
//!
//! 1. Strip chat-template artifacts ([`clean_response`])
//! 2. Parse the whole reply as JSON
//! 3. Parse the body of a fenced code block
//! 4. Retry 2 and 3 with trailing commas removed
//! 5. Fall back to pattern matching on the raw text
//!
//! The non-`try_` variants never fail: they log the raw reply and return
//! the documented fallback value.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;
use vaxsim_types::{AttitudeDistribution, AttitudeReply, Lesson};

use crate::error::ParseError;

/// Reasoning recorded when the reply carried only numbers.
pub const NO_REASONING: &str = "No reasoning provided";

/// Reasoning recorded with the uniform fallback distribution.
pub const PARSING_ERROR_REASONING: &str = "Parsing error";

/// Minimum length, in characters, of a usable post.
const MIN_ACTION_CHARS: usize = 3;

/// Chat-template tokens some models echo back.
const TEMPLATE_TOKENS: [&str; 7] = [
    "<|im_start|>",
    "<|im_end|>",
    "<|eot_id|>",
    "<|endoftext|>",
    "<s>",
    "</s>",
    "<|assistant|>",
];

/// Innermost bracketed group: `[ ... ]` without nested brackets.
static BRACKETED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]*)\]").ok());

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// Remove echoed instruction blocks and chat-template tokens.
pub fn clean_response(raw: &str) -> String {
    let mut text = raw.to_owned();
    while let Some(start) = text.find("[INST]") {
        let end = text
            .get(start..)
            .and_then(|rest| rest.find("[/INST]"))
            .and_then(|offset| start.checked_add(offset))
            .and_then(|pos| pos.checked_add("[/INST]".len()))
            .unwrap_or_else(|| start.saturating_add("[INST]".len()));
        text.replace_range(start..end, "");
    }
    let text = text.replace("[/INST]", "");
    TEMPLATE_TOKENS
        .iter()
        .fold(text, |acc, token| acc.replace(token, ""))
        .trim()
        .to_owned()
}

/// Body of the first fenced code block, with any language tag dropped.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = text.get(open.checked_add(3)?..)?;
    // The language tag, if any, runs to the end of the opening line.
    let body = after_fence
        .find('\n')
        .and_then(|nl| after_fence.get(nl.checked_add(1)?..))
        .unwrap_or(after_fence);
    let close = body.find("```")?;
    body.get(..close).map(str::trim)
}

/// Drop commas that directly precede `}` or `]` (whitespace allowed).
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // A comma plus the whitespace seen after it, held until we know whether
    // a closing delimiter follows.
    let mut held: Option<String> = None;
    for c in text.chars() {
        if let Some(buffer) = held.as_mut() {
            if c.is_whitespace() {
                buffer.push(c);
                continue;
            }
            let buffer = held.take().unwrap_or_default();
            if c == '}' || c == ']' {
                out.push_str(buffer.trim_start_matches(','));
            } else {
                out.push_str(&buffer);
            }
        }
        if c == ',' {
            held = Some(String::from(","));
        } else {
            out.push(c);
        }
    }
    if let Some(buffer) = held {
        out.push_str(&buffer);
    }
    out
}

/// JSON texts worth trying, most literal first.
fn json_candidates(text: &str) -> Vec<String> {
    let mut candidates = vec![text.to_owned()];
    if let Some(block) = fenced_block(text) {
        candidates.push(block.to_owned());
    }
    let relaxed: Vec<String> = candidates.iter().map(|c| strip_trailing_commas(c)).collect();
    candidates.extend(relaxed);
    candidates
}

// ---------------------------------------------------------------------------
// Attitude distributions
// ---------------------------------------------------------------------------

/// A distribution reply plus whether it was actually recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDistribution {
    /// Recovered reply, or the uniform fallback.
    pub reply: AttitudeReply,
    /// `false` when `reply` is the fallback.
    pub success: bool,
}

impl ParsedDistribution {
    /// Uniform distribution with "Parsing error" reasoning.
    pub fn fallback() -> Self {
        Self {
            reply: AttitudeReply {
                reasoning: PARSING_ERROR_REASONING.to_owned(),
                distribution: AttitudeDistribution::uniform(),
            },
            success: false,
        }
    }
}

/// Recover `{"reasoning": ..., "attitude_dist": [p1, p2, p3, p4]}`.
///
/// Also accepted: a bare list of four numbers, a list whose first element
/// is such an object, and, as a last resort, the first bracketed group of
/// exactly four numbers anywhere in the text. Values must be finite,
/// non-negative, and not all zero.
///
/// # Errors
///
/// Returns [`ParseError::Distribution`] if no strategy yields a usable
/// distribution.
pub fn try_parse_distribution(raw: &str) -> Result<AttitudeReply, ParseError> {
    let cleaned = clean_response(raw);
    for candidate in json_candidates(&cleaned) {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate)
            && let Some(reply) = reply_from_value(&value)
        {
            return Ok(reply);
        }
    }

    // Only the first bracketed group is considered.
    if let Some(group) = BRACKETED
        .as_ref()
        .and_then(|regex| regex.captures(&cleaned))
        .and_then(|captures| captures.get(1))
        && let Some(distribution) = distribution_from_csv(group.as_str())
    {
        return Ok(AttitudeReply {
            reasoning: NO_REASONING.to_owned(),
            distribution,
        });
    }

    Err(ParseError::Distribution(format!(
        "no four-value distribution in {} chars of output",
        cleaned.chars().count()
    )))
}

/// [`try_parse_distribution`], falling back to uniform on failure.
pub fn parse_distribution(raw: &str) -> ParsedDistribution {
    match try_parse_distribution(raw) {
        Ok(reply) => ParsedDistribution {
            reply,
            success: true,
        },
        Err(e) => {
            warn!(error = %e, raw_response = raw, "falling back to uniform attitude distribution");
            ParsedDistribution::fallback()
        }
    }
}

fn reply_from_value(value: &Value) -> Option<AttitudeReply> {
    match value {
        Value::Array(items) if items.first().is_some_and(Value::is_object) => {
            items.first().and_then(reply_from_value)
        }
        Value::Array(_) => distribution_from_value(value).map(|distribution| AttitudeReply {
            reasoning: NO_REASONING.to_owned(),
            distribution,
        }),
        Value::Object(map) => {
            let distribution = map.get("attitude_dist").and_then(distribution_from_value)?;
            let reasoning = match map.get("reasoning") {
                Some(Value::String(text)) => text.clone(),
                Some(other) if !other.is_null() => other.to_string(),
                _ => NO_REASONING.to_owned(),
            };
            Some(AttitudeReply {
                reasoning,
                distribution,
            })
        }
        _ => None,
    }
}

fn distribution_from_value(value: &Value) -> Option<AttitudeDistribution> {
    let items = value.as_array()?;
    let numbers: Vec<f64> = items
        .iter()
        .map(|item| match item {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    validated(&numbers)
}

fn distribution_from_csv(group: &str) -> Option<AttitudeDistribution> {
    let numbers: Vec<f64> = group
        .split(',')
        .map(|part| part.trim().trim_matches(['"', '\'']).parse().ok())
        .collect::<Option<_>>()?;
    validated(&numbers)
}

fn validated(numbers: &[f64]) -> Option<AttitudeDistribution> {
    let values: [f64; 4] = numbers.try_into().ok()?;
    if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return None;
    }
    let distribution = AttitudeDistribution::new(values);
    (distribution.total() > 0.0).then_some(distribution)
}

// ---------------------------------------------------------------------------
// Lesson lists
// ---------------------------------------------------------------------------

/// Recover `[["lesson text", importance], ...]` into lessons dated `day`.
///
/// Quotes are dropped and whitespace collapsed before splitting, so
/// single-quoted, double-quoted and unquoted entries all work. Within an
/// entry the last comma separates text from importance; trailing junk
/// after the number is trimmed off character by character. Entries with
/// empty text or no parsable importance are skipped.
///
/// # Errors
///
/// Returns [`ParseError::Lessons`] if no entry could be recovered.
pub fn try_parse_lesson_list(raw: &str, day: u32) -> Result<Vec<Lesson>, ParseError> {
    let cleaned = clean_response(raw);
    let body = fenced_block(&cleaned).unwrap_or(&cleaned);
    let flat = body
        .replace(['\'', '"'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let flat = flat.trim().trim_start_matches('[').trim_end_matches(']');

    let lessons: Vec<Lesson> = flat
        .split("],")
        .filter_map(|entry| {
            let entry = entry.trim().trim_start_matches('[').trim_end_matches(']');
            let (text, importance) = entry.rsplit_once(',')?;
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            let importance = leading_number(importance)?;
            Some(Lesson::new(text, day, importance))
        })
        .collect();

    if lessons.is_empty() {
        return Err(ParseError::Lessons(format!(
            "no lesson entries in {} chars of output",
            cleaned.chars().count()
        )));
    }
    Ok(lessons)
}

/// [`try_parse_lesson_list`], falling back to no lessons on failure.
pub fn parse_lesson_list(raw: &str, day: u32) -> Vec<Lesson> {
    try_parse_lesson_list(raw, day).unwrap_or_else(|e| {
        warn!(error = %e, raw_response = raw, "dropping unparsable lesson list");
        Vec::new()
    })
}

/// Longest prefix of `raw` that parses as a finite number.
fn leading_number(raw: &str) -> Option<f64> {
    let mut candidate = raw.trim().to_owned();
    while !candidate.is_empty() {
        if let Ok(value) = candidate.trim_end().parse::<f64>()
            && value.is_finite()
        {
            return Some(value);
        }
        candidate.pop();
    }
    None
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Recover a post: cleaned, trimmed, at least three characters.
///
/// # Errors
///
/// Returns [`ParseError::Action`] if the cleaned text is too short.
pub fn try_parse_action(raw: &str) -> Result<String, ParseError> {
    let cleaned = clean_response(raw);
    let text = cleaned.trim();
    if text.chars().count() < MIN_ACTION_CHARS {
        return Err(ParseError::Action(format!("{text:?} is too short")));
    }
    Ok(text.to_owned())
}

/// [`try_parse_action`] as an option.
pub fn parse_action_text(raw: &str) -> Option<String> {
    try_parse_action(raw).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn parse_plain_json_reply() {
        let raw = r#"{"reasoning": "Doctor recommended it.", "attitude_dist": [0.1, 0.2, 0.3, 0.4]}"#;
        let parsed = parse_distribution(raw);
        assert!(parsed.success);
        assert_eq!(parsed.reply.reasoning, "Doctor recommended it.");
        assert!(close(parsed.reply.distribution.values()[3], 0.4));
    }

    #[test]
    fn parse_serialized_reply() {
        let reply = AttitudeReply {
            reasoning: "Worried about side effects".to_owned(),
            distribution: AttitudeDistribution::new([0.4, 0.3, 0.2, 0.1]),
        };
        let raw = serde_json::to_string(&reply).unwrap();
        assert_eq!(try_parse_distribution(&raw).unwrap(), reply);
    }

    #[test]
    fn parse_from_codeblock_with_trailing_comma() {
        let raw = "Sure!\n```json\n{\"reasoning\": \"ok\", \"attitude_dist\": [0, 0, 0.5, 0.5,],}\n```";
        let reply = try_parse_distribution(raw).unwrap();
        assert_eq!(reply.reasoning, "ok");
        assert!(close(reply.distribution.values()[2], 0.5));
    }

    #[test]
    fn parse_bare_list_and_list_of_objects() {
        let bare = try_parse_distribution("[0.7, 0.1, 0.1, 0.1]").unwrap();
        assert_eq!(bare.reasoning, NO_REASONING);

        let nested = try_parse_distribution(
            r#"[{"reasoning": "first", "attitude_dist": [1, 0, 0, 0]}, {"reasoning": "second"}]"#,
        )
        .unwrap();
        assert_eq!(nested.reasoning, "first");
    }

    #[test]
    fn parse_brackets_in_prose() {
        let raw = "<|im_start|>My belief is [0.05, 0.15, 0.3, 0.5] overall.<|im_end|>";
        let reply = try_parse_distribution(raw).unwrap();
        assert!(close(reply.distribution.values()[0], 0.05));
    }

    #[test]
    fn only_the_first_bracketed_group_counts() {
        let parsed = parse_distribution("Options [x] then [0.1, 0.2, 0.3, 0.4]");
        assert!(!parsed.success);
        assert_eq!(parsed.reply.distribution, AttitudeDistribution::uniform());

        let parsed = parse_distribution("[0.1, 0.2, 0.3, 0.4] and later [x]");
        assert!(parsed.success);
        assert!(close(parsed.reply.distribution.values()[3], 0.4));
    }

    #[test]
    fn malformed_distribution_falls_back_to_uniform() {
        for raw in [
            "[0.1, 0.2, x, 0.3]",
            "[0.1, 0.2, 0.3]",
            "[0.1, -0.2, 0.3, 0.4]",
            "[0, 0, 0, 0]",
            "",
            "no numbers here",
        ] {
            let parsed = parse_distribution(raw);
            assert!(!parsed.success, "{raw} should not parse");
            assert_eq!(parsed.reply.reasoning, PARSING_ERROR_REASONING);
            assert_eq!(parsed.reply.distribution, AttitudeDistribution::uniform());
        }
    }

    #[test]
    fn lesson_list_variants() {
        let lessons =
            try_parse_lesson_list(r#"[["Vaccines reduce risk", 0.9], ["Neighbors got sick", 0.6]]"#, 4)
                .unwrap();
        assert_eq!(lessons.len(), 2);
        assert_eq!(lessons[0].text, "Vaccines reduce risk");
        assert_eq!(lessons[0].day, 4);
        assert!(close(lessons[1].importance, 0.6));

        let single = try_parse_lesson_list("[['Side effects, mostly mild', 0.7]]", 1).unwrap();
        assert_eq!(single[0].text, "Side effects, mostly mild");

        let junk_tail = try_parse_lesson_list("[[Stay informed, 0.8)]]", 2).unwrap();
        assert!(close(junk_tail[0].importance, 0.8));
    }

    #[test]
    fn lesson_entries_without_importance_are_skipped() {
        let lessons = try_parse_lesson_list("[[\"keep\", 0.5], [\"drop\", high]]", 3).unwrap();
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].text, "keep");
    }

    #[test]
    fn lesson_list_never_panics() {
        for raw in [
            "",
            "[",
            "]",
            "[[]]",
            "[[,]]",
            ",,,,",
            "[[\"a\", ]]",
            "[INST] echo",
            "ünïcödé, 0.5",
            "[[\"x\", 1e999]]",
        ] {
            let _ = parse_lesson_list(raw, 1);
        }
        assert!(parse_lesson_list("nothing useful", 1).is_empty());
    }

    #[test]
    fn clean_strips_template_artifacts() {
        assert_eq!(clean_response("[INST] prompt [/INST] *Hello world</s>"), "*Hello world");
        assert_eq!(clean_response("<s>[INST] unterminated"), "unterminated");
    }

    #[test]
    fn action_text_length_rule() {
        assert_eq!(parse_action_text("  *Got vaccinated today!  ").as_deref(), Some("*Got vaccinated today!"));
        assert!(parse_action_text("ok").is_none());
        assert!(parse_action_text("<|im_end|>").is_none());
        assert!(parse_action_text("abc").is_some());
    }

    #[test]
    fn strip_trailing_commas_cases() {
        assert_eq!(strip_trailing_commas(r#"{"a": 1, "b": 2,}"#), r#"{"a": 1, "b": 2}"#);
        assert_eq!(strip_trailing_commas("[1, 2, 3,\n ]"), "[1, 2, 3\n ]");
        assert_eq!(strip_trailing_commas("[1,2]"), "[1,2]");
        assert_eq!(strip_trailing_commas("a,"), "a,");
    }

    #[test]
    fn fenced_block_extraction() {
        assert_eq!(fenced_block("x\n```json\n[1]\n```\ny"), Some("[1]"));
        assert_eq!(fenced_block("```\n{}\n```"), Some("{}"));
        assert_eq!(fenced_block("no fence"), None);
    }
}
