//! Lenient recovery of a plan from free-form model output.
//!
//! Precedence: the first fenced code block that holds a JSON object, then the largest
//! brace-delimited span that parses, then a description-only fallback built from the
//! raw text. Nothing in here returns an error.

use crate::plan::Plan;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

const FENCE: &str = "```";
const ELLIPSIS: &str = "...";
/// Bounds the brace search on pathological replies.
const MAX_BRACE_CANDIDATES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    FencedBlock,
    BraceSpan,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPlan {
    pub plan: Plan,
    pub source: PlanSource,
    /// Parts of the reply that were dropped, for the warning list.
    pub notes: Vec<String>,
}

pub fn parse_plan(raw: &str, description_limit: usize) -> ParsedPlan {
    if let Some(obj) = find_fenced_object(raw) {
        let (plan, notes) = Plan::from_json_object(&obj);
        debug!("Plan recovered from fenced block ({} steps)", plan.steps.len());
        return ParsedPlan {
            plan,
            source: PlanSource::FencedBlock,
            notes,
        };
    }

    if let Some(obj) = find_brace_object(raw) {
        let (plan, notes) = Plan::from_json_object(&obj);
        debug!("Plan recovered from brace span ({} steps)", plan.steps.len());
        return ParsedPlan {
            plan,
            source: PlanSource::BraceSpan,
            notes,
        };
    }

    debug!("No JSON plan in model reply, using description-only fallback");
    ParsedPlan {
        plan: Plan::description_only(truncate_description(raw, description_limit)),
        source: PlanSource::Fallback,
        notes: vec!["model reply contained no parseable JSON plan".to_string()],
    }
}

/// Renders a plan the way a well-behaved model would reply.
pub fn render_fenced(plan: &Plan) -> serde_json::Result<String> {
    Ok(format!("{}json\n{}\n{}", FENCE, serde_json::to_string_pretty(plan)?, FENCE))
}

/// Bodies of every fenced block, in order. An unterminated fence is ignored.
pub fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find(FENCE) {
        let after_open = &rest[open + FENCE.len()..];
        let line_end = after_open.find('\n').unwrap_or(after_open.len());
        let first_line = &after_open[..line_end];

        // ```{"a": 1}``` on a single line
        if let Some(close) = first_line.find(FENCE) {
            blocks.push(&first_line[..close]);
            rest = &after_open[close + FENCE.len()..];
            continue;
        }

        let body_start = if is_info_string(first_line) {
            (line_end + 1).min(after_open.len())
        } else {
            0
        };
        let body_and_rest = &after_open[body_start..];
        let Some(close) = body_and_rest.find(FENCE) else {
            break;
        };
        blocks.push(&body_and_rest[..close]);
        rest = &body_and_rest[close + FENCE.len()..];
    }
    blocks
}

/// A language tag such as `json` (or nothing) after the opening fence.
fn is_info_string(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '.'))
}

fn find_fenced_object(text: &str) -> Option<serde_json::Map<String, JsonValue>> {
    fenced_blocks(text).into_iter().find_map(|body| match serde_json::from_str::<JsonValue>(body.trim()) {
        Ok(JsonValue::Object(obj)) => Some(obj),
        _ => None,
    })
}

/// Tries spans from the earliest `{` to the latest `}` first, shrinking inward, and
/// returns the first one that decodes as an object. When the capped candidates miss,
/// the span ending at the brace that balances the opening one is tried as well.
pub fn find_brace_object(text: &str) -> Option<serde_json::Map<String, JsonValue>> {
    let opens: Vec<usize> = text.match_indices('{').map(|(i, _)| i).take(MAX_BRACE_CANDIDATES).collect();
    let closes: Vec<usize> = text
        .rmatch_indices('}')
        .map(|(i, _)| i)
        .take(MAX_BRACE_CANDIDATES)
        .collect();

    for &start in &opens {
        for &end in closes.iter().filter(|&&end| end > start) {
            if let Ok(JsonValue::Object(obj)) = serde_json::from_str::<JsonValue>(&text[start..=end]) {
                return Some(obj);
            }
        }
        if let Some(end) = matching_close(text, start).filter(|end| !closes.contains(end)) {
            if let Ok(JsonValue::Object(obj)) = serde_json::from_str::<JsonValue>(&text[start..=end]) {
                return Some(obj);
            }
        }
    }
    None
}

/// Byte index of the `}` that closes the `{` at `start`, skipping braces inside strings.
fn matching_close(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// First `limit` characters of the trimmed text, with an ellipsis when cut.
pub fn truncate_description(raw: &str, limit: usize) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= limit {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(limit).collect();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, Value};
    use crate::plan::{AggFn, Step, StepKind};
    use serde_json::json;

    #[test]
    fn test_fenced_block_wins_over_prose_braces() {
        let raw = "Here is {not json}.\n```json\n{\"description\": \"Filtered\", \"steps\": []}\n```\nDone {x}";
        let parsed = parse_plan(raw, 200);
        assert_eq!(parsed.source, PlanSource::FencedBlock);
        assert_eq!(parsed.plan.description, "Filtered");
    }

    #[test]
    fn test_brace_span_inside_prose() {
        let raw = r#"Sure! The result is {"description": "Totals by {region}", "steps": [{"kind": "aggregate", "column": "x", "fn": "sum"}]} hope that helps."#;
        let parsed = parse_plan(raw, 200);
        assert_eq!(parsed.source, PlanSource::BraceSpan);
        assert_eq!(parsed.plan.description, "Totals by {region}");
        match &parsed.plan.steps[0] {
            Step::Aggregate(agg) => assert_eq!(agg.func, AggFn::Sum),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_trailing_brace_noise_shrinks_span() {
        let raw = r#"{"description": "ok"} and then a stray }"#;
        let parsed = parse_plan(raw, 200);
        assert_eq!(parsed.source, PlanSource::BraceSpan);
        assert_eq!(parsed.plan.description, "ok");
    }

    #[test]
    fn test_many_trailing_braces_still_find_the_object() {
        let raw = format!(r#"{{"description": "ok", "steps": []}} trailing: {}"#, "}".repeat(70));
        let parsed = parse_plan(&raw, 200);
        assert_eq!(parsed.source, PlanSource::BraceSpan);
        assert_eq!(parsed.plan.description, "ok");
    }

    #[test]
    fn test_matching_close_skips_braces_in_strings() {
        let text = r#"x {"a": "}{", "b": {"c": "\"}"}} tail }"#;
        let start = text.find('{').unwrap();
        let end = matching_close(text, start).unwrap();
        assert_eq!(&text[start..=end], r#"{"a": "}{", "b": {"c": "\"}"}}"#);
        assert_eq!(matching_close("{ never closed", 0), None);
    }

    #[test]
    fn test_malformed_fence_falls_back_to_braces() {
        let raw = "```json\n{\"description\": oops}\n```\nretry: {\"description\": \"second\"}";
        let parsed = parse_plan(raw, 200);
        assert_eq!(parsed.source, PlanSource::BraceSpan);
        assert_eq!(parsed.plan.description, "second");
    }

    #[test]
    fn test_no_json_yields_truncated_description() {
        let parsed = parse_plan("Sorry, I can't do that.", 200);
        assert_eq!(parsed.source, PlanSource::Fallback);
        assert_eq!(parsed.plan.description, "Sorry, I can't do that.");
        assert!(parsed.plan.steps.is_empty());
        assert!(parsed.plan.new_data.is_none());

        let long = "x".repeat(250);
        let parsed = parse_plan(&long, 200);
        assert_eq!(parsed.plan.description.len(), 203);
        assert!(parsed.plan.description.ends_with("..."));
    }

    #[test]
    fn test_truncation_counts_characters() {
        let text = "é".repeat(10);
        assert_eq!(truncate_description(&text, 4), "éééé...");
        assert_eq!(truncate_description("  short  ", 10), "short");
    }

    #[test]
    fn test_malformed_new_data_is_dropped_with_note() {
        let raw = r#"{"description": "d", "newData": {"headers": ["a", "b"], "data": [[1]]}}"#;
        let parsed = parse_plan(raw, 200);
        assert!(parsed.plan.new_data.is_none());
        assert_eq!(parsed.notes.len(), 1);
    }

    #[test]
    fn test_unknown_step_kinds_survive_parsing() {
        let raw = r#"{"description": "d", "steps": [{"kind": "pivot"}, {"kind": "sort", "column": "a"}]}"#;
        let parsed = parse_plan(raw, 200);
        assert_eq!(parsed.plan.steps.len(), 2);
        assert_eq!(parsed.plan.steps[0].kind(), None);
        assert_eq!(parsed.plan.steps[1].kind(), Some(StepKind::Sort));
    }

    #[test]
    fn test_fenced_round_trip() {
        let plan = Plan {
            description: "Only rows with amount over 10".to_string(),
            new_data: Some(
                Dataset::new(
                    vec!["name".to_string(), "amount".to_string()],
                    vec![
                        vec![Value::from("a"), Value::Number(12.0)],
                        vec![Value::from("b"), Value::Number(10.5)],
                        vec![Value::Null, Value::Bool(true)],
                    ],
                )
                .unwrap(),
            ),
            steps: vec![Step::from_json(json!({"kind": "filter", "column": "amount", "op": "gt", "value": 10}))],
        };
        let rendered = render_fenced(&plan).unwrap();
        let parsed = parse_plan(&rendered, 200);
        assert_eq!(parsed.source, PlanSource::FencedBlock);
        assert_eq!(parsed.plan, plan);
    }

    #[test]
    fn test_fenced_blocks_without_language_tag() {
        let text = "```\n{\"a\": 1}\n```\n```python\nprint(1)\n```";
        let blocks = fenced_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].trim(), "{\"a\": 1}");
        assert_eq!(blocks[1].trim(), "print(1)");

        let inline = fenced_blocks("see ```{\"b\": 2}``` above");
        assert_eq!(inline, vec!["{\"b\": 2}"]);
    }
}
