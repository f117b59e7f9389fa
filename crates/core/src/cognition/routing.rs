//! Splits a raw model response into its marked segments.
//!
//! Markers are `PLAN:`, `EXECUTE:`, `THOUGHT_SEED:` and `RESPONSE:` at the
//! start of a line (leading blanks allowed). Each segment runs to the next
//! marker of any kind or the end of the text. The first `PLAN:`,
//! `THOUGHT_SEED:` and `RESPONSE:` win; every `EXECUTE:` is kept.

use crate::types::RoutedOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Plan,
    Execute,
    ThoughtSeed,
    Response,
}

const MARKERS: &[(&str, Marker)] = &[
    ("PLAN:", Marker::Plan),
    ("EXECUTE:", Marker::Execute),
    ("THOUGHT_SEED:", Marker::ThoughtSeed),
    ("RESPONSE:", Marker::Response),
];

/// (marker, byte offset of the marker, byte offset where its content starts)
fn scan(text: &str) -> Vec<(Marker, usize, usize)> {
    let mut found = Vec::new();
    let mut line_start = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start_matches([' ', '\t']);
        let at = line_start + (line.len() - trimmed.len());
        if let Some((tag, marker)) = MARKERS.iter().find(|(tag, _)| trimmed.starts_with(tag)) {
            found.push((*marker, at, at + tag.len()));
        }
        line_start += line.len();
    }
    found
}

/// Route one raw response. Text without a `RESPONSE:` marker is returned
/// unchanged as the response.
pub fn route(text: &str) -> RoutedOutput {
    let marks = scan(text);
    let mut out = RoutedOutput::default();
    let mut response = None;

    for (i, &(marker, _, content_start)) in marks.iter().enumerate() {
        let end = marks.get(i + 1).map_or(text.len(), |&(_, next, _)| next);
        let segment = text[content_start..end].trim();
        match marker {
            Marker::Plan if out.plan.is_none() => out.plan = Some(segment.to_string()),
            Marker::ThoughtSeed if out.thought_seed.is_none() => out.thought_seed = Some(segment.to_string()),
            Marker::Response if response.is_none() => response = Some(segment.to_string()),
            Marker::Execute if !segment.is_empty() => out.execute.push(segment.to_string()),
            _ => {}
        }
    }

    out.response = response.unwrap_or_else(|| text.to_string());
    out
}

/// Everything after the first line-leading `PLAN:` marker, trimmed.
pub fn after_plan_marker(text: &str) -> Option<&str> {
    scan(text)
        .into_iter()
        .find(|(m, _, _)| *m == Marker::Plan)
        .map(|(_, _, start)| text[start..].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmarked_text_is_returned_unchanged() {
        let text = "  Just a friendly answer.\nWith two lines.  ";
        let out = route(text);
        assert_eq!(out.response, text);
        assert!(out.plan.is_none());
        assert!(out.execute.is_empty());
    }

    #[test]
    fn all_markers_split_in_order() {
        let out = route("PLAN: x\nEXECUTE: y\nRESPONSE: z");
        assert_eq!(out.plan.as_deref(), Some("x"));
        assert_eq!(out.execute, vec!["y"]);
        assert_eq!(out.response, "z");
        assert!(out.thought_seed.is_none());
    }

    #[test]
    fn response_only() {
        assert_eq!(route("RESPONSE: Hello there").response, "Hello there");
    }

    #[test]
    fn first_occurrence_wins_and_executes_accumulate() {
        let text = "PLAN: first\nRESPONSE: one\nEXECUTE: ai.read(\"a\")\nPLAN: second\n  EXECUTE: ai.read(\"b\")\nRESPONSE: two\nTHOUGHT_SEED: look into b";
        let out = route(text);
        assert_eq!(out.plan.as_deref(), Some("first"));
        assert_eq!(out.response, "one");
        assert_eq!(out.execute, vec!["ai.read(\"a\")", "ai.read(\"b\")"]);
        assert_eq!(out.thought_seed.as_deref(), Some("look into b"));
    }

    #[test]
    fn multiline_segments_and_mid_line_markers() {
        let text = "PLAN: step one\nstep two\nRESPONSE: Sure. Note the PLAN: word inline.\nSecond line.";
        let out = route(text);
        assert_eq!(out.plan.as_deref(), Some("step one\nstep two"));
        assert_eq!(out.response, "Sure. Note the PLAN: word inline.\nSecond line.");
    }

    #[test]
    fn empty_execute_is_dropped() {
        let out = route("EXECUTE:\nRESPONSE: ok");
        assert!(out.execute.is_empty());
        assert_eq!(out.response, "ok");
    }

    #[test]
    fn plan_marker_tail() {
        assert_eq!(after_plan_marker("Thinking...\nPLAN: do a\nthen b"), Some("do a\nthen b"));
        assert_eq!(after_plan_marker("no marker here"), None);
    }
}
