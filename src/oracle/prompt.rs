//! Prompt text for oracle requests.

/// Longest source excerpt sent to the oracle, in bytes
pub const MAX_SOURCE_BYTES: usize = 12_000;
/// Longest captured-output excerpt sent to the oracle, in bytes
pub const MAX_OUTPUT_BYTES: usize = 2_000;

/// Ask for a step-by-step trace of `code` as a JSON array of frames.
pub fn trace_prompt(code: &str, captured_output: Option<&str>) -> String {
    let mut prompt = format!(
        r#"Simulate the execution of this program step by step.

Program:
```
{}
```
"#,
        truncate_message(code, MAX_SOURCE_BYTES)
    );

    if let Some(output) = captured_output.filter(|o| !o.trim().is_empty()) {
        prompt.push_str(&format!(
            "\nWhen it ran, it printed:\n```\n{}\n```\n",
            truncate_message(output, MAX_OUTPUT_BYTES)
        ));
    }

    prompt.push_str(
        r#"
Respond ONLY with a JSON array (no markdown, no explanation). Each element is one step:
{"id": 0, "action": "INIT|READ|COMPARE|SWAP|WRITE|BRANCH|END|CALL",
 "description": "one sentence a beginner understands",
 "memory": {"variable": value},
 "structure": "ARRAY|TREE|GRAPH|VARIABLE|OBJECT|QUEUE|STACK|SPECIAL",
 "highlight": {"indices": [0], "pointer": "i"},
 "line": 1}
Every step must carry the full memory snapshot, not a diff. Keep it under 40 steps."#,
    );
    prompt
}

/// Ask for a list of problems in `code` as JSON.
pub fn review_prompt(code: &str) -> String {
    format!(
        r#"Review this program for bugs and beginner mistakes.

Program:
```
{}
```

Respond ONLY with valid JSON (no markdown, no explanation):
{{"issues": [{{"line": 1, "severity": "error|warning|info", "message": "...", "suggestion": "..."}}]}}
If there is nothing to fix, respond with: No issues found."#,
        truncate_message(code, MAX_SOURCE_BYTES)
    )
}

/// Cut `msg` to at most `max_len` bytes on a char boundary.
pub fn truncate_message(msg: &str, max_len: usize) -> String {
    if msg.len() <= max_len {
        return msg.to_string();
    }
    let mut end = max_len;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &msg[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_prompt_includes_output_only_when_present() {
        let with = trace_prompt("print(1)", Some("1\n"));
        assert!(with.contains("print(1)"));
        assert!(with.contains("it printed"));

        let without = trace_prompt("print(1)", Some("  "));
        assert!(!without.contains("it printed"));
    }

    #[test]
    fn test_review_prompt_mentions_all_clear_phrase() {
        assert!(review_prompt("x = 1").contains("No issues found"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_message("short", 10), "short");
        assert_eq!(truncate_message("héllo", 2), "h...");
    }
}
