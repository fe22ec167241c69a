//! Heuristic live guesser
//!
//! Turns the most recently edited line into at most one approximate frame
//! without calling the oracle. Cheap enough to run after every short idle
//! pause while the user types.

use std::sync::OnceLock;

use regex::Regex;

use super::frame::{FrameAction, Highlight, MemoryValue, StructureKind, TraceFrame};

/// Items assumed to already live in a list when an append is seen in isolation
pub const DEFAULT_ASSUMED_ITEMS: &[&str] = &["4", "10", "5"];

fn append_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*([A-Za-z_$][\w$]*)\s*\.\s*(?:push|append|add|push_back|enqueue)\s*\(\s*(.+?)\s*\)\s*;?\s*$",
        )
        .expect("append pattern is a valid regex")
    })
}

fn binding_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:(?:let|const|var|mut|auto|int|long|float|double|char|bool|string|String|final)\s+)*([A-Za-z_$][\w$]*)\s*(?::\s*[^=]+?)?\s*=\s*([^=\s].*?)\s*;?\s*$",
        )
        .expect("binding pattern is a valid regex")
    })
}

fn layout_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(display|flex-direction|flex-wrap|justify-content|align-items|align-content|gap|flexDirection|justifyContent|alignItems)\s*:\s*([^;{}]+?)\s*[;,]?\s*$",
        )
        .expect("layout pattern is a valid regex")
    })
}

/// Pattern-based guesser for the fast path.
#[derive(Debug, Clone)]
pub struct LiveGuesser {
    assumed_items: Vec<String>,
}

impl Default for LiveGuesser {
    fn default() -> Self {
        Self::new(DEFAULT_ASSUMED_ITEMS.iter().map(|s| s.to_string()).collect())
    }
}

impl LiveGuesser {
    pub fn new(assumed_items: Vec<String>) -> Self {
        Self { assumed_items }
    }

    /// Guess a frame for the last non-empty line of `source`.
    ///
    /// Returns `None` when no pattern matches; that is a normal outcome.
    pub fn guess(&self, source: &str) -> Option<TraceFrame> {
        let line = source.lines().rev().find(|l| !l.trim().is_empty())?;

        self.guess_append(line)
            .or_else(|| guess_binding(line))
            .or_else(|| guess_layout(line))
    }

    fn guess_append(&self, line: &str) -> Option<TraceFrame> {
        let caps = append_pattern().captures(line)?;
        let name = caps.get(1)?.as_str();
        let value = strip_literal(caps.get(2)?.as_str());
        if value.is_empty() {
            return None;
        }

        let mut items: Vec<MemoryValue> = self
            .assumed_items
            .iter()
            .map(|item| MemoryValue::text(item.clone()))
            .collect();
        items.push(MemoryValue::text(value.clone()));
        let new_index = items.len() - 1;

        Some(
            TraceFrame::new(0, FrameAction::Write, format!("Append {value} to {name}"))
                .with_memory(name, MemoryValue::List(items))
                .with_structure(StructureKind::Array)
                .with_highlight(Highlight::index(new_index)),
        )
    }
}

fn guess_binding(line: &str) -> Option<TraceFrame> {
    let caps = binding_pattern().captures(line)?;
    let name = caps.get(1)?.as_str();
    let value = strip_literal(caps.get(2)?.as_str());
    if value.is_empty() {
        return None;
    }

    Some(
        TraceFrame::new(0, FrameAction::Write, format!("Set {name} to {value}"))
            .with_memory(name, MemoryValue::text(value))
            .with_structure(StructureKind::Variable),
    )
}

fn guess_layout(line: &str) -> Option<TraceFrame> {
    let caps = layout_pattern().captures(line)?;
    let property = caps.get(1)?.as_str();
    let value = strip_literal(caps.get(2)?.as_str());

    Some(
        TraceFrame::new(0, FrameAction::Write, format!("Layout {property}: {value}"))
            .with_memory("property", MemoryValue::text(property))
            .with_memory("value", MemoryValue::text(value))
            .with_structure(StructureKind::Special),
    )
}

/// Strip statement terminators, trailing commas and surrounding quotes.
fn strip_literal(raw: &str) -> String {
    raw.trim()
        .trim_end_matches([';', ','])
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string()
}
