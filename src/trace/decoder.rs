//! Streamed response decoder
//!
//! The oracle is asked for a JSON array but routinely wraps it in prose or
//! markdown, and gets cut off mid-object when its response budget runs out.
//! [`Decoder`] walks a ladder of recovery strategies over the accumulated
//! buffer and returns the first one that yields a structure. Every strategy
//! is a pure function of the text, so decoding is deterministic and does no
//! I/O.

use std::collections::BTreeMap;

use serde_json::Value;

use super::frame::{FrameAction, Highlight, MemoryValue, MovingElement, StructureKind, TraceFrame};

/// Default bound on truncation backtracking attempts
pub const DEFAULT_MAX_BACKTRACK: usize = 20;

/// Phrases an oracle uses when it has nothing structured to report
const ALL_CLEAR_PHRASES: &[&str] = &[
    "no issues",
    "no problems",
    "no errors",
    "no bugs",
    "all clear",
    "looks good",
    "nothing to report",
];

/// Result of decoding one oracle buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome<T> {
    /// Elements recovered, in the order the oracle emitted them
    Decoded(Vec<T>),
    /// The oracle explicitly reported nothing
    Empty,
    /// Every recovery strategy failed
    Failed(String),
}

impl<T> DecodeOutcome<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, DecodeOutcome::Failed(_))
    }

    /// Elements as a vector; `Empty` is an empty vector, `Failed` is an error.
    pub fn into_result(self) -> Result<Vec<T>, String> {
        match self {
            DecodeOutcome::Decoded(items) => Ok(items),
            DecodeOutcome::Empty => Ok(Vec::new()),
            DecodeOutcome::Failed(reason) => Err(reason),
        }
    }
}

/// A shape the decoder can coerce loosely-typed elements into.
pub trait DecodeTarget: Sized {
    /// Object fields that may carry the element array
    const ARRAY_FIELDS: &'static [&'static str];

    /// Coerce one element. `position` counts accepted elements so far.
    ///
    /// Missing fields take safe defaults; only a non-object element is rejected.
    fn from_element(value: &Value, position: usize) -> Option<Self>;
}

impl DecodeTarget for TraceFrame {
    const ARRAY_FIELDS: &'static [&'static str] = &["frames", "steps", "trace", "timeline"];

    fn from_element(value: &Value, position: usize) -> Option<Self> {
        let obj = value.as_object()?;

        let action = string_field(value, &["action", "op", "kind"])
            .and_then(|s| FrameAction::parse(&s))
            .unwrap_or(if position == 0 {
                FrameAction::Init
            } else {
                FrameAction::Read
            });

        let description = string_field(value, &["description", "desc", "explanation", "narration"])
            .unwrap_or_default();

        let memory: BTreeMap<String, MemoryValue> = ["memory", "variables", "state"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_object))
            .map(|map| {
                map.iter()
                    .map(|(k, v)| (k.clone(), MemoryValue::from(v)))
                    .collect()
            })
            .unwrap_or_default();

        let structure_kind = string_field(value, &["structure", "structureKind", "structure_kind"])
            .and_then(|s| StructureKind::parse(&s))
            .or_else(|| StructureKind::infer(&memory));

        let highlight = obj.get("highlight").and_then(parse_highlight);

        let line = obj
            .get("line")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok());

        Some(TraceFrame {
            sequence_index: position,
            action,
            description,
            memory,
            structure_kind,
            highlight,
            line,
        })
    }
}

fn parse_highlight(value: &Value) -> Option<Highlight> {
    let highlight = match value {
        Value::Array(items) => Highlight {
            indices: items
                .iter()
                .filter_map(Value::as_u64)
                .map(|n| n as usize)
                .collect(),
            ..Highlight::default()
        },
        Value::Number(n) => Highlight::index(n.as_u64()? as usize),
        Value::Object(obj) => {
            let mut indices: Vec<usize> = obj
                .get("indices")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_u64)
                        .map(|n| n as usize)
                        .collect()
                })
                .unwrap_or_default();
            if let Some(index) = obj.get("index").and_then(Value::as_u64) {
                indices.push(index as usize);
            }

            let keys = obj
                .get("keys")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();

            let pointer = string_field(value, &["pointer"]);

            let moving = string_field(value, &["moving", "element"]).map(|element| MovingElement {
                element,
                from: string_field(value, &["from"]),
                to: string_field(value, &["to"]),
            });

            const KNOWN: &[&str] = &[
                "indices", "index", "keys", "pointer", "moving", "element", "from", "to",
            ];
            let extra = obj
                .iter()
                .filter(|(k, _)| !KNOWN.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            Highlight {
                indices,
                keys,
                pointer,
                moving,
                extra,
            }
        }
        _ => return None,
    };

    if highlight.is_empty() {
        None
    } else {
        Some(highlight)
    }
}

/// First present field among `keys`, rendered as a string.
///
/// Numbers and booleans are stringified so a sloppy oracle still decodes.
pub(crate) fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// Tunables for the recovery ladder
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    /// How many element boundaries truncation repair may back off through
    pub max_backtrack: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_backtrack: DEFAULT_MAX_BACKTRACK,
        }
    }
}

/// Recovers element sequences from raw oracle text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    options: DecodeOptions,
}

impl Decoder {
    pub fn new(options: DecodeOptions) -> Self {
        Self { options }
    }

    pub fn decode_frames(&self, text: &str) -> DecodeOutcome<TraceFrame> {
        self.decode(text)
    }

    /// Run the recovery ladder over `text`, returning on the first success.
    pub fn decode<T: DecodeTarget>(&self, text: &str) -> DecodeOutcome<T> {
        let stripped = strip_code_fences(text);

        let strategies: [(&str, fn(&str) -> Option<Vec<Value>>); 2] = [
            ("direct", parse_direct::<T>),
            ("object span", parse_object_span::<T>),
        ];

        for (name, strategy) in strategies {
            if let Some(elements) = strategy(&stripped) {
                tracing::debug!(strategy = name, elements = elements.len(), "decoded oracle buffer");
                return normalize(&elements);
            }
        }

        // Prose before the array may itself contain brackets, e.g. `arr[i]`.
        for start in array_starts(&stripped) {
            let span = &stripped[start..];
            if let Some(elements) = parse_array_span::<T>(span) {
                tracing::debug!(
                    strategy = "array span",
                    start,
                    elements = elements.len(),
                    "decoded oracle buffer"
                );
                return normalize(&elements);
            }
            if let Some(elements) = repair_truncated_array::<T>(span, self.options.max_backtrack) {
                return normalize(&elements);
            }
        }

        if reports_all_clear(&stripped) {
            tracing::debug!("oracle reported nothing to decode");
            return DecodeOutcome::Empty;
        }

        DecodeOutcome::Failed(format!(
            "no recoverable structure in oracle response ({} bytes)",
            text.len()
        ))
    }
}

fn normalize<T: DecodeTarget>(elements: &[Value]) -> DecodeOutcome<T> {
    let mut items = Vec::with_capacity(elements.len());
    for element in elements {
        if let Some(item) = T::from_element(element, items.len()) {
            items.push(item);
        }
    }

    if items.is_empty() {
        DecodeOutcome::Empty
    } else {
        DecodeOutcome::Decoded(items)
    }
}

/// Drop every line that is a markdown fence marker.
pub fn strip_code_fences(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Strict JSON first, then JSON5 for trailing commas, comments and single quotes.
fn parse_structural(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => Some(value),
        Err(json_err) => match json5::from_str::<Value>(text) {
            Ok(value) => {
                tracing::trace!(error = %json_err, "strict JSON failed, JSON5 succeeded");
                Some(value)
            }
            Err(_) => None,
        },
    }
}

/// Pull the element array out of a parsed value.
fn elements_of<T: DecodeTarget>(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut obj) => T::ARRAY_FIELDS
            .iter()
            .chain(["issues"].iter())
            .find_map(|field| match obj.remove(*field) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            }),
        _ => None,
    }
}

fn parse_direct<T: DecodeTarget>(text: &str) -> Option<Vec<Value>> {
    parse_structural(text).and_then(elements_of::<T>)
}

fn parse_object_span<T: DecodeTarget>(text: &str) -> Option<Vec<Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_direct::<T>(&text[start..=end])
}

/// Candidate array openings: the first `[`, then every later `[` that opens
/// an element list (next non-whitespace is `{` or `]`).
fn array_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    for (offset, _) in text.match_indices('[') {
        let next = text[offset + 1..].trim_start().chars().next();
        if starts.is_empty() || matches!(next, Some('{') | Some(']')) {
            starts.push(offset);
        }
    }
    starts
}

/// `span` starts at an opening `[`.
fn parse_array_span<T: DecodeTarget>(span: &str) -> Option<Vec<Value>> {
    let end = span.rfind(']')?;
    if end == 0 {
        return None;
    }
    parse_direct::<T>(&span[..=end])
}

/// Close a cut-off array after its last complete element and retry, backing
/// off one element at a time. `span` starts at an opening `[`.
fn repair_truncated_array<T: DecodeTarget>(span: &str, max_backtrack: usize) -> Option<Vec<Value>> {
    let boundaries = element_boundaries(span);
    for &cut in boundaries.iter().rev().take(max_backtrack) {
        let candidate = format!("{}]", &span[..=cut]);
        if let Some(elements) = parse_direct::<T>(&candidate) {
            tracing::debug!(
                kept_bytes = cut + 1,
                dropped_bytes = span.len() - cut - 1,
                "repaired truncated oracle array"
            );
            return Some(elements);
        }
    }
    None
}

/// Byte offsets of `}` characters that close a direct child of the array
/// opening at offset 0. Braces inside string literals are ignored.
fn element_boundaries(span: &str) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let mut depth: usize = 0;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in span.char_indices() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                in_string = None;
            }
            continue;
        }

        match ch {
            '"' | '\'' => in_string = Some(ch),
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if ch == '}' && depth == 1 {
                    boundaries.push(offset);
                }
                if depth == 0 {
                    break;
                }
            }
            _ => {}
        }
    }

    boundaries
}

fn reports_all_clear(text: &str) -> bool {
    let lower = text.to_lowercase();
    ALL_CLEAR_PHRASES.iter().any(|phrase| lower.contains(phrase))
}
