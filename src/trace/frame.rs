use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Presentation hint for what a frame does. Not used for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrameAction {
    #[default]
    Init,
    Read,
    Compare,
    Swap,
    Write,
    Branch,
    End,
    Call,
}

impl FrameAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameAction::Init => "INIT",
            FrameAction::Read => "READ",
            FrameAction::Compare => "COMPARE",
            FrameAction::Swap => "SWAP",
            FrameAction::Write => "WRITE",
            FrameAction::Branch => "BRANCH",
            FrameAction::End => "END",
            FrameAction::Call => "CALL",
        }
    }

    /// Parse a tag case-insensitively. Unknown tags yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INIT" => Some(FrameAction::Init),
            "READ" => Some(FrameAction::Read),
            "COMPARE" => Some(FrameAction::Compare),
            "SWAP" => Some(FrameAction::Swap),
            "WRITE" => Some(FrameAction::Write),
            "BRANCH" => Some(FrameAction::Branch),
            "END" => Some(FrameAction::End),
            "CALL" => Some(FrameAction::Call),
            _ => None,
        }
    }
}

impl fmt::Display for FrameAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rendering hint derived from the dominant shape of a frame's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StructureKind {
    Array,
    Tree,
    Graph,
    Variable,
    Object,
    Queue,
    Stack,
    Special,
}

impl StructureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructureKind::Array => "ARRAY",
            StructureKind::Tree => "TREE",
            StructureKind::Graph => "GRAPH",
            StructureKind::Variable => "VARIABLE",
            StructureKind::Object => "OBJECT",
            StructureKind::Queue => "QUEUE",
            StructureKind::Stack => "STACK",
            StructureKind::Special => "SPECIAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ARRAY" | "LIST" => Some(StructureKind::Array),
            "TREE" => Some(StructureKind::Tree),
            "GRAPH" => Some(StructureKind::Graph),
            "VARIABLE" | "VARIABLES" => Some(StructureKind::Variable),
            "OBJECT" | "MAP" | "DICT" => Some(StructureKind::Object),
            "QUEUE" => Some(StructureKind::Queue),
            "STACK" => Some(StructureKind::Stack),
            "SPECIAL" => Some(StructureKind::Special),
            _ => None,
        }
    }

    /// Pick the kind matching the most common value shape in `memory`.
    ///
    /// Lists count towards ARRAY, maps towards OBJECT and everything else
    /// towards VARIABLE. Ties prefer ARRAY, then OBJECT. Empty memory has no
    /// dominant shape.
    pub fn infer(memory: &BTreeMap<String, MemoryValue>) -> Option<Self> {
        if memory.is_empty() {
            return None;
        }

        let (mut lists, mut maps, mut scalars) = (0usize, 0usize, 0usize);
        for value in memory.values() {
            match value {
                MemoryValue::List(_) => lists += 1,
                MemoryValue::Map(_) => maps += 1,
                _ => scalars += 1,
            }
        }

        if lists > 0 && lists >= maps && lists >= scalars {
            Some(StructureKind::Array)
        } else if maps > 0 && maps >= scalars {
            Some(StructureKind::Object)
        } else {
            Some(StructureKind::Variable)
        }
    }
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A value held by a variable in a frame's memory snapshot.
///
/// Lists model arrays, queues and stacks; maps model objects and trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<MemoryValue>),
    Map(BTreeMap<String, MemoryValue>),
}

impl MemoryValue {
    pub fn text(s: impl Into<String>) -> Self {
        MemoryValue::Text(s.into())
    }

    pub fn as_list(&self) -> Option<&[MemoryValue]> {
        match self {
            MemoryValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MemoryValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&Value> for MemoryValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => MemoryValue::Null,
            Value::Bool(b) => MemoryValue::Bool(*b),
            Value::Number(n) => MemoryValue::Number(n.clone()),
            Value::String(s) => MemoryValue::Text(s.clone()),
            Value::Array(items) => MemoryValue::List(items.iter().map(MemoryValue::from).collect()),
            Value::Object(map) => MemoryValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), MemoryValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for MemoryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryValue::Null => write!(f, "null"),
            MemoryValue::Bool(b) => write!(f, "{b}"),
            MemoryValue::Number(n) => write!(f, "{n}"),
            MemoryValue::Text(s) => write!(f, "{s}"),
            MemoryValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            MemoryValue::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// An element being relocated between two labelled positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingElement {
    pub element: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Focus metadata: which indices or keys are under attention in this frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indices: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moving: Option<MovingElement>,
    /// Structure-specific auxiliary fields passed through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Highlight {
    pub fn index(index: usize) -> Self {
        Self {
            indices: vec![index],
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
            && self.keys.is_empty()
            && self.pointer.is_none()
            && self.moving.is_none()
            && self.extra.is_empty()
    }
}

/// One simulated step of program execution.
///
/// Each frame owns its memory snapshot, so mutating one frame can never
/// leak into another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFrame {
    #[serde(rename = "id")]
    pub sequence_index: usize,
    pub action: FrameAction,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub memory: BTreeMap<String, MemoryValue>,
    #[serde(
        rename = "structure",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub structure_kind: Option<StructureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<Highlight>,
    /// Source line the step corresponds to, when the oracle reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl TraceFrame {
    pub fn new(sequence_index: usize, action: FrameAction, description: impl Into<String>) -> Self {
        Self {
            sequence_index,
            action,
            description: description.into(),
            memory: BTreeMap::new(),
            structure_kind: None,
            highlight: None,
            line: None,
        }
    }

    pub fn with_memory(mut self, name: impl Into<String>, value: MemoryValue) -> Self {
        self.memory.insert(name.into(), value);
        self
    }

    pub fn with_structure(mut self, kind: StructureKind) -> Self {
        self.structure_kind = Some(kind);
        self
    }

    pub fn with_highlight(mut self, highlight: Highlight) -> Self {
        self.highlight = Some(highlight);
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Declared structure kind, falling back to the one inferred from memory.
    pub fn effective_structure(&self) -> Option<StructureKind> {
        self.structure_kind
            .or_else(|| StructureKind::infer(&self.memory))
    }
}

/// True when indices run 0, 1, 2, ... without gaps.
pub fn is_contiguous(frames: &[TraceFrame]) -> bool {
    frames
        .iter()
        .enumerate()
        .all(|(position, frame)| frame.sequence_index == position)
}

/// Rewrite indices to match array position. Order is left untouched.
pub fn reindex(frames: &mut [TraceFrame]) {
    for (position, frame) in frames.iter_mut().enumerate() {
        frame.sequence_index = position;
    }
}
