//! Document node model
//!
//! Parsed YAML/JSON documents are held as a tree of [`Node`] values. Mappings
//! and sequences preserve insertion order and carry provenance: the source
//! file they came from and the starting line/column of each key or item.
//! Provenance is inherited from parent to child only where the child has
//! none; it is never overwritten.

use std::sync::Arc;

use indexmap::IndexMap;

/// A 1-based line/column position in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

/// A dynamically-typed document tree value.
#[derive(Debug, Clone)]
pub enum Node {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Mapping(Mapping),
    Sequence(Sequence),
}

/// An ordered string-keyed mapping with per-key source positions.
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    entries: IndexMap<String, Node>,
    key_pos: IndexMap<String, Pos>,
    pub filename: Option<Arc<str>>,
    pub pos: Option<Pos>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        self.entries.get_mut(key)
    }

    /// Value of `key` if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Node::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Node) -> Option<Node> {
        self.entries.insert(key.into(), value)
    }

    /// Insert a key along with the source position of the key itself.
    pub fn insert_at(&mut self, key: impl Into<String>, value: Node, pos: Option<Pos>) {
        let key = key.into();
        if let Some(p) = pos {
            self.key_pos.insert(key.clone(), p);
        }
        self.entries.insert(key, value);
    }

    /// Remove a key, keeping the relative order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<Node> {
        self.key_pos.shift_remove(key);
        self.entries.shift_remove(key)
    }

    pub fn key_pos(&self, key: &str) -> Option<Pos> {
        self.key_pos.get(key).copied()
    }

    pub fn set_key_pos(&mut self, key: impl Into<String>, pos: Pos) {
        self.key_pos.insert(key.into(), pos);
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Node)> {
        self.entries.iter_mut()
    }

    /// Rename a key in place, carrying over its recorded position. The
    /// renamed entry moves to the end, matching remove-and-reinsert order.
    pub fn rename_key(&mut self, old: &str, new: &str) {
        if let Some(value) = self.entries.shift_remove(old) {
            let pos = self.key_pos.shift_remove(old);
            self.entries.insert(new.to_string(), value);
            if let Some(p) = pos {
                self.key_pos.insert(new.to_string(), p);
            }
        }
    }

    /// A copy of this mapping with one key filtered out, provenance intact.
    pub fn without_key(&self, key: &str) -> Mapping {
        let mut out = self.clone();
        out.remove(key);
        out
    }
}

/// An ordered sequence with per-item source positions.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    items: Vec<Node>,
    item_pos: Vec<Option<Pos>>,
    pub filename: Option<Arc<str>>,
    pub pos: Option<Pos>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Node> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.items.get_mut(index)
    }

    pub fn push(&mut self, value: Node) {
        self.items.push(value);
        self.item_pos.push(None);
    }

    pub fn push_at(&mut self, value: Node, pos: Option<Pos>) {
        self.items.push(value);
        self.item_pos.push(pos);
    }

    pub fn set(&mut self, index: usize, value: Node) {
        self.items[index] = value;
    }

    pub fn item_pos(&self, index: usize) -> Option<Pos> {
        self.item_pos.get(index).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.items.iter_mut()
    }

    /// Replace the item at `index` with zero or more items, all stamped with
    /// the position of the element they replace. Used when an imported
    /// sequence is spliced into its parent.
    pub fn splice(&mut self, index: usize, replacement: Vec<Node>) {
        let pos = self.item_pos.get(index).copied().flatten();
        let n = replacement.len();
        self.items.splice(index..index + 1, replacement);
        self.item_pos.splice(index..index + 1, std::iter::repeat(pos).take(n));
    }
}

impl Node {
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "boolean",
            Node::Int(_) => "int",
            Node::Float(_) => "float",
            Node::String(_) => "string",
            Node::Mapping(_) => "mapping",
            Node::Sequence(_) => "sequence",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Sequence> {
        match self {
            Node::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence_mut(&mut self) -> Option<&mut Sequence> {
        match self {
            Node::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// The source file this node was parsed from, if known.
    pub fn filename(&self) -> Option<&Arc<str>> {
        match self {
            Node::Mapping(m) => m.filename.as_ref(),
            Node::Sequence(s) => s.filename.as_ref(),
            _ => None,
        }
    }

    /// The starting position of this node, if known.
    pub fn start(&self) -> Option<Pos> {
        match self {
            Node::Mapping(m) => m.pos,
            Node::Sequence(s) => s.pos,
            _ => None,
        }
    }

    /// Attach `filename` to this node and its descendants wherever a node
    /// does not already carry one.
    pub fn set_filename(&mut self, filename: &Arc<str>) {
        match self {
            Node::Mapping(m) => {
                if m.filename.is_none() {
                    m.filename = Some(Arc::clone(filename));
                }
                for (_, v) in m.iter_mut() {
                    v.set_filename(filename);
                }
            }
            Node::Sequence(s) => {
                if s.filename.is_none() {
                    s.filename = Some(Arc::clone(filename));
                }
                for v in s.iter_mut() {
                    v.set_filename(filename);
                }
            }
            _ => {}
        }
    }

    /// Convert to a plain JSON value, discarding provenance.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Node::Null => serde_json::Value::Null,
            Node::Bool(b) => serde_json::Value::Bool(*b),
            Node::Int(i) => serde_json::Value::from(*i),
            Node::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Node::String(s) => serde_json::Value::String(s.clone()),
            Node::Mapping(m) => {
                let mut out = serde_json::Map::new();
                for (k, v) in m.iter() {
                    out.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(out)
            }
            Node::Sequence(s) => {
                serde_json::Value::Array(s.iter().map(Node::to_json).collect())
            }
        }
    }

    /// Build a node from a plain JSON value. The result carries no
    /// provenance.
    pub fn from_json(value: &serde_json::Value) -> Node {
        match value {
            serde_json::Value::Null => Node::Null,
            serde_json::Value::Bool(b) => Node::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Node::Int(i)
                } else {
                    Node::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Node::String(s.clone()),
            serde_json::Value::Object(o) => {
                let mut m = Mapping::new();
                for (k, v) in o {
                    m.insert(k.clone(), Node::from_json(v));
                }
                Node::Mapping(m)
            }
            serde_json::Value::Array(a) => {
                let mut s = Sequence::new();
                for v in a {
                    s.push(Node::from_json(v));
                }
                Node::Sequence(s)
            }
        }
    }

    /// Compact single-line rendering for error messages, truncated so a bad
    /// value never floods the report.
    pub fn preview(&self) -> String {
        let mut s = self.to_json().to_string();
        if s.len() > 160 {
            s.truncate(160);
            s.push_str("[...]");
        }
        s
    }
}

/// Wrap a single node in a one-element list; sequence items come back
/// unchanged.
pub fn aslist(node: &Node) -> Vec<Node> {
    match node {
        Node::Sequence(s) => s.iter().cloned().collect(),
        other => vec![other.clone()],
    }
}

// Equality compares values only; provenance never participates.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Null, Node::Null) => true,
            (Node::Bool(a), Node::Bool(b)) => a == b,
            (Node::Int(a), Node::Int(b)) => a == b,
            (Node::Float(a), Node::Float(b)) => a == b,
            (Node::String(a), Node::String(b)) => a == b,
            (Node::Mapping(a), Node::Mapping(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).map_or(false, |w| v == w))
            }
            (Node::Sequence(a), Node::Sequence(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(v, w)| v == w)
            }
            _ => false,
        }
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::String(s.to_string())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::String(s)
    }
}
