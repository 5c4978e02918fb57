//! YAML parsing with line/column capture.
//!
//! Documents are loaded through the event interface of `yaml-rust2` so every
//! mapping key and sequence item records the marker it started at. All error
//! reporting downstream depends on these positions, so parsing never goes
//! through an API that discards them.

use std::collections::HashMap;
use std::sync::Arc;

use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser, Tag};
use yaml_rust2::scanner::{Marker, TScalarStyle};

use crate::error::ValidationError;
use crate::node::{Mapping, Node, Pos, Sequence};

/// Parse a YAML (or JSON) document into a [`Node`] tree, recording `source`
/// as the filename of every container for error lead-ins.
pub fn parse_document(text: &str, source: &str) -> Result<Node, ValidationError> {
    let filename: Arc<str> = Arc::from(source);
    let mut builder = Builder {
        filename,
        stack: Vec::new(),
        root: None,
        anchors: HashMap::new(),
        error: None,
    };
    let mut parser = Parser::new_from_str(text);
    parser
        .load(&mut builder, false)
        .map_err(|e| ValidationError::new(format!("syntax error: {}", e)))?;
    if let Some(msg) = builder.error {
        return Err(ValidationError::new(msg));
    }
    Ok(builder.root.unwrap_or(Node::Null))
}

enum Frame {
    Sequence {
        seq: Sequence,
        anchor: usize,
    },
    Mapping {
        map: Mapping,
        anchor: usize,
        pending_key: Option<(String, Pos)>,
    },
}

struct Builder {
    filename: Arc<str>,
    stack: Vec<Frame>,
    root: Option<Node>,
    anchors: HashMap<usize, Node>,
    error: Option<String>,
}

impl Builder {
    fn pos(&self, marker: Marker) -> Pos {
        Pos::new(marker.line() as u32, marker.col() as u32 + 1)
    }

    fn insert(&mut self, node: Node, pos: Pos) {
        match self.stack.last_mut() {
            None => {
                if self.root.is_none() {
                    self.root = Some(node);
                }
            }
            Some(Frame::Sequence { seq, .. }) => seq.push_at(node, Some(pos)),
            Some(Frame::Mapping {
                map, pending_key, ..
            }) => match pending_key.take() {
                None => match scalar_key(&node) {
                    Some(key) => *pending_key = Some((key, pos)),
                    None => {
                        self.error.get_or_insert_with(|| {
                            "mapping keys must be scalars".to_string()
                        });
                    }
                },
                Some((key, key_pos)) => map.insert_at(key, node, Some(key_pos)),
            },
        }
    }
}

impl MarkedEventReceiver for Builder {
    fn on_event(&mut self, ev: Event, marker: Marker) {
        let pos = self.pos(marker);
        match ev {
            Event::Scalar(value, style, anchor, tag) => {
                let node = resolve_scalar(value, style, tag.as_ref());
                if anchor != 0 {
                    self.anchors.insert(anchor, node.clone());
                }
                self.insert(node, pos);
            }
            Event::SequenceStart(anchor, _) => {
                let mut seq = Sequence::new();
                seq.filename = Some(Arc::clone(&self.filename));
                seq.pos = Some(pos);
                self.stack.push(Frame::Sequence { seq, anchor });
            }
            Event::SequenceEnd => {
                if let Some(Frame::Sequence { seq, anchor }) = self.stack.pop() {
                    let start = seq.pos.unwrap_or(pos);
                    let node = Node::Sequence(seq);
                    if anchor != 0 {
                        self.anchors.insert(anchor, node.clone());
                    }
                    self.insert(node, start);
                }
            }
            Event::MappingStart(anchor, _) => {
                let mut map = Mapping::new();
                map.filename = Some(Arc::clone(&self.filename));
                map.pos = Some(pos);
                self.stack.push(Frame::Mapping {
                    map,
                    anchor,
                    pending_key: None,
                });
            }
            Event::MappingEnd => {
                if let Some(Frame::Mapping { map, anchor, .. }) = self.stack.pop() {
                    let start = map.pos.unwrap_or(pos);
                    let node = Node::Mapping(map);
                    if anchor != 0 {
                        self.anchors.insert(anchor, node.clone());
                    }
                    self.insert(node, start);
                }
            }
            Event::Alias(anchor) => {
                let node = self.anchors.get(&anchor).cloned().unwrap_or(Node::Null);
                self.insert(node, pos);
            }
            _ => {}
        }
    }
}

fn scalar_key(node: &Node) -> Option<String> {
    match node {
        Node::String(s) => Some(s.clone()),
        Node::Int(i) => Some(i.to_string()),
        Node::Float(f) => Some(f.to_string()),
        Node::Bool(b) => Some(b.to_string()),
        Node::Null => Some("null".to_string()),
        _ => None,
    }
}

fn resolve_scalar(value: String, style: TScalarStyle, tag: Option<&Tag>) -> Node {
    if let Some(tag) = tag {
        if tag.handle == "tag:yaml.org,2002:" {
            return match tag.suffix.as_str() {
                "str" => Node::String(value),
                "null" => Node::Null,
                "bool" => match value.as_str() {
                    "true" | "True" | "TRUE" => Node::Bool(true),
                    _ => Node::Bool(false),
                },
                "int" => value
                    .parse::<i64>()
                    .map(Node::Int)
                    .unwrap_or(Node::String(value)),
                "float" => value
                    .parse::<f64>()
                    .map(Node::Float)
                    .unwrap_or(Node::String(value)),
                _ => Node::String(value),
            };
        }
        return Node::String(value);
    }
    if !matches!(style, TScalarStyle::Plain) {
        return Node::String(value);
    }
    match value.as_str() {
        "" | "~" | "null" | "Null" | "NULL" => Node::Null,
        "true" | "True" | "TRUE" => Node::Bool(true),
        "false" | "False" | "FALSE" => Node::Bool(false),
        _ => {
            if let Ok(i) = value.parse::<i64>() {
                Node::Int(i)
            } else if looks_like_float(&value) {
                match value.parse::<f64>() {
                    Ok(f) => Node::Float(f),
                    Err(_) => Node::String(value),
                }
            } else {
                Node::String(value)
            }
        }
    }
}

// Restrict float coercion to the YAML core-schema shape; bare words like
// "nan" or version strings such as "1e" must stay strings.
fn looks_like_float(s: &str) -> bool {
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+'))
        && body.chars().any(|c| c.is_ascii_digit())
        && body.contains(['.', 'e', 'E'])
}
