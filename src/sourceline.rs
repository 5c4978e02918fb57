//! Source positions for error reporting.
//!
//! A [`SourceRef`] captures the (file, line, column) lead-in of a node, a
//! mapping key, or a sequence item. The free functions reflow and
//! deduplicate rendered error text so deeply nested reports stay readable.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::node::{Mapping, Node, Pos, Sequence};

/// Matches a `file:line:col: ` lead-in at the start of a rendered line.
pub(crate) static LINENO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?:[0-9]+:[0-9]+: )(( *)(.*))").unwrap());

/// A captured source location, possibly unknown.
#[derive(Debug, Clone, Default)]
pub struct SourceRef {
    pub file: Option<Arc<str>>,
    pub start: Option<Pos>,
}

impl SourceRef {
    pub fn none() -> SourceRef {
        SourceRef::default()
    }

    /// Location of the node itself.
    pub fn of(node: &Node) -> SourceRef {
        match node.filename() {
            Some(f) => SourceRef {
                file: Some(Arc::clone(f)),
                start: node.start(),
            },
            None => SourceRef::none(),
        }
    }

    /// Location of a key inside a mapping, falling back to the mapping's own
    /// start when the key has no recorded position.
    pub fn of_key(map: &Mapping, key: &str) -> SourceRef {
        match &map.filename {
            Some(f) => SourceRef {
                file: Some(Arc::clone(f)),
                start: map.key_pos(key).or(map.pos),
            },
            None => SourceRef::none(),
        }
    }

    /// Location of an item inside a sequence.
    pub fn of_item(seq: &Sequence, index: usize) -> SourceRef {
        match &seq.filename {
            Some(f) => SourceRef {
                file: Some(Arc::clone(f)),
                start: seq.item_pos(index).or(seq.pos),
            },
            None => SourceRef::none(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.file.is_some()
    }

    /// `file:line:col:` lead-in, or the empty string when unknown.
    pub fn lead(&self) -> String {
        match (&self.file, self.start) {
            (Some(f), Some(p)) => format!("{}:{}:{}:", f, p.line, p.col),
            (Some(f), None) => format!("{}:::", f),
            _ => String::new(),
        }
    }
}

/// Strip a `file://` prefix and make the path relative to the working
/// directory where possible, for compact error lead-ins.
pub fn relname(source: &str) -> String {
    if let Some(path) = source.strip_prefix("file://") {
        if let Ok(cwd) = std::env::current_dir() {
            if let Ok(rel) = std::path::Path::new(path).strip_prefix(&cwd) {
                return rel.display().to_string();
            }
        }
        return path.to_string();
    }
    source.to_string()
}

/// Reflow every line of a rendered report to a column budget, keeping the
/// `file:line:col:` lead-ins aligned. The budget defaults to the `COLUMNS`
/// environment variable, else 100.
pub fn reflow_all(text: &str, maxline: Option<usize>) -> String {
    let maxline = maxline.unwrap_or_else(|| {
        std::env::var("COLUMNS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100)
    });
    let mut maxno = 0;
    for line in text.lines() {
        if let Some(g) = LINENO_RE.captures(line) {
            maxno = maxno.max(g.get(1).unwrap().as_str().len());
        }
    }
    let maxno_text = maxline.saturating_sub(maxno);
    let mut msg = Vec::new();
    for line in text.lines() {
        match LINENO_RE.captures(line) {
            None => msg.push(line.to_string()),
            Some(g) => {
                let pre = g.get(1).unwrap().as_str();
                let body = g.get(2).unwrap().as_str();
                let shift = g.get(3).unwrap().as_str();
                for reflowed in reflow(body, maxno_text, shift).lines() {
                    msg.push(format!("{:<width$}{}", pre, reflowed, width = maxno));
                }
            }
        }
    }
    msg.join("\n")
}

/// Break a long line at word boundaries, indenting continuations by `shift`.
pub fn reflow(text: &str, maxline: usize, shift: &str) -> String {
    let maxline = maxline.max(20);
    if text.len() > maxline {
        let mut cut = maxline.min(text.len());
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let sp = match text[..cut].rfind(' ') {
            Some(i) if i >= 1 => i,
            _ => match text.char_indices().skip(1).find(|&(_, c)| c == ' ') {
                Some((i, _)) => i,
                None => text.len(),
            },
        };
        if sp < text.len() {
            return format!(
                "{}\n{}{}",
                &text[..sp],
                shift,
                reflow(&text[sp + 1..], maxline, shift)
            );
        }
    }
    text.to_string()
}

/// Blank out consecutive duplicate `file:line:col:` lead-ins, like `uniq`.
pub fn strip_duplicated_lineno(text: &str) -> String {
    let mut pre: Option<String> = None;
    let mut msg = Vec::new();
    for line in text.lines() {
        match LINENO_RE.captures(line) {
            None => msg.push(line.to_string()),
            Some(g) => {
                let lead = g.get(1).unwrap().as_str();
                if pre.as_deref() != Some(lead) {
                    msg.push(line.to_string());
                    pre = Some(lead.to_string());
                } else {
                    msg.push(format!(
                        "{}{}",
                        " ".repeat(lead.len()),
                        g.get(2).unwrap().as_str()
                    ));
                }
            }
        }
    }
    msg.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lead_format() {
        let mut m = Mapping::new();
        m.filename = Some(Arc::from("wf.yml"));
        m.insert_at("steps", Node::Null, Some(Pos::new(4, 3)));
        let sr = SourceRef::of_key(&m, "steps");
        assert_eq!(sr.lead(), "wf.yml:4:3:");
    }

    #[test]
    fn test_key_falls_back_to_mapping_start() {
        let mut m = Mapping::new();
        m.filename = Some(Arc::from("wf.yml"));
        m.pos = Some(Pos::new(2, 1));
        m.insert("steps", Node::Null);
        let sr = SourceRef::of_key(&m, "steps");
        assert_eq!(sr.start, Some(Pos::new(2, 1)));
    }

    #[test]
    fn test_strip_duplicated_lineno() {
        let text = "a.yml:1:1: first\na.yml:1:1: second\nb.yml:2:2: third";
        let out = strip_duplicated_lineno(text);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "a.yml:1:1: first");
        assert_eq!(lines[1], "           second");
        assert_eq!(lines[2], "b.yml:2:2: third");
    }

    #[test]
    fn test_reflow_breaks_at_words() {
        let out = reflow("one two three four five six", 20, "  ");
        for line in out.lines() {
            assert!(line.len() <= 22);
            assert!(!line.contains("thre e"));
        }
        assert!(out.contains('\n'));
    }

    #[test]
    fn test_reflow_short_line_unchanged() {
        assert_eq!(reflow("short", 80, ""), "short");
    }
}
