//! Error types for schema loading and validation.
//!
//! Validation failures form a tree: each level of the resolver wraps the
//! errors of its children with its own field/position context, so the full
//! causal chain stays visible. Fetch failures are a flat enum and get folded
//! into the tree at the source line of the directive that triggered them.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::node::Pos;
use crate::sourceline::{reflow_all, strip_duplicated_lineno, SourceRef};

/// Result type for resolution and validation operations.
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Resource retrieval errors, raised by [`crate::fetcher::Fetcher`]
/// implementations.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("error fetching {url}: {reason}")]
    Http { url: String, reason: String },

    #[error("error reading {url}: {reason}")]
    Io { url: String, reason: String },

    #[error("unsupported scheme in url: {0}")]
    UnsupportedScheme(String),

    #[error("not resolving potential remote exploit {url} from base {base}")]
    RemoteExploit { url: String, base: String },
}

/// Broad classification of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The schema definition itself is malformed.
    Schema,
    /// A document does not conform to its schema, or a reference is broken.
    Validation,
    /// The object matched its `class` discriminator but failed on other
    /// fields; preferred over unrelated union alternatives when reporting.
    ClassValidation,
}

/// A hierarchical validation error with source provenance.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<Arc<str>>,
    pub start: Option<Pos>,
    pub bullet: String,
    pub is_warning: bool,
    pub children: Vec<ValidationError>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> ValidationError {
        ValidationError {
            kind: ErrorKind::Validation,
            message: message.into(),
            file: None,
            start: None,
            bullet: String::new(),
            is_warning: false,
            children: Vec::new(),
        }
    }

    /// An error in the schema definition itself.
    pub fn schema(message: impl Into<String>) -> ValidationError {
        ValidationError {
            kind: ErrorKind::Schema,
            ..ValidationError::new(message)
        }
    }

    /// An error anchored at a source location.
    pub fn at(sr: &SourceRef, message: impl Into<String>) -> ValidationError {
        ValidationError::new(message).with_source(sr)
    }

    /// Wrap child errors with a parent message. Children with an empty
    /// message are replaced by their own children; a single child collapses
    /// transparently; two or more children each receive
    /// `bullet_for_children`.
    pub fn wrap(
        message: impl Into<String>,
        sr: Option<&SourceRef>,
        children: Vec<ValidationError>,
        bullet_for_children: &str,
    ) -> ValidationError {
        let mut err = ValidationError::new(message);
        err.children = if children.len() <= 1 {
            children.into_iter().flat_map(simplify).collect()
        } else {
            children
                .into_iter()
                .flat_map(|mut c| {
                    if c.bullet.is_empty() {
                        c.bullet = bullet_for_children.to_string();
                    }
                    simplify(c)
                })
                .collect()
        };
        if let Some(sr) = sr {
            err = err.with_source(sr);
        }
        err.propagate_source();
        err
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> ValidationError {
        self.kind = kind;
        self
    }

    /// Attach a source location, replacing any present.
    pub fn with_source(mut self, sr: &SourceRef) -> ValidationError {
        if sr.is_known() {
            self.file = sr.file.clone();
            self.start = sr.start;
        } else {
            self.file = None;
            self.start = None;
        }
        self.propagate_source();
        self
    }

    /// Attach a source location only if this error has none.
    pub fn or_source(self, sr: &SourceRef) -> ValidationError {
        if self.file.is_none() && sr.is_known() {
            self.with_source(sr)
        } else {
            self
        }
    }

    /// Children without their own location inherit this error's,
    /// transitively.
    fn propagate_source(&mut self) {
        if self.file.is_none() {
            return;
        }
        for c in &mut self.children {
            if c.file.is_none() {
                c.file = self.file.clone();
                c.start = self.start;
                c.propagate_source();
            }
        }
    }

    /// Mark this error and all its children as warnings.
    pub fn into_warning(mut self) -> ValidationError {
        self.is_warning = true;
        self.children = self
            .children
            .into_iter()
            .map(ValidationError::into_warning)
            .collect();
        self
    }

    pub fn is_class_validation(&self) -> bool {
        self.kind == ErrorKind::ClassValidation
    }

    /// All leaf errors, depth-first.
    pub fn leaves(&self) -> Vec<&ValidationError> {
        if !self.children.is_empty() {
            return self.children.iter().flat_map(|c| c.leaves()).collect();
        }
        if !self.message.is_empty() {
            return vec![self];
        }
        Vec::new()
    }

    fn prefix(&self) -> String {
        let mut pre = String::new();
        if let Some(f) = &self.file {
            let (l, c) = match self.start {
                Some(p) => (p.line.to_string(), p.col.to_string()),
                None => (String::new(), String::new()),
            };
            pre = format!("{}:{}:{}: ", f, l, c);
        }
        if self.is_warning {
            pre.push_str("Warning: ");
        }
        pre
    }

    fn summary(&self, level: usize, with_bullet: bool) -> String {
        let spaces = " ".repeat(level * 2);
        let bullet = if !self.bullet.is_empty() && with_bullet {
            format!("{} ", self.bullet)
        } else {
            String::new()
        };
        format!("{}{}{}{}", self.prefix(), spaces, bullet, self.message)
    }

    fn render(&self, level: usize) -> String {
        let has_message = !self.message.is_empty();
        let mut lines = Vec::new();
        if has_message {
            lines.push(self.summary(level, true));
        }
        let next_level = if has_message { level + 1 } else { level };
        for c in &self.children {
            lines.push(c.render(next_level));
        }
        lines.join("\n")
    }

    /// Full indented tree rendering with deduplicated `file:line:col:`
    /// lead-ins, reflowed to the terminal-width budget.
    pub fn pretty(&self) -> String {
        strip_duplicated_lineno(&reflow_all(&self.render(0), None))
    }

    /// One line per leaf error.
    pub fn one_line(&self) -> String {
        self.leaves()
            .iter()
            .map(|c| c.summary(0, false))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn simplify(err: ValidationError) -> Vec<ValidationError> {
    if !err.message.is_empty() {
        vec![err]
    } else {
        err.children
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty())
    }
}

impl std::error::Error for ValidationError {}

impl From<FetchError> for ValidationError {
    fn from(err: FetchError) -> ValidationError {
        ValidationError::new(err.to_string())
    }
}
