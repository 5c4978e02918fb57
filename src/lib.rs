//! Schema definition and document-processing toolkit.
//!
//! Schemas are written in a JSON/YAML-based modeling language; this crate
//! resolves cross-document references, expands vocabulary terms to full
//! URIs, applies type inheritance and specialization, and validates concrete
//! documents against the resulting schema.
//!
//! The core is the reference resolution engine: [`resolver::Loader`] walks a
//! parsed document rewriting identifiers and links (`$import`, `$include`,
//! `$mixin`, namespace prefixes, scoped identifiers, type DSL shorthand)
//! while maintaining an index of resolved objects by URI and producing
//! source-line-accurate error trees.
//!
//! ## Pipeline
//!
//! ```text
//! raw text -> parse -> Loader (Context + Fetcher) -> resolved doc + index
//!          -> specialize (extends/specialize) -> Names -> validate
//! ```
//!
//! The high-level entry points are [`compiler::load_schema`] and
//! [`compiler::load_and_validate`].

pub mod compiler;
pub mod context;
pub mod error;
pub mod fetcher;
pub mod node;
pub mod parse;
pub mod resolver;
pub mod schema;
pub mod sourceline;
pub mod specialize;
pub mod uri;
pub mod validate;

pub use compiler::{base_context, load_and_validate, load_schema, SchemaDocument};
pub use context::{Context, ContextSpec, TermDef, TermInfo};
pub use error::{ErrorKind, FetchError, Result, ValidationError};
pub use fetcher::{DefaultFetcher, Fetcher};
pub use node::{Mapping, Node, Pos, Sequence};
pub use parse::parse_document;
pub use resolver::Loader;
pub use schema::{Names, NamedSchema, Schema};
pub use sourceline::SourceRef;
pub use validate::validate_document;
