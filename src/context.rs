//! Vocabulary context: the active mapping from short field and type names to
//! full URIs, plus the per-field behavioral flags the resolver consults on
//! every traversal step.
//!
//! A [`Context`] is built once from a [`ContextSpec`] and never mutated;
//! encountering a `$namespaces` section produces a replacement value via
//! [`Context::with_namespaces`].

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::Deserialize;

/// Descriptor form of a vocabulary term.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TermInfo {
    #[serde(rename = "@id")]
    pub id: Option<String>,
    /// `"@id"` marks a link field, `"@vocab"` a vocabulary-term field.
    #[serde(rename = "@type")]
    pub term_type: Option<String>,
    /// Scope depth for relative reference resolution.
    #[serde(rename = "refScope")]
    pub ref_scope: Option<u32>,
    #[serde(rename = "typeDSL", default)]
    pub type_dsl: bool,
    #[serde(rename = "secondaryFilesDSL", default)]
    pub secondary_files_dsl: bool,
    #[serde(rename = "mapSubject")]
    pub map_subject: Option<String>,
    #[serde(rename = "mapPredicate")]
    pub map_predicate: Option<String>,
    /// Array values of this field are themselves identifiers.
    #[serde(default)]
    pub identity: bool,
    #[serde(rename = "noLinkCheck", default)]
    pub no_link_check: bool,
    pub subscope: Option<String>,
}

/// A vocabulary entry: either a plain URI alias or a full descriptor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TermDef {
    Uri(String),
    Detailed(TermInfo),
}

impl From<&str> for TermDef {
    fn from(s: &str) -> TermDef {
        TermDef::Uri(s.to_string())
    }
}

impl From<String> for TermDef {
    fn from(s: String) -> TermDef {
        TermDef::Uri(s)
    }
}

impl From<TermInfo> for TermDef {
    fn from(info: TermInfo) -> TermDef {
        TermDef::Detailed(info)
    }
}

/// The raw vocabulary mapping a [`Context`] is derived from.
pub type ContextSpec = IndexMap<String, TermDef>;

/// Derived field-classification sets. See the crate docs for how each set
/// steers resolution.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub vocab: IndexMap<String, String>,
    pub rvocab: HashMap<String, String>,
    /// Fields whose value is the `@id` of the enclosing object, sorted.
    pub identifiers: Vec<String>,
    pub identity_links: HashSet<String>,
    pub url_fields: HashSet<String>,
    pub vocab_fields: HashSet<String>,
    pub scoped_ref_fields: HashMap<String, u32>,
    pub type_dsl_fields: HashSet<String>,
    pub secondary_file_dsl_fields: HashSet<String>,
    /// Field name to the subject key injected during id-map normalization.
    pub idmap: HashMap<String, String>,
    pub map_predicate: HashMap<String, String>,
    pub nolinkcheck: HashSet<String>,
    pub subscopes: HashMap<String, String>,
}

impl Context {
    /// Single classification pass over the vocabulary, then the reverse map.
    /// The reverse map is built second because expanding a vocabulary value
    /// can depend on other entries already being registered.
    pub fn build(spec: &ContextSpec) -> Context {
        let mut ctx = Context::default();
        ctx.url_fields.insert("$schemas".to_string());

        for (key, value) in spec {
            match value {
                TermDef::Uri(v) => {
                    if v == "@id" {
                        ctx.identifiers.push(key.clone());
                        ctx.identity_links.insert(key.clone());
                    }
                    ctx.vocab.insert(key.clone(), v.clone());
                }
                TermDef::Detailed(info) => {
                    match info.term_type.as_deref() {
                        Some("@id") => {
                            ctx.url_fields.insert(key.clone());
                            if let Some(depth) = info.ref_scope {
                                ctx.scoped_ref_fields.insert(key.clone(), depth);
                            }
                            if info.identity {
                                ctx.identity_links.insert(key.clone());
                            }
                        }
                        Some("@vocab") => {
                            ctx.url_fields.insert(key.clone());
                            ctx.vocab_fields.insert(key.clone());
                            if let Some(depth) = info.ref_scope {
                                ctx.scoped_ref_fields.insert(key.clone(), depth);
                            }
                            if info.type_dsl {
                                ctx.type_dsl_fields.insert(key.clone());
                            }
                        }
                        _ => {}
                    }
                    if info.secondary_files_dsl {
                        ctx.secondary_file_dsl_fields.insert(key.clone());
                    }
                    if info.no_link_check {
                        ctx.nolinkcheck.insert(key.clone());
                    }
                    if let Some(subject) = &info.map_subject {
                        ctx.idmap.insert(key.clone(), subject.clone());
                    }
                    if let Some(predicate) = &info.map_predicate {
                        ctx.map_predicate.insert(key.clone(), predicate.clone());
                    }
                    if let Some(id) = &info.id {
                        ctx.vocab.insert(key.clone(), id.clone());
                    }
                    if let Some(sub) = &info.subscope {
                        ctx.subscopes.insert(key.clone(), sub.clone());
                    }
                }
            }
        }

        let entries: Vec<(String, String)> = ctx
            .vocab
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in entries {
            let expanded = expand_vocab_value(&ctx.vocab, &value);
            ctx.rvocab.insert(expanded, key);
        }

        ctx.identifiers.sort();
        ctx
    }

    /// A replacement context with additional namespace prefixes merged into
    /// the vocabulary.
    pub fn with_namespaces(&self, namespaces: &IndexMap<String, String>) -> Context {
        let mut ctx = self.clone();
        for (prefix, uri) in namespaces {
            ctx.vocab.insert(prefix.clone(), uri.clone());
        }
        ctx
    }

    pub fn is_empty(&self) -> bool {
        self.vocab.is_empty()
    }
}

/// Identity expansion of a vocabulary value: namespace-prefix substitution
/// only, no base-URL joining.
fn expand_vocab_value(vocab: &IndexMap<String, String>, value: &str) -> String {
    if value == "@id" || value == "@type" || value.starts_with("_:") {
        return value.to_string();
    }
    if let Some((prefix, rest)) = value.split_once(':') {
        if let Some(full) = vocab.get(prefix) {
            return format!("{}{}", full, rest);
        }
    }
    value.to_string()
}
