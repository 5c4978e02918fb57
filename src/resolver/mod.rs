//! Reference resolution engine.
//!
//! A [`Loader`] owns one resolution [`Session`] (the URI index, the fetcher,
//! and the foreign-property sets) plus one [`Context`]. Resolution is
//! single-threaded depth-first descent; the session is threaded by `&mut`
//! through every recursive call rather than living in ambient state. A
//! sub-document that declares its own `$namespaces`/`$schemas` gets a
//! replacement context scoped to that subtree while sharing the session.

mod links;
mod walk;

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::context::{Context, ContextSpec};
use crate::error::{Result, ValidationError};
use crate::fetcher::{file_uri, DefaultFetcher, Fetcher};
use crate::node::{aslist, Mapping, Node};
use crate::parse::parse_document;
use crate::sourceline::{relname, SourceRef};
use crate::uri::{urldefrag, UriSplit};

pub(crate) use walk::resolve_all;

/// Shared state of one resolution session: the index of resolved objects by
/// URI, the fetcher, and the property sets gathered from `$schemas`.
pub struct Session {
    pub(crate) idx: IndexMap<String, Node>,
    pub(crate) fetcher: Box<dyn Fetcher>,
    pub(crate) foreign_properties: HashSet<String>,
    pub(crate) extra_url_fields: HashSet<String>,
    pub(crate) skip_schemas: bool,
    pub(crate) fail_on_duplicate_ids: bool,
}

/// Resolves identifiers, references, and links in parsed documents.
pub struct Loader {
    pub(crate) session: Session,
    pub(crate) context: Context,
}

impl Loader {
    /// A loader over the given vocabulary, using the default fetcher.
    pub fn new(spec: &ContextSpec) -> Result<Loader> {
        Loader::with_fetcher(spec, Box::new(DefaultFetcher::new()))
    }

    pub fn with_fetcher(spec: &ContextSpec, fetcher: Box<dyn Fetcher>) -> Result<Loader> {
        let mut loader = Loader {
            session: Session {
                idx: IndexMap::new(),
                fetcher,
                foreign_properties: HashSet::new(),
                extra_url_fields: HashSet::new(),
                skip_schemas: false,
                fail_on_duplicate_ids: false,
            },
            context: Context::default(),
        };
        loader.add_context(spec)?;
        Ok(loader)
    }

    /// Install the vocabulary. Refusing to refresh a non-empty context keeps
    /// vocabulary precedence deterministic; build a new loader instead.
    pub fn add_context(&mut self, spec: &ContextSpec) -> Result<()> {
        if !self.context.is_empty() {
            return Err(ValidationError::new(
                "refreshing context that already has stuff in it",
            ));
        }
        self.context = Context::build(spec);
        Ok(())
    }

    /// Skip fetching `$schemas` extension vocabularies.
    pub fn set_skip_schemas(&mut self, skip: bool) {
        self.session.skip_schemas = skip;
    }

    /// Treat conflicting identifier redefinitions as errors instead of
    /// warnings.
    pub fn set_fail_on_duplicate_ids(&mut self, fail: bool) {
        self.session.fail_on_duplicate_ids = fail;
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The index of resolved objects by URI.
    pub fn index(&self) -> &IndexMap<String, Node> {
        &self.session.idx
    }

    pub fn foreign_properties(&self) -> &HashSet<String> {
        &self.session.foreign_properties
    }

    pub fn fetcher_mut(&mut self) -> &mut dyn Fetcher {
        self.session.fetcher.as_mut()
    }

    pub fn expand_url(
        &self,
        url: &str,
        base_url: &str,
        scoped_id: bool,
        vocab_term: bool,
        scoped_ref: Option<u32>,
    ) -> Result<String> {
        expand_url(
            &self.context,
            self.session.fetcher.as_ref(),
            url,
            base_url,
            scoped_id,
            vocab_term,
            scoped_ref,
        )
    }

    /// Resolve a reference node (`$import`/`$include`/`$mixin` directive,
    /// bare identifier mapping, or string URI). Returns the resolved
    /// document and its file-level metadata.
    pub fn resolve_ref(
        &mut self,
        reference: &Node,
        base_url: Option<&str>,
        checklinks: bool,
        strict_foreign_properties: bool,
    ) -> Result<(Node, Mapping)> {
        let base = match base_url {
            Some(b) if !b.is_empty() => b.to_string(),
            _ => default_base(),
        };
        resolve_ref(
            &mut self.session,
            &self.context,
            reference,
            &base,
            checklinks,
            strict_foreign_properties,
        )
    }

    /// Resolve a string reference with default settings.
    pub fn resolve(&mut self, reference: &str) -> Result<(Node, Mapping)> {
        self.resolve_ref(&Node::String(reference.to_string()), None, true, false)
    }

    /// Run the full resolution pipeline over an in-memory document.
    pub fn resolve_all(
        &mut self,
        document: Node,
        base_url: &str,
        checklinks: bool,
        strict_foreign_properties: bool,
    ) -> Result<(Node, Mapping)> {
        resolve_all(
            &mut self.session,
            &self.context,
            document,
            base_url,
            base_url,
            checklinks,
            strict_foreign_properties,
        )
    }

    /// Fetch and parse a document, memoized in the index.
    pub fn fetch(&mut self, url: &str, inject_ids: bool) -> Result<Node> {
        fetch(&mut self.session, &self.context, url, inject_ids)
    }
}

fn default_base() -> String {
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "/".to_string());
    format!("{}/", file_uri(&cwd))
}

/// Expand a URL against the vocabulary and base. Deterministic, no I/O.
///
/// Rules in priority order: `@id`/`@type` and blank nodes pass through; a
/// known vocabulary term short-circuits; a known namespace prefix is
/// substituted; absolute schemes and `$(`/`${` parameter expressions pass
/// through; scoped identifiers nest under the base's fragment; scoped
/// references defer to link validation; everything else joins the base.
/// Vocabulary-term results collapse back to their short form.
pub(crate) fn expand_url(
    ctx: &Context,
    fetcher: &dyn Fetcher,
    url: &str,
    base_url: &str,
    scoped_id: bool,
    vocab_term: bool,
    scoped_ref: Option<u32>,
) -> Result<String> {
    if url == "@id" || url == "@type" || url.starts_with("_:") {
        return Ok(url.to_string());
    }
    if vocab_term && ctx.vocab.contains_key(url) {
        return Ok(url.to_string());
    }

    let mut url = url.to_string();
    if !ctx.vocab.is_empty() && url.contains(':') {
        let prefix = url.split(':').next().unwrap_or("").to_string();
        if let Some(full) = ctx.vocab.get(&prefix) {
            url = format!("{}{}", full, &url[prefix.len() + 1..]);
        } else if !fetcher.supported_schemes().iter().any(|s| *s == prefix) {
            tracing::warn!(
                "URI prefix '{}' of '{}' not recognized, are you missing a $namespaces section?",
                prefix,
                url
            );
        }
    }

    let split = UriSplit::parse(&url);
    if matches!(split.scheme.as_str(), "http" | "https" | "file")
        || url.starts_with("$(")
        || url.starts_with("${")
    {
        // already absolute, or a deferred parameter expression
    } else if scoped_id && split.fragment.is_empty() {
        let base = UriSplit::parse(base_url);
        let fragment = if base.fragment.is_empty() {
            split.path.clone()
        } else {
            format!("{}/{}", base.fragment, split.path)
        };
        let path = if base.path.is_empty() {
            "/".to_string()
        } else {
            base.path.clone()
        };
        url = UriSplit {
            scheme: base.scheme,
            netloc: base.netloc,
            path,
            query: base.query,
            fragment,
        }
        .unsplit();
    } else if scoped_ref.is_some() && split.fragment.is_empty() {
        // left relative; scoped references resolve during link validation
    } else {
        url = fetcher.urljoin(base_url, &url)?;
    }

    if vocab_term {
        if let Some(term) = ctx.rvocab.get(&url) {
            return Ok(term.clone());
        }
    }
    Ok(url)
}

fn directive_string(m: &Mapping, key: &str) -> Result<String> {
    m.get(key)
        .and_then(Node::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ValidationError::at(
                &SourceRef::of_key(m, key),
                format!("'{}' must be a string reference", key),
            )
        })
}

/// Resolve `$import`, `$include`, `$mixin`, and bare identifier lookups.
pub(crate) fn resolve_ref(
    session: &mut Session,
    ctx: &Context,
    reference: &Node,
    base_url: &str,
    checklinks: bool,
    strict_fp: bool,
) -> Result<(Node, Mapping)> {
    let mut obj: Option<Mapping> = None;
    let mut inc = false;
    let mut mixin: Option<Mapping> = None;
    let mut sl = SourceRef::none();

    let lref: String = match reference {
        Node::Mapping(m) => {
            if m.contains_key("$import") {
                sl = SourceRef::of_key(m, "$import");
                if m.len() != 1 {
                    return Err(ValidationError::at(
                        &sl,
                        format!(
                            "'$import' must be the only field in {}",
                            reference.preview()
                        ),
                    ));
                }
                directive_string(m, "$import")?
            } else if m.contains_key("$include") {
                sl = SourceRef::of_key(m, "$include");
                if m.len() != 1 {
                    return Err(ValidationError::at(
                        &sl,
                        format!(
                            "'$include' must be the only field in {}",
                            reference.preview()
                        ),
                    ));
                }
                inc = true;
                directive_string(m, "$include")?
            } else if m.contains_key("$mixin") {
                sl = SourceRef::of_key(m, "$mixin");
                mixin = Some(m.clone());
                directive_string(m, "$mixin")?
            } else {
                let mut found = None;
                for identifier in &ctx.identifiers {
                    if let Some(v) = m.get(identifier) {
                        let s = v.as_str().ok_or_else(|| {
                            ValidationError::at(
                                &SourceRef::of_key(m, identifier),
                                format!("identifier field '{}' must be a string", identifier),
                            )
                        })?;
                        found = Some(s.to_string());
                        break;
                    }
                }
                match found {
                    Some(r) => {
                        sl = SourceRef::of(reference);
                        obj = Some(m.clone());
                        r
                    }
                    None => {
                        return Err(ValidationError::at(
                            &SourceRef::of(reference),
                            format!(
                                "object {} does not have an identifier field in {:?}",
                                reference.preview(),
                                ctx.identifiers
                            ),
                        ))
                    }
                }
            }
        }
        Node::String(s) => s.clone(),
        other => {
            return Err(ValidationError::new(format!(
                "expected a mapping or string reference, got {}: `{}`",
                other.type_name(),
                other.preview()
            )))
        }
    };

    #[cfg(windows)]
    let lref = lref.replace('\\', "/");

    let url = expand_url(
        ctx,
        session.fetcher.as_ref(),
        &lref,
        base_url,
        obj.is_some(),
        false,
        None,
    )
    .map_err(|e| e.or_source(&sl))?;

    // Mixins always re-fetch and copy; they are textual overlays, not
    // shared singletons.
    if mixin.is_none() {
        if let Some(cached) = session.idx.get(&url) {
            return Ok((cached.clone(), Mapping::new()));
        }
    }

    if inc {
        let text = session
            .fetcher
            .fetch_text(&url)
            .map_err(|e| ValidationError::from(e).with_source(&sl))?;
        let node = Node::String(text);
        session.idx.insert(url.clone(), node.clone());
        return Ok((node, Mapping::new()));
    }

    let (resolve_target, doc_url) = match obj {
        Some(mut o) => {
            for identifier in &ctx.identifiers {
                o.insert(identifier.clone(), Node::String(url.clone()));
            }
            (Node::Mapping(o), url.clone())
        }
        None => {
            let (doc_url, frg) = urldefrag(&url);
            if mixin.is_none() && session.idx.contains_key(&doc_url) {
                // The base document was already loaded; if the fragment was
                // not found above, it does not exist.
                return Err(ValidationError::at(
                    &sl,
                    format!("Reference `#{}` not found in file `{}`.", frg, doc_url),
                ));
            }
            let doc =
                fetch(session, ctx, &doc_url, mixin.is_none()).map_err(|e| e.or_source(&sl))?;
            (doc, doc_url)
        }
    };

    let (resolved, metadata) = match mixin {
        Some(mix) => {
            let mut merged = match resolve_target {
                Node::Mapping(m) => m,
                other => {
                    return Err(ValidationError::at(
                        &sl,
                        format!("'$mixin' target must be a mapping, got {}", other.type_name()),
                    ))
                }
            };
            for (k, v) in mix.iter() {
                if k == "$mixin" {
                    continue;
                }
                merged.insert_at(k.clone(), v.clone(), mix.key_pos(k));
            }
            // Mixins resolve against the referencing object's base, not the
            // target document's; imports use the target's own URI.
            resolve_all(
                session,
                ctx,
                Node::Mapping(merged),
                base_url,
                &doc_url,
                checklinks,
                strict_fp,
            )?
        }
        None => {
            let (resolved, metadata) = resolve_all(
                session,
                ctx,
                resolve_target,
                &doc_url,
                &doc_url,
                checklinks,
                strict_fp,
            )?;
            reregister(session, ctx, &doc_url, &resolved);
            match session.idx.get(&url) {
                Some(hit) => (hit.clone(), metadata),
                None => {
                    let keys = session
                        .idx
                        .keys()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join("\n  ");
                    return Err(ValidationError::at(
                        &sl,
                        format!(
                            "Reference `{}` is not in the index. Index contains:\n  {}",
                            url, keys
                        ),
                    ));
                }
            }
        }
    };

    if let Node::Mapping(m) = &resolved {
        if m.contains_key("$graph") {
            let metadata = m.without_key("$graph");
            return Ok((m.get("$graph").cloned().unwrap_or(Node::Null), metadata));
        }
    }
    Ok((resolved, metadata))
}

// The unresolved document registered by `fetch` must not survive
// resolution; replace it and its identifier aliases with the final tree.
fn reregister(session: &mut Session, ctx: &Context, doc_url: &str, resolved: &Node) {
    session.idx.insert(doc_url.to_string(), resolved.clone());
    if let Node::Mapping(m) = resolved {
        for identifier in &ctx.identifiers {
            if let Some(id) = m.get_str(identifier) {
                session.idx.insert(id.to_string(), resolved.clone());
            }
        }
    }
}

/// Fetch and parse a document. Untagged top-level mappings get identifier
/// fields injected so they can be referenced, and the document is
/// registered under each identifier alias.
pub(crate) fn fetch(
    session: &mut Session,
    ctx: &Context,
    url: &str,
    inject_ids: bool,
) -> Result<Node> {
    if let Some(hit) = session.idx.get(url) {
        return Ok(hit.clone());
    }
    let text = session.fetcher.fetch_text(url)?;
    let mut node = parse_document(&text, &relname(url))?;

    let mut inject = false;
    if inject_ids && !ctx.identifiers.is_empty() {
        if let Node::Mapping(m) = &mut node {
            for identifier in &ctx.identifiers {
                if !m.contains_key(identifier) {
                    m.insert(identifier.clone(), Node::String(url.to_string()));
                }
            }
            inject = true;
        }
    }

    if inject {
        let mut aliases = Vec::new();
        if let Node::Mapping(m) = &node {
            for identifier in &ctx.identifiers {
                if let Some(v) = m.get_str(identifier) {
                    aliases.push(expand_url(
                        ctx,
                        session.fetcher.as_ref(),
                        v,
                        url,
                        false,
                        false,
                        None,
                    )?);
                }
            }
        }
        for alias in aliases {
            session.idx.insert(alias, node.clone());
        }
    } else {
        session.idx.insert(url.to_string(), node.clone());
    }
    Ok(node)
}

/// Fetch externally declared schema vocabularies listed in `$schemas` and
/// scan them for property declarations. Found properties become foreign
/// properties (warnings, not errors, in link checking) and, when their
/// range is not a literal, participate as url fields. Failures only warn.
pub(crate) fn add_schemas(session: &mut Session, base_url: &str, schemas: &Node) {
    if session.skip_schemas {
        return;
    }
    for sch in aslist(schemas) {
        let Some(sch) = sch.as_str() else {
            continue;
        };
        let fetchurl = match session.fetcher.urljoin(base_url, sch) {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!("could not load extension schema {}: {}", sch, e);
                continue;
            }
        };
        let text = match session.fetcher.fetch_text(&fetchurl) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("could not load extension schema {}: {}", fetchurl, e);
                continue;
            }
        };
        let doc = match parse_document(&text, &relname(&fetchurl)) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(
                    "could not parse extension schema {}: {}",
                    fetchurl,
                    e.one_line()
                );
                continue;
            }
        };
        scan_schema_node(session, &doc);
    }
}

fn scan_schema_node(session: &mut Session, node: &Node) {
    match node {
        Node::Mapping(m) => {
            if let Some(subject) = m.get_str("@id").map(str::to_string) {
                session
                    .idx
                    .entry(subject.clone())
                    .or_insert(Node::Null);
                let declares_property = m
                    .get("@type")
                    .map(|t| {
                        aslist(t).iter().any(|v| {
                            matches!(
                                v.as_str(),
                                Some("rdf:Property") | Some("owl:ObjectProperty")
                            )
                        })
                    })
                    .unwrap_or(false)
                    || m.contains_key("range")
                    || m.contains_key("rdfs:range");
                if declares_property {
                    session.foreign_properties.insert(subject.clone());
                    let range = m.get_str("range").or_else(|| m.get_str("rdfs:range"));
                    if let Some(r) = range {
                        if !is_literal_range(r) {
                            session.extra_url_fields.insert(subject);
                        }
                    }
                }
            }
            for (_, v) in m.iter() {
                scan_schema_node(session, v);
            }
        }
        Node::Sequence(s) => {
            for v in s.iter() {
                scan_schema_node(session, v);
            }
        }
        _ => {}
    }
}

fn is_literal_range(range: &str) -> bool {
    (range.starts_with("http://www.w3.org/2001/XMLSchema#")
        && range != "http://www.w3.org/2001/XMLSchema#anyURI")
        || range == "http://www.w3.org/2000/01/rdf-schema#Literal"
        || (range.starts_with("xsd:") && range != "xsd:anyURI")
}
