//! The `resolve_all` pipeline: the ordered sequence of rewrites applied to
//! every mapping during resolution, and the positional splice handling for
//! sequences.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::Context;
use crate::error::{Result, ValidationError};
use crate::node::{Mapping, Node, Pos, Sequence};
use crate::sourceline::SourceRef;

use super::links::validate_links;
use super::{add_schemas, expand_url, fetch, resolve_ref, Session};

static TYPE_DSL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([^\[?]+)(\[\])?(\?)?$").unwrap());

/// Resolve identifiers, directives, DSL shorthand, and links in a document
/// tree. Returns the resolved tree and the file-level metadata mapping.
///
/// For mappings the steps run in strict order: directive short-circuit,
/// document-level directives, identity-link pre-pass, field-key
/// normalization, id-map normalization, DSL desugaring, identifier
/// resolution (which rebases the rest of the object), identity-link lists,
/// url fields, then recursive descent. Sequences splice imported sequences
/// in place.
pub(crate) fn resolve_all(
    session: &mut Session,
    ctx: &Context,
    document: Node,
    base_url: &str,
    file_base: &str,
    checklinks: bool,
    strict_fp: bool,
) -> Result<(Node, Mapping)> {
    let mut metadata = Mapping::new();
    let mut base_url = base_url.to_string();

    match &document {
        Node::Mapping(m) => {
            // $import/$include resolve against the file-level base; $mixin
            // against the locally nested base.
            if m.contains_key("$import") || m.contains_key("$include") {
                return resolve_ref(session, ctx, &document, file_base, checklinks, strict_fp);
            }
            if m.contains_key("$mixin") {
                return resolve_ref(session, ctx, &document, &base_url, checklinks, strict_fp);
            }
        }
        Node::Sequence(_) => {}
        _ => return Ok((document, metadata)),
    }

    // Document-level directives. $namespaces/$schemas scope a replacement
    // context to this subtree while sharing the session.
    let mut sub_ctx: Option<Context> = None;
    let mut document = document;
    if let Node::Mapping(m) = &document {
        if let Some(b) = m.get_str("$base") {
            base_url = b.to_string();
        }

        if let Some(profile) = m.get_str("$profile").map(str::to_string) {
            fetch(session, ctx, &profile, true)
                .map_err(|e| e.or_source(&SourceRef::of_key(m, "$profile")))?;
            if let Some(schemas) = m.get("$schemas") {
                add_schemas(session, &profile, schemas);
            }
            if sub_ctx.is_none() {
                sub_ctx = Some(ctx.clone());
            }
        }

        if let Some(ns) = m.get("$namespaces") {
            let nsmap = namespaces_map(ns)
                .map_err(|e| e.or_source(&SourceRef::of_key(m, "$namespaces")))?;
            let cur = sub_ctx.take().unwrap_or_else(|| ctx.clone());
            sub_ctx = Some(cur.with_namespaces(&nsmap));
        }

        if let Some(schemas) = m.get("$schemas") {
            if sub_ctx.is_none() {
                sub_ctx = Some(ctx.clone());
            }
            add_schemas(session, file_base, schemas);
        }
    }
    let ctx: &Context = sub_ctx.as_ref().unwrap_or(ctx);

    // $graph unwraps to the contained list; the rest becomes metadata.
    if let Node::Mapping(m) = &document {
        if m.contains_key("$graph") {
            let meta_map = m.without_key("$graph");
            let graph = m.get("$graph").cloned().unwrap_or(Node::Null);
            let (resolved_meta, _) = resolve_all(
                session,
                ctx,
                Node::Mapping(meta_map),
                &base_url,
                file_base,
                false,
                strict_fp,
            )?;
            metadata = match resolved_meta {
                Node::Mapping(mm) => mm,
                other => {
                    return Err(ValidationError::new(format!(
                        "document metadata must be a mapping: {}",
                        other.preview()
                    )))
                }
            };
            document = graph;
        }
    }

    match document {
        Node::Mapping(mut m) => {
            resolve_identity_strings(session, ctx, &mut m, &base_url)?;
            normalize_fields(session, ctx, &mut m)?;
            resolve_idmap(ctx, &mut m)?;
            resolve_type_dsl(ctx, &mut m);
            resolve_secondary_files_dsl(ctx, &mut m);
            let registered = resolve_identifier(session, ctx, &mut m, &mut base_url)?;
            resolve_identity_lists(session, ctx, &mut m, &base_url)?;
            resolve_uris(session, ctx, &mut m, &base_url)?;

            let keys: Vec<String> = m.keys().cloned().collect();
            for key in keys {
                let sub_base = match ctx.subscopes.get(&key) {
                    Some(s) => format!("{}/{}", base_url, s),
                    None => base_url.clone(),
                };
                let val = std::mem::replace(m.get_mut(&key).unwrap(), Node::Null);
                match resolve_all(session, ctx, val, &sub_base, file_base, false, strict_fp) {
                    Ok((new_val, _)) => {
                        if let Some(slot) = m.get_mut(&key) {
                            *slot = new_val;
                        }
                    }
                    Err(e) => {
                        let sr = SourceRef::of_key(&m, &key);
                        return Err(ValidationError::wrap(
                            format!("Validation error in field `{}`", key),
                            Some(&sr),
                            vec![e],
                            "",
                        ));
                    }
                }
            }

            let mut document = Node::Mapping(m);
            if checklinks {
                let mut all_ids = HashMap::new();
                validate_links(session, ctx, &mut document, "", &mut all_ids, strict_fp)?;
            }
            for id in &registered {
                session.idx.insert(id.clone(), document.clone());
            }
            Ok((document, metadata))
        }

        Node::Sequence(mut s) => {
            let mut i = 0;
            while i < s.len() {
                let is_directive = matches!(
                    s.get(i),
                    Some(Node::Mapping(m))
                        if m.contains_key("$import") || m.contains_key("$mixin")
                );
                if is_directive {
                    let item = s.get(i).cloned().unwrap();
                    let (resolved, import_metadata) =
                        resolve_ref(session, ctx, &item, file_base, false, strict_fp).map_err(
                            |e| {
                                ValidationError::wrap(
                                    format!("Validation error in position {}", i),
                                    Some(&SourceRef::of_item(&s, i)),
                                    vec![e],
                                    "",
                                )
                            },
                        )?;
                    collect_import_metadata(ctx, &mut metadata, &import_metadata);
                    match resolved {
                        Node::Sequence(rs) => {
                            // Imported sequences expand to multiple sibling
                            // elements; positions carry over from the
                            // directive they replace.
                            let items: Vec<Node> = rs.iter().cloned().collect();
                            let n = items.len();
                            s.splice(i, items);
                            i += n;
                        }
                        other => {
                            s.set(i, other);
                            i += 1;
                        }
                    }
                } else {
                    let val = std::mem::replace(s.get_mut(i).unwrap(), Node::Null);
                    match resolve_all(session, ctx, val, &base_url, file_base, false, strict_fp) {
                        Ok((nv, _)) => {
                            s.set(i, nv);
                            i += 1;
                        }
                        Err(e) => {
                            let sr = SourceRef::of_item(&s, i);
                            return Err(ValidationError::wrap(
                                format!("Validation error in position {}", i),
                                Some(&sr),
                                vec![e],
                                "",
                            ));
                        }
                    }
                }
            }

            // $graph documents: identity links declared in the metadata name
            // the graph itself.
            let mut graph_ids = Vec::new();
            let mut id_fields: Vec<&String> = ctx.identity_links.iter().collect();
            id_fields.sort();
            for field in id_fields {
                if let Some(v) = metadata.get_str(field).map(str::to_string) {
                    let expanded = expand_url(
                        ctx,
                        session.fetcher.as_ref(),
                        &v,
                        &base_url,
                        true,
                        false,
                        None,
                    )?;
                    metadata.insert(field.clone(), Node::String(expanded.clone()));
                    graph_ids.push(expanded);
                }
            }

            let mut document = Node::Sequence(s);
            if checklinks {
                let mut all_ids = HashMap::new();
                validate_links(session, ctx, &mut document, "", &mut all_ids, strict_fp)?;
            }
            for id in graph_ids {
                session.idx.insert(id, document.clone());
            }
            Ok((document, metadata))
        }

        other => Ok((other, metadata)),
    }
}

fn collect_import_metadata(ctx: &Context, metadata: &mut Mapping, import_metadata: &Mapping) {
    for identifier in &ctx.identifiers {
        if let Some(idval) = import_metadata.get_str(identifier).map(str::to_string) {
            if !matches!(metadata.get("$import_metadata"), Some(Node::Mapping(_))) {
                metadata.insert("$import_metadata", Node::Mapping(Mapping::new()));
            }
            if let Some(Node::Mapping(bucket)) = metadata.get_mut("$import_metadata") {
                bucket.insert(idval, Node::Mapping(import_metadata.clone()));
            }
        }
    }
}

fn namespaces_map(node: &Node) -> Result<indexmap::IndexMap<String, String>> {
    let m = node
        .as_mapping()
        .ok_or_else(|| ValidationError::new("$namespaces must be a mapping of prefixes to URIs"))?;
    let mut out = indexmap::IndexMap::new();
    for (k, v) in m.iter() {
        let s = v.as_str().ok_or_else(|| {
            ValidationError::at(
                &SourceRef::of_key(m, k),
                format!("namespace prefix '{}' must map to a string URI", k),
            )
        })?;
        out.insert(k.clone(), s.to_string());
    }
    Ok(out)
}

// Identity-link pre-pass: register string-valued identity links before any
// other field processing, since later fields may reference them.
fn resolve_identity_strings(
    session: &mut Session,
    ctx: &Context,
    m: &mut Mapping,
    base_url: &str,
) -> Result<()> {
    let mut fields: Vec<&String> = ctx.identity_links.iter().collect();
    fields.sort();
    for field in fields {
        if let Some(Node::String(v)) = m.get(field).cloned().as_ref() {
            let expanded =
                expand_url(ctx, session.fetcher.as_ref(), v, base_url, true, false, None)
                    .map_err(|e| e.or_source(&SourceRef::of_key(m, field)))?;
            m.insert(field.clone(), Node::String(expanded.clone()));
            let replaceable = matches!(
                session.idx.get(&expanded),
                None | Some(Node::String(_)) | Some(Node::Null)
            );
            if replaceable {
                session.idx.insert(expanded.clone(), Node::String(expanded));
            }
        }
    }
    Ok(())
}

// Rewrite mapping keys that are CURIEs or full URIs to their canonical
// vocabulary form.
fn normalize_fields(session: &Session, ctx: &Context, m: &mut Mapping) -> Result<()> {
    let keys: Vec<String> = m.keys().cloned().collect();
    for key in keys {
        let expanded = expand_url(ctx, session.fetcher.as_ref(), &key, "", false, true, None)?;
        if expanded != key {
            m.rename_key(&key, &expanded);
        }
    }
    Ok(())
}

// Id-map normalization: a mapping-shaped field value becomes a sequence of
// objects, each gaining the map key under the configured subject name. Keys
// are processed in lexicographic order for reproducible output.
fn resolve_idmap(ctx: &Context, m: &mut Mapping) -> Result<()> {
    let mut idmap_fields: Vec<(&String, &String)> = ctx.idmap.iter().collect();
    idmap_fields.sort();
    for (field, subject) in idmap_fields {
        let inner = match m.get(field) {
            Some(Node::Mapping(inner)) => {
                if inner.contains_key("$import") || inner.contains_key("$include") {
                    continue;
                }
                inner.clone()
            }
            _ => continue,
        };
        let mut ls = Sequence::new();
        ls.filename = inner.filename.clone();
        ls.pos = inner.pos;
        let mut keys: Vec<String> = inner.keys().cloned().collect();
        keys.sort();
        for k in keys {
            let val = inner.get(&k).unwrap().clone();
            let kpos = inner.key_pos(&k);
            let mut v = match val {
                Node::Mapping(vm) => vm,
                other => match ctx.map_predicate.get(field) {
                    Some(pred) => {
                        let mut vm = Mapping::new();
                        vm.filename = inner.filename.clone();
                        vm.pos = kpos;
                        vm.insert_at(pred.clone(), other, kpos);
                        vm
                    }
                    None => {
                        return Err(ValidationError::at(
                            &SourceRef::of_key(&inner, &k),
                            format!(
                                "mapSubject '{}' value '{}' is not a mapping \
                                 and does not have a mapPredicate",
                                k,
                                other.preview()
                            ),
                        ))
                    }
                },
            };
            v.insert_at(subject.clone(), Node::String(k.clone()), kpos);
            if v.filename.is_none() {
                v.filename = inner.filename.clone();
            }
            ls.push_at(Node::Mapping(v), kpos);
        }
        m.insert(field.clone(), Node::Sequence(ls));
    }
    Ok(())
}

// Desugar one type-DSL string: trailing `[]` wraps in an array schema,
// trailing `?` wraps in a union with null.
fn type_dsl(t: Node, pos: Option<Pos>, filename: &Option<Arc<str>>) -> Node {
    let s = match &t {
        Node::String(s) => s,
        _ => return t,
    };
    let caps = match TYPE_DSL_RE.captures(s) {
        Some(c) => c,
        None => return t,
    };
    if caps.get(2).is_none() && caps.get(3).is_none() {
        return t;
    }
    let first = caps.get(1).unwrap().as_str().to_string();
    let mut result = Node::String(first.clone());
    if caps.get(2).is_some() {
        let mut arr = Mapping::new();
        arr.filename = filename.clone();
        arr.pos = pos;
        arr.insert_at("type", Node::from("array"), pos);
        arr.insert_at("items", Node::String(first), pos);
        result = Node::Mapping(arr);
    }
    if caps.get(3).is_some() {
        let mut union = Sequence::new();
        union.filename = filename.clone();
        union.pos = pos;
        union.push_at(Node::from("null"), pos);
        union.push_at(result, pos);
        result = Node::Sequence(union);
    }
    result
}

fn resolve_type_dsl(ctx: &Context, m: &mut Mapping) {
    let mut fields: Vec<&String> = ctx.type_dsl_fields.iter().collect();
    fields.sort();
    for field in fields {
        let val = match m.get(field) {
            Some(v) => v.clone(),
            None => continue,
        };
        let kpos = m.key_pos(field);
        let fname = m.filename.clone();
        let datum2 = match val {
            Node::Sequence(seq) => {
                let mut out = Sequence::new();
                out.filename = seq.filename.clone();
                out.pos = seq.pos;
                for (i, item) in seq.iter().enumerate() {
                    out.push_at(
                        type_dsl(item.clone(), seq.item_pos(i), &fname),
                        seq.item_pos(i),
                    );
                }
                Node::Sequence(out)
            }
            other => type_dsl(other, kpos, &fname),
        };
        // flatten one level of nested unions, dropping duplicates while
        // preserving first-seen order
        let final_val = match datum2 {
            Node::Sequence(seq) => {
                let mut out = Sequence::new();
                out.filename = seq.filename.clone();
                out.pos = seq.pos;
                let mut seen: Vec<Node> = Vec::new();
                for (i, item) in seq.iter().enumerate() {
                    match item {
                        Node::Sequence(inner) => {
                            for (j, v) in inner.iter().enumerate() {
                                if !seen.contains(v) {
                                    out.push_at(v.clone(), inner.item_pos(j));
                                    seen.push(v.clone());
                                }
                            }
                        }
                        v => {
                            if !seen.contains(v) {
                                out.push_at(v.clone(), seq.item_pos(i));
                                seen.push(v.clone());
                            }
                        }
                    }
                }
                Node::Sequence(out)
            }
            other => other,
        };
        m.insert(field.clone(), final_val);
    }
}

// Secondary-file shorthand: `".ext?"` strips the suffix and marks the
// pattern optional; without it, required stays unset to mean "inherit".
fn secondary_file_entry(t: Node, pos: Option<Pos>, filename: &Option<Arc<str>>) -> Node {
    let s = match &t {
        Node::String(s) => s,
        _ => return t,
    };
    let (pattern, required) = match s.strip_suffix('?') {
        Some(p) => (p.to_string(), Node::Bool(false)),
        None => (s.clone(), Node::Null),
    };
    let mut out = Mapping::new();
    out.filename = filename.clone();
    out.pos = pos;
    out.insert_at("pattern", Node::String(pattern), pos);
    out.insert_at("required", required, pos);
    Node::Mapping(out)
}

fn resolve_secondary_files_dsl(ctx: &Context, m: &mut Mapping) {
    let mut fields: Vec<&String> = ctx.secondary_file_dsl_fields.iter().collect();
    fields.sort();
    for field in fields {
        let val = match m.get(field) {
            Some(v) => v.clone(),
            None => continue,
        };
        let kpos = m.key_pos(field);
        let fname = m.filename.clone();
        let replaced = match val {
            Node::Sequence(seq) => {
                let mut out = Sequence::new();
                out.filename = seq.filename.clone();
                out.pos = seq.pos;
                for (i, item) in seq.iter().enumerate() {
                    out.push_at(
                        secondary_file_entry(item.clone(), seq.item_pos(i), &fname),
                        seq.item_pos(i),
                    );
                }
                Node::Sequence(out)
            }
            other => secondary_file_entry(other, kpos, &fname),
        };
        m.insert(field.clone(), replaced);
    }
}

// Expand identifier fields as scoped identifiers, register the object, and
// rebase the rest of the object on its own identity. Returns the URIs this
// object was registered under, so the final tree can replace the partial
// one after descent.
fn resolve_identifier(
    session: &mut Session,
    ctx: &Context,
    m: &mut Mapping,
    base_url: &mut String,
) -> Result<Vec<String>> {
    let mut registered = Vec::new();
    for identifier in &ctx.identifiers {
        let val = match m.get(identifier) {
            Some(v) => v.clone(),
            None => continue,
        };
        match val {
            Node::String(s) => {
                let expanded =
                    expand_url(ctx, session.fetcher.as_ref(), &s, base_url, true, false, None)
                        .map_err(|e| e.or_source(&SourceRef::of_key(m, identifier)))?;
                m.insert(identifier.clone(), Node::String(expanded.clone()));
                let replaceable = matches!(
                    session.idx.get(&expanded),
                    None | Some(Node::String(_)) | Some(Node::Null)
                );
                if replaceable {
                    session
                        .idx
                        .insert(expanded.clone(), Node::Mapping(m.clone()));
                    registered.push(expanded.clone());
                }
                *base_url = expanded;
            }
            other => {
                return Err(ValidationError::at(
                    &SourceRef::of_key(m, identifier),
                    format!(
                        "identifier field '{}' must be a string, got {}",
                        identifier,
                        other.preview()
                    ),
                ))
            }
        }
    }
    Ok(registered)
}

// Identity-link sequences (e.g. enum symbol lists): each element is itself
// an identifier, registered as its own value.
fn resolve_identity_lists(
    session: &mut Session,
    ctx: &Context,
    m: &mut Mapping,
    base_url: &str,
) -> Result<()> {
    let mut fields: Vec<&String> = ctx.identity_links.iter().collect();
    fields.sort();
    for field in fields {
        let mut seq = match m.get(field) {
            Some(Node::Sequence(s)) => s.clone(),
            _ => continue,
        };
        for i in 0..seq.len() {
            if let Some(Node::String(v)) = seq.get(i).cloned().as_ref() {
                let expanded =
                    expand_url(ctx, session.fetcher.as_ref(), v, base_url, true, false, None)
                        .map_err(|e| e.or_source(&SourceRef::of_key(m, field)))?;
                if !session.idx.contains_key(&expanded) {
                    session
                        .idx
                        .insert(expanded.clone(), Node::String(expanded.clone()));
                }
                seq.set(i, Node::String(expanded));
            }
        }
        m.insert(field.clone(), Node::Sequence(seq));
    }
    Ok(())
}

// Expand every configured url field against the document base, honoring
// vocabulary-term eligibility and scoped-reference depth.
fn resolve_uris(
    session: &mut Session,
    ctx: &Context,
    m: &mut Mapping,
    base_url: &str,
) -> Result<()> {
    let mut fields: Vec<String> = ctx
        .url_fields
        .iter()
        .chain(session.extra_url_fields.iter())
        .cloned()
        .collect();
    fields.sort();
    fields.dedup();
    for field in fields {
        let vocab_term = ctx.vocab_fields.contains(&field);
        let scoped_ref = ctx.scoped_ref_fields.get(&field).copied();
        let val = match m.get(&field) {
            Some(v) => v.clone(),
            None => continue,
        };
        match val {
            Node::String(s) => {
                let expanded = expand_url(
                    ctx,
                    session.fetcher.as_ref(),
                    &s,
                    base_url,
                    false,
                    vocab_term,
                    scoped_ref,
                )
                .map_err(|e| e.or_source(&SourceRef::of_key(m, &field)))?;
                m.insert(field.clone(), Node::String(expanded));
            }
            Node::Sequence(mut seq) => {
                for i in 0..seq.len() {
                    if let Some(Node::String(v)) = seq.get(i).cloned().as_ref() {
                        let expanded = expand_url(
                            ctx,
                            session.fetcher.as_ref(),
                            v,
                            base_url,
                            false,
                            vocab_term,
                            scoped_ref,
                        )
                        .map_err(|e| e.or_source(&SourceRef::of_key(m, &field)))?;
                        seq.set(i, Node::String(expanded));
                    }
                }
                m.insert(field.clone(), Node::Sequence(seq));
            }
            _ => {}
        }
    }
    Ok(())
}
