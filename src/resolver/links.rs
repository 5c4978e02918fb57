//! Link validation over a resolved tree.
//!
//! A separate pass from resolution: every url-field value must be a known
//! vocabulary term, an index entry, resolvable via scoped-reference search,
//! or an existing resource. Violations at one nesting level are collected
//! into a combined error so a user sees every broken reference in one run.

use std::collections::HashMap;

use crate::context::Context;
use crate::error::{Result, ValidationError};
use crate::node::Node;
use crate::sourceline::{relname, SourceRef};
use crate::uri::UriSplit;

use super::Session;

/// The object's own identifier, if it carries one.
pub(crate) fn getid(ctx: &Context, node: &Node) -> Option<String> {
    let m = node.as_mapping()?;
    for identifier in &ctx.identifiers {
        if let Some(s) = m.get_str(identifier) {
            return Some(s.to_string());
        }
    }
    None
}

/// Walk a resolved tree verifying every link. `all_doc_ids` tracks
/// identifier definitions seen in this pass so conflicting redefinitions
/// can be reported. Scoped references are rewritten in place on success.
pub(crate) fn validate_links(
    session: &mut Session,
    ctx: &Context,
    document: &mut Node,
    base_url: &str,
    all_doc_ids: &mut HashMap<String, String>,
    strict_fp: bool,
) -> Result<()> {
    let docid = getid(ctx, document).unwrap_or_else(|| base_url.to_string());
    let mut errors: Vec<ValidationError> = Vec::new();

    match document {
        Node::Mapping(m) => {
            let mut fields: Vec<String> = ctx
                .url_fields
                .iter()
                .chain(session.extra_url_fields.iter())
                .cloned()
                .collect();
            fields.sort();
            fields.dedup();
            for field in &fields {
                if ctx.identity_links.contains(field) || !m.contains_key(field) {
                    continue;
                }
                let sr = SourceRef::of_key(m, field);
                let mut val = std::mem::replace(m.get_mut(field).unwrap(), Node::Null);
                let res = validate_link(session, ctx, field, &mut val, &docid);
                *m.get_mut(field).unwrap() = val;
                if let Err(e) = res {
                    let e = e.or_source(&sr);
                    if field == "$schemas"
                        || (session.foreign_properties.contains(field) && !strict_fp)
                    {
                        tracing::warn!("{}", e.into_warning().one_line());
                    } else {
                        errors.push(e);
                    }
                }
            }

            // Identifier uniqueness: the same resolved identifier must not be
            // defined from two different source locations in one pass.
            for identifier in &ctx.identifiers {
                if let Some(idval) = m.get_str(identifier).map(str::to_string) {
                    let sr = SourceRef::of_key(m, identifier);
                    let lead = sr.lead();
                    match all_doc_ids.get(&idval) {
                        Some(prev) if *prev != lead => {
                            let msg = format!(
                                "{} object `{}` `{}` previously defined",
                                prev,
                                identifier,
                                relname(&idval)
                            );
                            if session.fail_on_duplicate_ids {
                                errors.push(ValidationError::at(&sr, msg));
                            } else {
                                tracing::warn!("{}", msg);
                            }
                        }
                        _ => {
                            all_doc_ids.insert(idval, lead);
                            break;
                        }
                    }
                }
            }

            let keys: Vec<String> = m.keys().cloned().collect();
            for key in keys {
                let sr = SourceRef::of_key(m, &key);
                let mut val = std::mem::replace(m.get_mut(&key).unwrap(), Node::Null);
                let res = validate_links(session, ctx, &mut val, &docid, all_doc_ids, strict_fp);
                let child_id = getid(ctx, &val);
                *m.get_mut(&key).unwrap() = val;
                if let Err(e) = res {
                    if ctx.nolinkcheck.contains(&key) || key.contains(':') {
                        tracing::warn!("{}", e.one_line());
                    } else {
                        let wrapped = match child_id {
                            Some(id) => ValidationError::wrap(
                                format!("checking object `{}`", relname(&id)),
                                Some(&sr),
                                vec![e],
                                "",
                            ),
                            None => ValidationError::wrap(
                                format!("checking field `{}`", key),
                                Some(&sr),
                                vec![e],
                                "",
                            ),
                        };
                        errors.push(wrapped);
                    }
                }
            }
        }

        Node::Sequence(s) => {
            for i in 0..s.len() {
                let sr = SourceRef::of_item(s, i);
                let mut val = std::mem::replace(s.get_mut(i).unwrap(), Node::Null);
                let res = validate_links(session, ctx, &mut val, &docid, all_doc_ids, strict_fp);
                let child_id = getid(ctx, &val);
                s.set(i, val);
                if let Err(e) = res {
                    let wrapped = match child_id {
                        Some(id) => ValidationError::wrap(
                            format!("checking object `{}`", relname(&id)),
                            Some(&sr),
                            vec![e],
                            "",
                        ),
                        None => ValidationError::wrap("checking item", Some(&sr), vec![e], ""),
                    };
                    errors.push(wrapped);
                }
            }
        }

        _ => return Ok(()),
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.pop().unwrap()),
        _ => Err(ValidationError::wrap("", None, errors, "")),
    }
}

fn validate_link(
    session: &mut Session,
    ctx: &Context,
    field: &str,
    link: &mut Node,
    docid: &str,
) -> Result<()> {
    if ctx.nolinkcheck.contains(field) {
        return Ok(());
    }
    match link {
        Node::String(s) => {
            let resolves = if ctx.vocab_fields.contains(field) {
                ctx.vocab.contains_key(s.as_str())
                    || session.idx.contains_key(s.as_str())
                    || ctx.rvocab.contains_key(s.as_str())
            } else {
                session.idx.contains_key(s.as_str()) || ctx.rvocab.contains_key(s.as_str())
            };
            if !resolves {
                if let Some(depth) = ctx.scoped_ref_fields.get(field) {
                    let rewritten = validate_scoped(session, ctx, field, s, docid, *depth)?;
                    *link = Node::String(rewritten);
                } else if !session.fetcher.check_exists(s) {
                    return Err(ValidationError::new(format!(
                        "Field `{}` contains undefined reference to `{}`",
                        field, s
                    )));
                }
            }
        }
        Node::Sequence(seq) => {
            let mut errs = Vec::new();
            for i in 0..seq.len() {
                let mut item = std::mem::replace(seq.get_mut(i).unwrap(), Node::Null);
                let res = validate_link(session, ctx, field, &mut item, docid);
                seq.set(i, item);
                if let Err(e) = res {
                    errs.push(e);
                }
            }
            match errs.len() {
                0 => {}
                1 => return Err(errs.pop().unwrap()),
                _ => return Err(ValidationError::wrap("", None, errs, "")),
            }
        }
        Node::Mapping(_) => {
            let mut ids = HashMap::new();
            validate_links(session, ctx, link, docid, &mut ids, false)?;
        }
        other => {
            return Err(ValidationError::new(format!(
                "`{}` field is {}, expected string, list, or a mapping",
                field,
                other.type_name()
            )))
        }
    }
    Ok(())
}

// Scoped-reference search: walk up `depth` fragment segments from the
// referencing object's identity, then append-and-probe, popping one more
// segment per round until found or exhausted.
fn validate_scoped(
    session: &Session,
    _ctx: &Context,
    field: &str,
    link: &str,
    docid: &str,
    depth: u32,
) -> Result<String> {
    let split = UriSplit::parse(docid);
    let mut sp: Vec<String> = split.fragment.split('/').map(str::to_string).collect();
    let mut n = depth;
    while n > 0 && !sp.is_empty() {
        sp.pop();
        n -= 1;
    }
    let mut tried = Vec::new();
    loop {
        sp.push(link.to_string());
        let url = UriSplit {
            scheme: split.scheme.clone(),
            netloc: split.netloc.clone(),
            path: split.path.clone(),
            query: split.query.clone(),
            fragment: sp.join("/"),
        }
        .unsplit();
        tried.push(url.clone());
        if session.idx.contains_key(&url) {
            return Ok(url);
        }
        sp.pop();
        if sp.is_empty() {
            break;
        }
        sp.pop();
    }
    Err(ValidationError::new(format!(
        "Field `{}` references unknown identifier `{}`, tried {}",
        field,
        link,
        tried.join(", ")
    )))
}
