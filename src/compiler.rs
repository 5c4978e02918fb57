//! The high-level pipeline: load a schema document, derive the document
//! vocabulary it defines, and validate concrete documents against it.
//!
//! Schema documents are themselves resolved with the built-in vocabulary of
//! the schema-definition language ([`base_context`]). The resolved type
//! definitions then produce two artifacts: a [`Context`] for resolving
//! documents (from each field's `jsonldPredicate` declaration) and the
//! flattened [`Names`] registry for validating them. [`SchemaDocument`]
//! bundles both with a document loader.

use indexmap::IndexMap;

use crate::context::{ContextSpec, TermDef, TermInfo};
use crate::error::{Result, ValidationError};
use crate::fetcher::{DefaultFetcher, Fetcher};
use crate::node::{aslist, Mapping, Node};
use crate::resolver::Loader;
use crate::schema::Names;
use crate::specialize::{make_names, shortname};
use crate::validate::validate_document;

/// Namespace of the schema-definition language itself.
pub const SDL_NAMESPACE: &str = "https://arbor-schemas.org/sdl#";

fn sdl(term: &str) -> String {
    format!("{}{}", SDL_NAMESPACE, term)
}

fn uri(value: String) -> TermDef {
    TermDef::Uri(value)
}

fn link(id: String) -> TermDef {
    TermDef::Detailed(TermInfo {
        id: Some(id),
        term_type: Some("@id".to_string()),
        ..TermInfo::default()
    })
}

fn scoped_link(id: String, depth: u32) -> TermDef {
    TermDef::Detailed(TermInfo {
        id: Some(id),
        term_type: Some("@id".to_string()),
        ref_scope: Some(depth),
        ..TermInfo::default()
    })
}

/// The built-in vocabulary for resolving schema documents: `name` is the
/// identifier, `type` takes the type DSL, `fields` and `specialize` are
/// id-maps, `symbols` are identity links, and the primitive type names alias
/// their XML Schema URIs.
pub fn base_context() -> ContextSpec {
    let mut spec = ContextSpec::new();
    spec.insert("sdl".to_string(), uri(SDL_NAMESPACE.to_string()));
    spec.insert(
        "xsd".to_string(),
        uri("http://www.w3.org/2001/XMLSchema#".to_string()),
    );
    spec.insert(
        "rdf".to_string(),
        uri("http://www.w3.org/1999/02/22-rdf-syntax-ns#".to_string()),
    );
    spec.insert(
        "rdfs".to_string(),
        uri("http://www.w3.org/2000/01/rdf-schema#".to_string()),
    );

    spec.insert("name".to_string(), uri("@id".to_string()));
    spec.insert(
        "type".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some(sdl("type")),
            term_type: Some("@vocab".to_string()),
            ref_scope: Some(2),
            type_dsl: true,
            ..TermInfo::default()
        }),
    );
    spec.insert(
        "items".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some(sdl("items")),
            term_type: Some("@vocab".to_string()),
            ref_scope: Some(2),
            ..TermInfo::default()
        }),
    );
    spec.insert(
        "fields".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some(sdl("fields")),
            map_subject: Some("name".to_string()),
            map_predicate: Some("type".to_string()),
            ..TermInfo::default()
        }),
    );
    spec.insert(
        "symbols".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some(sdl("symbols")),
            term_type: Some("@id".to_string()),
            identity: true,
            ..TermInfo::default()
        }),
    );
    spec.insert("extends".to_string(), scoped_link(sdl("extends"), 1));
    spec.insert(
        "specialize".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some(sdl("specialize")),
            map_subject: Some("specializeFrom".to_string()),
            map_predicate: Some("specializeTo".to_string()),
            ..TermInfo::default()
        }),
    );
    spec.insert(
        "specializeFrom".to_string(),
        scoped_link(sdl("specializeFrom"), 1),
    );
    spec.insert(
        "specializeTo".to_string(),
        scoped_link(sdl("specializeTo"), 1),
    );
    spec.insert(
        "default".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some(sdl("default")),
            no_link_check: true,
            ..TermInfo::default()
        }),
    );
    spec.insert("doc".to_string(), uri("rdfs:comment".to_string()));
    spec.insert("docParent".to_string(), link(sdl("docParent")));
    spec.insert("docChild".to_string(), link(sdl("docChild")));
    spec.insert("docAfter".to_string(), link(sdl("docAfter")));
    spec.insert("abstract".to_string(), uri(sdl("abstract")));
    spec.insert("documentRoot".to_string(), uri(sdl("documentRoot")));
    spec.insert("documentation".to_string(), uri(sdl("documentation")));
    spec.insert("inVocab".to_string(), uri(sdl("inVocab")));

    // field names of jsonldPredicate descriptors, so descriptor keys survive
    // field-key normalization untouched
    spec.insert(
        "jsonldPredicate".to_string(),
        uri("sdl:jsonldPredicate".to_string()),
    );
    spec.insert(
        "_id".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some(sdl("_id")),
            term_type: Some("@id".to_string()),
            identity: true,
            ..TermInfo::default()
        }),
    );
    spec.insert("_type".to_string(), uri(sdl("_type")));
    spec.insert("_container".to_string(), uri(sdl("_container")));
    spec.insert("identity".to_string(), uri(sdl("identity")));
    spec.insert("noLinkCheck".to_string(), uri(sdl("noLinkCheck")));
    spec.insert("mapSubject".to_string(), uri(sdl("mapSubject")));
    spec.insert("mapPredicate".to_string(), uri(sdl("mapPredicate")));
    spec.insert("refScope".to_string(), uri(sdl("refScope")));
    spec.insert("typeDSL".to_string(), uri(sdl("typeDSL")));
    spec.insert("secondaryFilesDSL".to_string(), uri(sdl("secondaryFilesDSL")));
    spec.insert("subscope".to_string(), uri(sdl("subscope")));

    // type names
    spec.insert("record".to_string(), uri(sdl("record")));
    spec.insert("enum".to_string(), uri(sdl("enum")));
    spec.insert("array".to_string(), uri(sdl("array")));
    spec.insert("union".to_string(), uri(sdl("union")));
    spec.insert("null".to_string(), uri(sdl("null")));
    spec.insert("Any".to_string(), uri(sdl("Any")));
    spec.insert(
        "boolean".to_string(),
        uri("http://www.w3.org/2001/XMLSchema#boolean".to_string()),
    );
    spec.insert(
        "int".to_string(),
        uri("http://www.w3.org/2001/XMLSchema#int".to_string()),
    );
    spec.insert(
        "long".to_string(),
        uri("http://www.w3.org/2001/XMLSchema#long".to_string()),
    );
    spec.insert(
        "float".to_string(),
        uri("http://www.w3.org/2001/XMLSchema#float".to_string()),
    );
    spec.insert(
        "double".to_string(),
        uri("http://www.w3.org/2001/XMLSchema#double".to_string()),
    );
    spec.insert(
        "string".to_string(),
        uri("http://www.w3.org/2001/XMLSchema#string".to_string()),
    );
    spec
}

/// Merge `src` into `dst`, rejecting conflicting prefix definitions.
fn add_namespaces(
    src: &IndexMap<String, String>,
    dst: &mut IndexMap<String, String>,
) -> Result<()> {
    for (key, value) in src {
        match dst.get(key) {
            None => {
                dst.insert(key.clone(), value.clone());
            }
            Some(existing) if existing == value => {}
            Some(existing) => {
                return Err(ValidationError::new(format!(
                    "Namespace prefix `{}` has conflicting definitions `{}` and `{}`.",
                    key, existing, value
                )))
            }
        }
    }
    Ok(())
}

/// Collect `$namespaces` declarations from a document's metadata, including
/// the metadata of everything it imported.
pub fn collect_namespaces(metadata: &Mapping) -> Result<IndexMap<String, String>> {
    let mut namespaces = IndexMap::new();
    if let Some(Node::Mapping(imports)) = metadata.get("$import_metadata") {
        for (_, value) in imports.iter() {
            if let Node::Mapping(inner) = value {
                let collected = collect_namespaces(inner)?;
                add_namespaces(&collected, &mut namespaces)?;
            }
        }
    }
    if let Some(Node::Mapping(ns)) = metadata.get("$namespaces") {
        let mut direct = IndexMap::new();
        for (key, value) in ns.iter() {
            if let Some(s) = value.as_str() {
                direct.insert(key.clone(), s.to_string());
            }
        }
        add_namespaces(&direct, &mut namespaces)?;
    }
    Ok(namespaces)
}

fn add_term(spec: &mut ContextSpec, name: &str, def: TermDef) -> Result<()> {
    match spec.get(name) {
        None => {
            spec.insert(name.to_string(), def);
            Ok(())
        }
        Some(existing) if *existing == def => Ok(()),
        Some(existing) => Err(ValidationError::new(format!(
            "Predicate collision on `{}`: `{:?}` != `{:?}`",
            name, existing, def
        ))),
    }
}

fn term_from_predicate(field: &Mapping, fieldname: &str) -> Result<Option<TermDef>> {
    let jp = match field.get("jsonldPredicate") {
        Some(v) => v,
        None => return Ok(None),
    };
    match jp {
        Node::String(s) => Ok(Some(TermDef::Uri(s.clone()))),
        Node::Mapping(m) => {
            if m.get_str("_id") == Some("@id") {
                return Ok(Some(TermDef::Uri("@id".to_string())));
            }
            let info = TermInfo {
                id: m.get_str("_id").map(str::to_string),
                term_type: m.get_str("_type").map(str::to_string),
                ref_scope: match m.get("refScope") {
                    Some(Node::Int(i)) => Some(*i as u32),
                    _ => None,
                },
                type_dsl: m.get("typeDSL").and_then(Node::as_bool).unwrap_or(false),
                secondary_files_dsl: m
                    .get("secondaryFilesDSL")
                    .and_then(Node::as_bool)
                    .unwrap_or(false),
                map_subject: m.get_str("mapSubject").map(str::to_string),
                map_predicate: m.get_str("mapPredicate").map(str::to_string),
                identity: m.get("identity").and_then(Node::as_bool).unwrap_or(false),
                no_link_check: m.get("noLinkCheck").and_then(Node::as_bool).unwrap_or(false),
                subscope: m.get_str("subscope").map(str::to_string),
            };
            Ok(Some(TermDef::Detailed(info)))
        }
        other => Err(ValidationError::new(format!(
            "jsonldPredicate of `{}` must be a string or a mapping, got {}",
            fieldname,
            other.type_name()
        ))),
    }
}

/// Derive the document vocabulary from resolved schema type definitions:
/// type and symbol short names become vocabulary terms, and each field's
/// `jsonldPredicate` declaration becomes its behavioral descriptor.
pub fn derive_context(schema_doc: &Node, metadata: &Mapping) -> Result<ContextSpec> {
    let mut spec = ContextSpec::new();
    for (prefix, ns) in collect_namespaces(metadata)? {
        spec.insert(prefix, TermDef::Uri(ns));
    }
    let default_base = metadata.get_str("$base").unwrap_or("").to_string();

    for t in aslist(schema_doc) {
        let Some(t) = t.as_mapping() else { continue };
        let Some(typename) = t.get_str("name") else { continue };
        add_term(&mut spec, &shortname(typename), TermDef::Uri(typename.to_string()))?;

        if let Some(fields) = t.get("fields") {
            for field in aslist(fields) {
                let Some(field) = field.as_mapping() else { continue };
                let Some(fieldname) = field.get_str("name") else { continue };
                let short = shortname(fieldname);
                let def = match term_from_predicate(field, &short)? {
                    Some(def) => def,
                    None => TermDef::Uri(format!("{}{}", default_base, short)),
                };
                add_term(&mut spec, &short, def)?;
            }
        }
        if let Some(symbols) = t.get("symbols") {
            for sym in aslist(symbols) {
                if let Some(s) = sym.as_str() {
                    add_term(&mut spec, &shortname(s), TermDef::Uri(s.to_string()))?;
                }
            }
        }
    }
    Ok(spec)
}

/// A loaded schema: the loader configured with the schema's document
/// vocabulary, the flattened type registry, and the schema file's metadata.
pub struct SchemaDocument {
    pub loader: Loader,
    pub names: Names,
    pub metadata: Mapping,
}

/// Load a schema that can then validate documents via [`load_and_validate`].
pub fn load_schema(schema_ref: &str) -> Result<SchemaDocument> {
    load_schema_with(
        schema_ref,
        Box::new(DefaultFetcher::new()),
        Box::new(DefaultFetcher::new()),
        false,
    )
}

/// [`load_schema`] with injected fetchers: one for resolving the schema
/// itself, one for the returned document loader.
pub fn load_schema_with(
    schema_ref: &str,
    schema_fetcher: Box<dyn Fetcher>,
    document_fetcher: Box<dyn Fetcher>,
    skip_schemas: bool,
) -> Result<SchemaDocument> {
    let base = base_context();
    let mut meta_loader = Loader::with_fetcher(&base, schema_fetcher)?;
    meta_loader.set_skip_schemas(skip_schemas);
    let (schema_doc, metadata) =
        meta_loader.resolve_ref(&Node::String(schema_ref.to_string()), None, true, false)?;

    if !matches!(schema_doc, Node::Sequence(_)) {
        return Err(ValidationError::new(
            "Schema reference must resolve to a list of type definitions.",
        ));
    }

    let doc_spec = derive_context(&schema_doc, &metadata)?;
    let mut loader = Loader::with_fetcher(&doc_spec, document_fetcher)?;
    loader.set_skip_schemas(skip_schemas);
    let names = make_names(&schema_doc, meta_loader.context())?;

    Ok(SchemaDocument {
        loader,
        names,
        metadata,
    })
}

/// Resolve a document and validate it against the loaded schema. Returns the
/// resolved document and its metadata.
pub fn load_and_validate(
    schema: &mut SchemaDocument,
    document_ref: &str,
    strict: bool,
    strict_foreign_properties: bool,
) -> Result<(Node, Mapping)> {
    let run = |schema: &mut SchemaDocument| -> Result<(Node, Mapping)> {
        let (data, metadata) = schema.loader.resolve_ref(
            &Node::String(document_ref.to_string()),
            None,
            true,
            strict_foreign_properties,
        )?;
        validate_document(
            &schema.names,
            &data,
            &schema.loader,
            strict,
            strict_foreign_properties,
        )?;
        Ok((data, metadata))
    };
    run(schema).map_err(|e| ValidationError::wrap("", None, vec![e], ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Pos;

    #[test]
    fn test_base_context_classification() {
        let ctx = crate::context::Context::build(&base_context());
        assert_eq!(ctx.identifiers, vec!["name".to_string()]);
        assert!(ctx.type_dsl_fields.contains("type"));
        assert_eq!(ctx.scoped_ref_fields.get("type"), Some(&2));
        assert_eq!(ctx.scoped_ref_fields.get("extends"), Some(&1));
        assert_eq!(ctx.idmap.get("fields").map(String::as_str), Some("name"));
        assert_eq!(
            ctx.idmap.get("specialize").map(String::as_str),
            Some("specializeFrom")
        );
        assert!(ctx.identity_links.contains("symbols"));
        assert!(ctx.nolinkcheck.contains("default"));
        assert_eq!(
            ctx.rvocab
                .get("http://www.w3.org/2001/XMLSchema#string")
                .map(String::as_str),
            Some("string")
        );
    }

    #[test]
    fn test_collect_namespaces_conflict() {
        let mut ns = Mapping::new();
        ns.insert("edam", Node::from("http://edam.org/"));
        let mut inner_meta = Mapping::new();
        let mut inner_ns = Mapping::new();
        inner_ns.insert("edam", Node::from("http://other.org/"));
        inner_meta.insert("$namespaces", Node::Mapping(inner_ns));
        let mut imports = Mapping::new();
        imports.insert("https://x.org/imported", Node::Mapping(inner_meta));
        let mut meta = Mapping::new();
        meta.insert("$import_metadata", Node::Mapping(imports));
        meta.insert("$namespaces", Node::Mapping(ns));
        let err = collect_namespaces(&meta).unwrap_err();
        assert!(err.message.contains("conflicting definitions"));
    }

    #[test]
    fn test_derive_context_from_predicates() {
        let yaml = r#"
- name: https://x.org/v#Step
  type: record
  fields:
    - name: https://x.org/v#Step/id
      type: string
      jsonldPredicate: "@id"
    - name: https://x.org/v#Step/run
      type: string
      jsonldPredicate:
        _id: https://x.org/v#run
        _type: "@id"
        refScope: 1
    - name: https://x.org/v#Step/label
      type: string
"#;
        let doc = crate::parse::parse_document(yaml, "schema.yml").unwrap();
        let mut meta = Mapping::new();
        meta.insert("$base", Node::from("https://x.org/base#"));
        let spec = derive_context(&doc, &meta).unwrap();
        assert_eq!(spec.get("id"), Some(&TermDef::Uri("@id".to_string())));
        match spec.get("run") {
            Some(TermDef::Detailed(info)) => {
                assert_eq!(info.term_type.as_deref(), Some("@id"));
                assert_eq!(info.ref_scope, Some(1));
            }
            other => panic!("expected descriptor for run, got {:?}", other),
        }
        assert_eq!(
            spec.get("label"),
            Some(&TermDef::Uri("https://x.org/base#label".to_string()))
        );
        assert_eq!(
            spec.get("Step"),
            Some(&TermDef::Uri("https://x.org/v#Step".to_string()))
        );
    }

    #[test]
    fn test_predicate_collision_detected() {
        let yaml = r#"
- name: https://x.org/v#A
  type: record
  fields:
    - name: https://x.org/v#A/run
      type: string
      jsonldPredicate: https://x.org/v#one
- name: https://x.org/v#B
  type: record
  fields:
    - name: https://x.org/v#B/run
      type: string
      jsonldPredicate: https://x.org/v#two
"#;
        let doc = crate::parse::parse_document(yaml, "schema.yml").unwrap();
        let err = derive_context(&doc, &Mapping::new()).unwrap_err();
        assert!(err.message.contains("Predicate collision on `run`"));
    }

    #[test]
    fn test_source_positions_flow_through() {
        // guard against the parse layer silently dropping provenance the
        // pipeline's error reporting depends on
        let doc = crate::parse::parse_document("- name: X\n  type: record\n", "s.yml").unwrap();
        let seq = doc.as_sequence().unwrap();
        assert_eq!(seq.item_pos(0), Some(Pos::new(1, 3)));
    }
}
