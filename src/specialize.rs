//! Inheritance and specialization flattening.
//!
//! Schema definitions arrive from the resolver as a list of record and enum
//! types that may `extends` one another and `specialize` inherited field
//! types. This pass materializes every derived type into a flat definition:
//! base fields are prepended in base order, overrides are checked for type
//! compatibility, enum symbol lists are concatenated, and abstract types are
//! replaced by the union of their concrete subtypes. The flattened output
//! feeds [`Names::build`].

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::context::Context;
use crate::error::{Result, ValidationError};
use crate::node::Node;
use crate::schema::{Names, NAMED_TYPES};
use crate::uri::UriSplit;

/// The last segment of a fragment or path; the short name a human wrote.
pub fn shortname(id: &str) -> String {
    let split = UriSplit::parse(id);
    let tail = if !split.fragment.is_empty() {
        split.fragment.split('/').next_back()
    } else {
        split.path.split('/').next_back()
    };
    tail.unwrap_or(id).to_string()
}

fn aslist(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn flatten_into(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        other => out.push(other),
    }
}

fn flatten(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                flatten_into(item, &mut out);
            }
            Value::Array(out)
        }
        other => other,
    }
}

/// A reproducible name for an anonymous inline type, derived from its
/// members so the same shape always gets the same name.
fn anon_name(rec: &serde_json::Map<String, Value>) -> Result<String> {
    if let Some(name) = rec.get("name") {
        return name
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ValidationError::schema(format!("expected name to be a string, was {}", name))
            });
    }
    let atype = rec
        .get("type")
        .and_then(Value::as_str)
        .map(shortname)
        .unwrap_or_default();
    match atype.as_str() {
        "enum" => {
            let mut joined = String::new();
            for sym in rec.get("symbols").map(aslist).unwrap_or_default() {
                if let Some(s) = sym.as_str() {
                    joined.push_str(s);
                }
            }
            Ok(format!("anon.enum_{:x}", Sha256::digest(joined.as_bytes())))
        }
        "record" => {
            let mut joined = String::new();
            for field in rec.get("fields").map(aslist).unwrap_or_default() {
                let fname = field.as_object().and_then(|f| f.get("name")).and_then(Value::as_str);
                match fname {
                    Some(n) => joined.push_str(n),
                    None => {
                        return Err(ValidationError::schema(format!(
                            "expected entries in `fields` to be maps, was {}",
                            field
                        )))
                    }
                }
            }
            Ok(format!("record_{:x}", Sha256::digest(joined.as_bytes())))
        }
        "array" => Ok(String::new()),
        other => Err(ValidationError::schema(format!(
            "expected enum or record, was {}",
            other
        ))),
    }
}

/// Rewrite type references found in `spec` throughout a schema expression.
/// Named types already seen are returned as bare name references so shared
/// and recursive definitions do not duplicate.
pub fn replace_type(
    item: &Value,
    spec: &HashMap<String, Value>,
    ctx: &Context,
    found: &mut HashSet<String>,
    find_embeds: bool,
    deepen: bool,
) -> Result<Value> {
    match item {
        Value::Object(obj) => {
            let atype = obj.get("type").and_then(Value::as_str).map(shortname);
            let is_named = atype
                .as_deref()
                .map(|t| NAMED_TYPES.contains(&t))
                .unwrap_or(false);
            if is_named {
                if let Some(name) = obj.get("name").and_then(Value::as_str) {
                    if found.contains(name) {
                        return Ok(Value::String(name.to_string()));
                    }
                    found.insert(name.to_string());
                }
            }
            if !deepen {
                return Ok(item.clone());
            }
            let mut obj = obj.clone();
            if !obj.contains_key("name") {
                let anon = anon_name(&obj)?;
                if !anon.is_empty() {
                    obj.insert("name".to_string(), Value::String(anon));
                }
            }
            for key in ["type", "items", "fields"] {
                if let Some(v) = obj.get(key) {
                    let mut replaced =
                        replace_type(v, spec, ctx, found, find_embeds, find_embeds)?;
                    if matches!(replaced, Value::Array(_)) {
                        replaced = flatten(replaced);
                    }
                    obj.insert(key.to_string(), replaced);
                }
            }
            Ok(Value::Object(obj))
        }
        Value::Array(items) => {
            let mut out = Vec::new();
            for i in items {
                out.push(replace_type(i, spec, ctx, found, find_embeds, deepen)?);
            }
            Ok(Value::Array(out))
        }
        Value::String(s) => {
            // probe the replacement map under the written form and its
            // vocabulary expansion
            let replacement = spec
                .get(s)
                .or_else(|| ctx.vocab.get(s).and_then(|full| spec.get(full)));
            if let Some(replace_with) = replacement {
                return replace_type(&replace_with.clone(), spec, ctx, found, find_embeds, true);
            }
            found.insert(s.clone());
            Ok(item.clone())
        }
        other => Ok(other.clone()),
    }
}

// Can a field of type `new` override a field of type `base`? Accepts equal
// types, anything under Any, union narrowing, and covariant arrays; enums
// may drop symbols but not add them.
fn is_subtype(base: &Value, new: &Value) -> bool {
    if base == new {
        return true;
    }
    if base.as_str().map(|s| shortname(s) == "Any").unwrap_or(false) {
        return true;
    }
    match (base, new) {
        (Value::Array(b), Value::Array(n)) => {
            n.iter().all(|nv| b.iter().any(|bv| is_subtype(bv, nv)))
        }
        (Value::Array(b), n) => b.iter().any(|bv| is_subtype(bv, n)),
        (_, Value::Array(_)) => false,
        (Value::Object(b), Value::Object(n)) => {
            let bt = b.get("type").and_then(Value::as_str).map(shortname);
            let nt = n.get("type").and_then(Value::as_str).map(shortname);
            match (bt.as_deref(), nt.as_deref()) {
                (Some("array"), Some("array")) => match (b.get("items"), n.get("items")) {
                    (Some(bi), Some(ni)) => is_subtype(bi, ni),
                    _ => false,
                },
                (Some("enum"), Some("enum")) => {
                    let bsyms = b.get("symbols").map(aslist).unwrap_or_default();
                    n.get("symbols")
                        .map(aslist)
                        .unwrap_or_default()
                        .iter()
                        .all(|s| bsyms.contains(s))
                }
                _ => false,
            }
        }
        _ => false,
    }
}

fn def_name(def: &Value) -> Result<String> {
    def.as_object()
        .and_then(|o| o.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ValidationError::schema(format!("type definition has no name: {}", def))
        })
}

fn def_type(def: &Value) -> String {
    def.as_object()
        .and_then(|o| o.get("type"))
        .and_then(Value::as_str)
        .map(shortname)
        .unwrap_or_default()
}

fn is_abstract(def: &Value) -> bool {
    def.as_object()
        .and_then(|o| o.get("abstract"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Apply `extends` and `specialize` to fully materialize derived types.
pub fn extend_and_specialize(items: &[Value], ctx: &Context) -> Result<Vec<Value>> {
    let mut types: HashMap<String, Value> = HashMap::new();
    for item in items {
        types.insert(def_name(item)?, item.clone());
    }

    let mut results: Vec<Value> = Vec::new();
    for item in items {
        let mut stype = item.clone();
        let obj = stype.as_object().cloned().unwrap_or_default();
        if let Some(extends) = obj.get("extends") {
            let name = def_name(&stype)?;
            let stype_type = def_type(&stype);

            let mut specs: HashMap<String, Value> = HashMap::new();
            if let Some(specialize) = obj.get("specialize") {
                for sp in aslist(specialize) {
                    let from = sp.get("specializeFrom").and_then(Value::as_str);
                    let to = sp.get("specializeTo").and_then(Value::as_str);
                    match (from, to) {
                        (Some(f), Some(t)) => {
                            specs.insert(f.to_string(), Value::String(t.to_string()));
                        }
                        _ => {
                            return Err(ValidationError::schema(format!(
                                "`specialize` of {} must have specializeFrom and specializeTo",
                                shortname(&name)
                            )))
                        }
                    }
                }
            }

            let mut exfields: Vec<Value> = Vec::new();
            let mut exsym: Vec<Value> = Vec::new();
            for ex in aslist(extends) {
                let exname = ex.as_str().ok_or_else(|| {
                    ValidationError::schema(format!(
                        "`extends` of {} must be a type name",
                        shortname(&name)
                    ))
                })?;
                let mut basetype = types.get(exname).cloned().ok_or_else(|| {
                    ValidationError::schema(format!(
                        "Extends {} in {} refers to invalid base type.",
                        exname,
                        shortname(&name)
                    ))
                })?;

                if stype_type == "record" {
                    let mut basefields =
                        basetype.get("fields").cloned().unwrap_or(Value::Array(vec![]));
                    if !specs.is_empty() {
                        basefields =
                            replace_type(&basefields, &specs, ctx, &mut HashSet::new(), true, true)?;
                    }
                    for field in aslist(&basefields) {
                        let mut field = field;
                        if let Some(f) = field.as_object_mut() {
                            if !f.contains_key("inherited_from") {
                                f.insert(
                                    "inherited_from".to_string(),
                                    Value::String(exname.to_string()),
                                );
                            }
                        }
                        exfields.push(field);
                    }
                } else if stype_type == "enum" {
                    if let Some(symbols) = basetype.as_object_mut().and_then(|o| o.remove("symbols"))
                    {
                        exsym.extend(aslist(&symbols));
                    }
                }
            }

            if stype_type == "record" {
                // Keep base fields first, in base order; an override replaces
                // the inherited field in place but must stay type-compatible.
                let own_fields = obj.get("fields").map(aslist).unwrap_or_default();
                let mut combined: Vec<Value> = Vec::new();
                let mut taken: HashSet<String> = HashSet::new();
                for exfield in &exfields {
                    let sn = exfield
                        .get("name")
                        .and_then(Value::as_str)
                        .map(shortname)
                        .unwrap_or_default();
                    let own = own_fields.iter().find(|f| {
                        f.get("name").and_then(Value::as_str).map(shortname) == Some(sn.clone())
                    });
                    match own {
                        Some(field) => {
                            let base_t = exfield.get("type").cloned().unwrap_or(Value::Null);
                            let own_t = field.get("type").cloned().unwrap_or(Value::Null);
                            if !is_subtype(&base_t, &own_t) {
                                return Err(ValidationError::schema(format!(
                                    "Field name {} already in use with incompatible type. {} vs {}.",
                                    field.get("name").and_then(Value::as_str).unwrap_or(""),
                                    own_t,
                                    base_t
                                )));
                            }
                            taken.insert(sn);
                            combined.push(field.clone());
                        }
                        None => {
                            taken.insert(sn);
                            combined.push(exfield.clone());
                        }
                    }
                }
                for field in &own_fields {
                    let sn = field
                        .get("name")
                        .and_then(Value::as_str)
                        .map(shortname)
                        .unwrap_or_default();
                    if !taken.contains(&sn) {
                        combined.push(field.clone());
                    }
                }

                let mut fieldnames: HashSet<String> = HashSet::new();
                for field in &combined {
                    let fname = field.get("name").and_then(Value::as_str).unwrap_or("");
                    if !fieldnames.insert(fname.to_string()) {
                        return Err(ValidationError::schema(format!(
                            "Field name {} appears twice in {}",
                            fname, name
                        )));
                    }
                }
                if let Some(o) = stype.as_object_mut() {
                    o.insert("fields".to_string(), Value::Array(combined));
                }
            } else if stype_type == "enum" {
                if let Some(o) = stype.as_object_mut() {
                    exsym.extend(o.get("symbols").map(aslist).unwrap_or_default());
                    o.insert("symbols".to_string(), Value::Array(exsym));
                }
            }

            types.insert(name, stype.clone());
        }
        results.push(stype);
    }

    // Abstract bases become the union of their concrete subtypes, referenced
    // by name.
    let ex_types: HashMap<String, Value> = results
        .iter()
        .map(|r| Ok((def_name(r)?, r.clone())))
        .collect::<Result<_>>()?;
    let mut extended_by: HashMap<String, Value> = HashMap::new();
    for result in &results {
        if let Some(extends) = result.get("extends") {
            for ex in aslist(extends) {
                let Some(exname) = ex.as_str() else { continue };
                if ex_types.get(exname).map(is_abstract).unwrap_or(false) {
                    let entry = extended_by
                        .entry(exname.to_string())
                        .or_insert(Value::Array(vec![]));
                    if let Value::Array(subs) = entry {
                        subs.push(Value::String(def_name(result)?));
                    }
                }
            }
        }
    }

    for result in &results {
        if is_abstract(result) && !extended_by.contains_key(&def_name(result)?) {
            return Err(ValidationError::schema(format!(
                "{} is abstract but missing a concrete subtype",
                def_name(result)?
            )));
        }
    }

    let mut out = Vec::new();
    for mut result in results {
        if let Some(o) = result.as_object_mut() {
            if let Some(fields) = o.get("fields") {
                let replaced =
                    replace_type(fields, &extended_by, ctx, &mut HashSet::new(), true, true)?;
                o.insert("fields".to_string(), replaced);
            }
        }
        out.push(result);
    }
    Ok(out)
}

// Field names and enum symbols carry their full identifier URIs out of the
// resolver; the flattened model wants the short names a document writes.
fn shorten(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            if let Some(Value::Array(fields)) = obj.get_mut("fields") {
                for field in fields {
                    if let Some(f) = field.as_object_mut() {
                        if let Some(name) = f.get("name").and_then(Value::as_str) {
                            let short = shortname(name);
                            f.insert("name".to_string(), Value::String(short));
                        }
                    }
                    if let Some(f) = field.as_object_mut() {
                        if let Some(t) = f.get_mut("type") {
                            shorten(t);
                        }
                    }
                }
            }
            if let Some(Value::Array(symbols)) = obj.get_mut("symbols") {
                for sym in symbols {
                    if let Some(s) = sym.as_str() {
                        *sym = Value::String(shortname(s));
                    }
                }
            }
            if let Some(items) = obj.get_mut("items") {
                shorten(items);
            }
            if let Some(t) = obj.get_mut("type") {
                if !t.is_string() {
                    shorten(t);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                shorten(item);
            }
        }
        _ => {}
    }
}

/// Flatten a resolved schema graph into a [`Names`] registry: specialize,
/// drop abstract types, shorten field names and symbols, register.
pub fn make_names(schema_doc: &Node, ctx: &Context) -> Result<Names> {
    let items: Vec<Value> = match schema_doc {
        Node::Sequence(s) => s.iter().map(Node::to_json).collect(),
        _ => {
            return Err(ValidationError::schema(
                "schema document must resolve to a list of type definitions",
            ))
        }
    };
    let specialized = extend_and_specialize(&items, ctx)?;
    let mut defs = Vec::new();
    for def in specialized {
        if is_abstract(&def) {
            continue;
        }
        let mut def = def;
        shorten(&mut def);
        defs.push(def);
    }
    Names::build(&defs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{NamedSchema, Schema};
    use serde_json::json;

    fn ctx() -> Context {
        Context::default()
    }

    #[test]
    fn test_shortname() {
        assert_eq!(shortname("https://x.org/v#Step/out"), "out");
        assert_eq!(shortname("https://x.org/v#Step"), "Step");
        assert_eq!(shortname("https://x.org/path/Step"), "Step");
        assert_eq!(shortname("Step"), "Step");
    }

    #[test]
    fn test_extends_prepends_base_fields() {
        let items = vec![
            json!({"type": "record", "name": "Base",
                   "fields": [{"name": "Base/id", "type": "string"}]}),
            json!({"type": "record", "name": "Derived", "extends": "Base",
                   "fields": [{"name": "Derived/extra", "type": "int"}]}),
        ];
        let out = extend_and_specialize(&items, &ctx()).unwrap();
        let derived = &out[1];
        let fields = derived.get("fields").unwrap().as_array().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].get("name").unwrap(), "Base/id");
        assert_eq!(fields[0].get("inherited_from").unwrap(), "Base");
        assert_eq!(fields[1].get("name").unwrap(), "Derived/extra");
    }

    #[test]
    fn test_override_same_type_allowed() {
        let items = vec![
            json!({"type": "record", "name": "Base",
                   "fields": [{"name": "Base/id", "type": ["null", "string"]}]}),
            json!({"type": "record", "name": "Derived", "extends": "Base",
                   "fields": [{"name": "Derived/id", "type": "string"}]}),
        ];
        let out = extend_and_specialize(&items, &ctx()).unwrap();
        let fields = out[1].get("fields").unwrap().as_array().unwrap();
        assert_eq!(fields.len(), 1);
        // the override wins, narrowing the union
        assert_eq!(fields[0].get("type").unwrap(), &json!("string"));
    }

    #[test]
    fn test_incompatible_override_rejected() {
        let items = vec![
            json!({"type": "record", "name": "Base",
                   "fields": [{"name": "Base/id", "type": "string"}]}),
            json!({"type": "record", "name": "Derived", "extends": "Base",
                   "fields": [{"name": "Derived/id", "type": "int"}]}),
        ];
        let err = extend_and_specialize(&items, &ctx()).unwrap_err();
        assert!(err.message.contains("incompatible type"));
    }

    #[test]
    fn test_enum_symbols_concatenate() {
        let items = vec![
            json!({"type": "enum", "name": "BaseE", "symbols": ["a"]}),
            json!({"type": "enum", "name": "DerivedE", "extends": "BaseE", "symbols": ["b"]}),
        ];
        let out = extend_and_specialize(&items, &ctx()).unwrap();
        assert_eq!(out[1].get("symbols").unwrap(), &json!(["a", "b"]));
    }

    #[test]
    fn test_specialize_rewrites_base_field_types() {
        let items = vec![
            json!({"type": "record", "name": "Generic",
                   "fields": [{"name": "Generic/payload", "type": "Generic"}]}),
            json!({"type": "record", "name": "Narrow", "extends": "Generic",
                   "specialize": [{"specializeFrom": "Generic", "specializeTo": "Narrow"}],
                   "fields": []}),
        ];
        let out = extend_and_specialize(&items, &ctx()).unwrap();
        let fields = out[1].get("fields").unwrap().as_array().unwrap();
        assert_eq!(fields[0].get("type").unwrap(), &json!("Narrow"));
    }

    #[test]
    fn test_abstract_replaced_by_concrete_union() {
        let items = vec![
            json!({"type": "record", "name": "Abstr", "abstract": true,
                   "fields": [{"name": "Abstr/id", "type": "string"}]}),
            json!({"type": "record", "name": "Conc", "extends": "Abstr", "fields": []}),
            json!({"type": "record", "name": "User",
                   "fields": [{"name": "User/ref", "type": "Abstr"}]}),
        ];
        let out = extend_and_specialize(&items, &ctx()).unwrap();
        let fields = out[2].get("fields").unwrap().as_array().unwrap();
        assert_eq!(fields[0].get("type").unwrap(), &json!(["Conc"]));
    }

    #[test]
    fn test_abstract_without_concrete_subtype_fails() {
        let items = vec![json!({"type": "record", "name": "Abstr", "abstract": true,
                                "fields": []})];
        let err = extend_and_specialize(&items, &ctx()).unwrap_err();
        assert!(err.message.contains("missing a concrete subtype"));
    }

    #[test]
    fn test_make_names_shortens_and_drops_abstract() {
        let mut seq = crate::node::Sequence::new();
        for v in [
            json!({"type": "record", "name": "https://x.org/v#Abstr", "abstract": true,
                   "fields": [{"name": "https://x.org/v#Abstr/id", "type": "string"}]}),
            json!({"type": "record", "name": "https://x.org/v#Conc",
                   "extends": "https://x.org/v#Abstr", "documentRoot": true,
                   "fields": [{"name": "https://x.org/v#Conc/x", "type": "int"}]}),
        ] {
            seq.push(Node::from_json(&v));
        }
        let names = make_names(&Node::Sequence(seq), &ctx()).unwrap();
        assert!(!names.contains("https://x.org/v#Abstr"));
        let conc = names.get("https://x.org/v#Conc").unwrap();
        match conc {
            NamedSchema::Record(r) => {
                assert_eq!(r.fields[0].name, "id");
                assert_eq!(r.fields[0].inherited_from.as_deref(), Some("https://x.org/v#Abstr"));
                assert_eq!(r.fields[1].name, "x");
                assert_eq!(r.fields[1].schema, Schema::Int);
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_anon_names_are_reproducible() {
        let a = json!({"type": "enum", "symbols": ["x", "y"]});
        let b = json!({"type": "enum", "symbols": ["x", "y"]});
        let na = anon_name(a.as_object().unwrap()).unwrap();
        let nb = anon_name(b.as_object().unwrap()).unwrap();
        assert_eq!(na, nb);
        assert!(na.starts_with("anon.enum_"));
    }
}
