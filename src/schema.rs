//! Typed schema model.
//!
//! A schema may be a record mapping field names to typed values, an enum of
//! symbols, an array, a union of alternatives, a primitive, or `Any`. Named
//! types live in a [`Names`] registry keyed by their full URI; [`Schema`]
//! values reference them by name rather than inlining, so recursive and
//! mutually-recursive definitions need no special casing. The registry is
//! built from plain JSON definitions after specialization has flattened
//! inheritance.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{ErrorKind, Result, ValidationError};
use crate::specialize::shortname;

pub const PRIMITIVE_TYPES: &[&str] =
    &["null", "boolean", "string", "int", "long", "float", "double"];

pub const NAMED_TYPES: &[&str] = &["record", "enum"];

/// A closed schema shape. Record and enum definitions are registered in
/// [`Names`] and referenced here by full name.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    /// Matches any non-null value.
    Any,
    Array(Box<Schema>),
    Union(Vec<Schema>),
    Named(String),
}

impl Schema {
    pub fn from_primitive(name: &str) -> Option<Schema> {
        match name {
            "null" => Some(Schema::Null),
            "boolean" => Some(Schema::Boolean),
            "int" => Some(Schema::Int),
            "long" => Some(Schema::Long),
            "float" => Some(Schema::Float),
            "double" => Some(Schema::Double),
            "string" => Some(Schema::String),
            _ => None,
        }
    }

    /// Human-oriented rendering used in "tried X but" messages.
    pub fn friendly(&self) -> String {
        match self {
            Schema::Null => "null".to_string(),
            Schema::Boolean => "boolean".to_string(),
            Schema::Int => "int".to_string(),
            Schema::Long => "long".to_string(),
            Schema::Float => "float".to_string(),
            Schema::Double => "double".to_string(),
            Schema::String => "string".to_string(),
            Schema::Any => "Any".to_string(),
            Schema::Array(items) => format!("array of <{}>", items.friendly()),
            Schema::Union(alts) => alts
                .iter()
                .map(Schema::friendly)
                .collect::<Vec<_>>()
                .join(" or "),
            Schema::Named(name) => shortname(name),
        }
    }
}

/// One field of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
    pub default: Option<Value>,
    pub doc: Option<String>,
    /// Full name of the base record this field was inherited from, if any.
    pub inherited_from: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<Field>,
    pub document_root: bool,
    pub doc: Option<String>,
}

impl RecordSchema {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumSchema {
    pub name: String,
    pub symbols: Vec<String>,
    pub document_root: bool,
    pub doc: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NamedSchema {
    Record(RecordSchema),
    Enum(EnumSchema),
}

impl NamedSchema {
    pub fn name(&self) -> &str {
        match self {
            NamedSchema::Record(r) => &r.name,
            NamedSchema::Enum(e) => &e.name,
        }
    }

    pub fn document_root(&self) -> bool {
        match self {
            NamedSchema::Record(r) => r.document_root,
            NamedSchema::Enum(e) => e.document_root,
        }
    }
}

/// Registry of named types, in definition order.
#[derive(Debug, Clone, Default)]
pub struct Names {
    names: IndexMap<String, NamedSchema>,
}

impl Names {
    /// Build the registry from flattened type definitions, then verify that
    /// every by-name reference resolves.
    pub fn build(defs: &[Value]) -> Result<Names> {
        let mut names = Names::default();
        for def in defs {
            names.parse(def)?;
        }
        names.verify_references()?;
        Ok(names)
    }

    pub fn get(&self, name: &str) -> Option<&NamedSchema> {
        self.names.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedSchema> {
        self.names.values()
    }

    pub fn document_roots(&self) -> Vec<&NamedSchema> {
        self.names.values().filter(|n| n.document_root()).collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Parse a schema expression, registering any named definitions it
    /// contains.
    pub fn parse(&mut self, value: &Value) -> Result<Schema> {
        match value {
            Value::String(s) => {
                if let Some(p) = Schema::from_primitive(s) {
                    return Ok(p);
                }
                if s == "Any" || shortname(s) == "Any" {
                    return Ok(Schema::Any);
                }
                // a by-name reference, checked in verify_references
                Ok(Schema::Named(s.clone()))
            }
            Value::Array(items) => {
                let mut alts = Vec::new();
                for item in items {
                    let alt = self.parse(item)?;
                    if matches!(alt, Schema::Union(_)) {
                        return Err(ValidationError::schema(
                            "unions cannot contain other unions",
                        ));
                    }
                    if !matches!(alt, Schema::Named(_)) && alts.contains(&alt) {
                        return Err(ValidationError::schema(format!(
                            "`{}` type already in union",
                            alt.friendly()
                        )));
                    }
                    alts.push(alt);
                }
                Ok(Schema::Union(alts))
            }
            Value::Object(obj) => {
                let atype = obj.get("type").and_then(Value::as_str).ok_or_else(|| {
                    ValidationError::schema(format!("no `type` property in schema: {}", value))
                })?;
                let atype = shortname(atype);
                if let Some(p) = Schema::from_primitive(&atype) {
                    return Ok(p);
                }
                match atype.as_str() {
                    "array" => {
                        let items = obj.get("items").ok_or_else(|| {
                            ValidationError::schema("array schema is missing `items`")
                        })?;
                        Ok(Schema::Array(Box::new(self.parse(items)?)))
                    }
                    "record" => self.parse_record(obj),
                    "enum" => self.parse_enum(obj),
                    other => Err(ValidationError::schema(format!("undefined type: {}", other))),
                }
            }
            other => Err(ValidationError::schema(format!(
                "cannot make a schema from: {}",
                other
            ))),
        }
    }

    fn parse_record(&mut self, obj: &serde_json::Map<String, Value>) -> Result<Schema> {
        let name = named_type_name(obj)?;
        let mut fields = Vec::new();
        let mut field_names: Vec<String> = Vec::new();
        if let Some(raw) = obj.get("fields") {
            let raw = raw.as_array().ok_or_else(|| {
                ValidationError::schema(format!("`fields` of record `{}` must be a list", name))
            })?;
            for f in raw {
                let f = f.as_object().ok_or_else(|| {
                    ValidationError::schema(format!("not a valid field: {}", f))
                })?;
                let fname = f
                    .get("name")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        ValidationError::schema(format!(
                            "fields of record `{}` must have a non-empty name",
                            name
                        ))
                    })?;
                if field_names.iter().any(|n| n == fname) {
                    return Err(ValidationError::schema(format!(
                        "field name {} already in use",
                        fname
                    )));
                }
                field_names.push(fname.to_string());
                let ftype = f.get("type").ok_or_else(|| {
                    ValidationError::schema(format!(
                        "field `{}` of record `{}` has no type",
                        fname, name
                    ))
                })?;
                let schema = self.parse(ftype).map_err(|e| {
                    ValidationError::wrap(
                        format!("type of field `{}` is not a valid schema", fname),
                        None,
                        vec![e],
                        "",
                    )
                    .with_kind(ErrorKind::Schema)
                })?;
                fields.push(Field {
                    name: fname.to_string(),
                    schema,
                    default: f.get("default").cloned(),
                    doc: doc_string(f),
                    inherited_from: f
                        .get("inherited_from")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
        }
        let record = NamedSchema::Record(RecordSchema {
            name: name.clone(),
            fields,
            document_root: bool_prop(obj, "documentRoot"),
            doc: doc_string(obj),
        });
        self.register(name, record)
    }

    fn parse_enum(&mut self, obj: &serde_json::Map<String, Value>) -> Result<Schema> {
        let name = named_type_name(obj)?;
        let raw = obj
            .get("symbols")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ValidationError::schema(format!(
                    "enum `{}` requires a list for the symbols property",
                    name
                ))
            })?;
        let mut symbols = Vec::new();
        for sym in raw {
            let s = sym.as_str().ok_or_else(|| {
                ValidationError::schema(format!(
                    "enum `{}` requires all symbols to be strings",
                    name
                ))
            })?;
            if symbols.iter().any(|existing| existing == s) {
                return Err(ValidationError::schema(format!(
                    "duplicate symbol `{}` in enum `{}`",
                    s, name
                )));
            }
            symbols.push(s.to_string());
        }
        let en = NamedSchema::Enum(EnumSchema {
            name: name.clone(),
            symbols,
            document_root: bool_prop(obj, "documentRoot"),
            doc: doc_string(obj),
        });
        self.register(name, en)
    }

    // Registration is idempotent for identical definitions; the same inline
    // type can legitimately appear from several expansion sites.
    fn register(&mut self, name: String, schema: NamedSchema) -> Result<Schema> {
        match self.names.get(&name) {
            None => {
                self.names.insert(name.clone(), schema);
                Ok(Schema::Named(name))
            }
            Some(existing) if *existing == schema => Ok(Schema::Named(name)),
            Some(_) => Err(ValidationError::schema(format!(
                "the name `{}` is already in use with a different definition",
                name
            ))),
        }
    }

    fn verify_references(&self) -> Result<()> {
        let mut errors = Vec::new();
        for schema in self.names.values() {
            if let NamedSchema::Record(r) = schema {
                for f in &r.fields {
                    self.verify_schema(&f.schema, &r.name, &f.name, &mut errors);
                }
            }
        }
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.pop().unwrap()),
            _ => Err(ValidationError::wrap("", None, errors, "*").with_kind(ErrorKind::Schema)),
        }
    }

    fn verify_schema(
        &self,
        schema: &Schema,
        record: &str,
        field: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        match schema {
            Schema::Named(name) => {
                if !self.names.contains_key(name) {
                    errors.push(ValidationError::schema(format!(
                        "field `{}` of `{}` references unknown type `{}` (known: {})",
                        field,
                        shortname(record),
                        name,
                        self.names
                            .keys()
                            .map(|k| shortname(k))
                            .collect::<Vec<_>>()
                            .join(", ")
                    )));
                }
            }
            Schema::Array(items) => self.verify_schema(items, record, field, errors),
            Schema::Union(alts) => {
                for alt in alts {
                    self.verify_schema(alt, record, field, errors);
                }
            }
            _ => {}
        }
    }
}

fn named_type_name(obj: &serde_json::Map<String, Value>) -> Result<String> {
    obj.get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ValidationError::schema("named schemas must have a non-empty name"))
}

fn bool_prop(obj: &serde_json::Map<String, Value>, key: &str) -> bool {
    obj.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn doc_string(obj: &serde_json::Map<String, Value>) -> Option<String> {
    match obj.get("doc") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(parts)) => Some(
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}
