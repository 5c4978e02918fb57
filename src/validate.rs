//! Structural document validation against a flattened schema.
//!
//! A [`Checker`] matches concrete document nodes against the record, enum,
//! array, and union shapes in a [`Names`] registry. Matching comes in two
//! speeds: [`Checker::conforms`] is a cheap boolean probe used to pick a
//! union alternative or document root, and [`Checker::check`] re-validates
//! the failing branch to produce the detailed nested error report.

use std::collections::HashSet;

use crate::error::{ErrorKind, Result, ValidationError};
use crate::node::Node;
use crate::resolver::Loader;
use crate::schema::{Names, NamedSchema, RecordSchema, Schema};
use crate::sourceline::{relname, SourceRef};
use crate::specialize::shortname;
use crate::uri::UriSplit;

const INT_MIN: i64 = -(1 << 31);
const INT_MAX: i64 = (1 << 31) - 1;

/// Validate a resolved document against the schema's document roots.
///
/// A mapping is treated as a one-element batch; a sequence validates each
/// item. Every item must match at least one `documentRoot` type; failures
/// report "tried X but" for every candidate root, except that a matching
/// `class` discriminator pins the report to that root alone.
pub fn validate_document(
    names: &Names,
    document: &Node,
    loader: &Loader,
    strict: bool,
    strict_foreign_properties: bool,
) -> Result<()> {
    let roots = names.document_roots();
    if roots.is_empty() {
        return Err(ValidationError::new("No document roots defined in the schema"));
    }

    let items: Vec<&Node> = match document {
        Node::Sequence(s) => s.iter().collect(),
        Node::Mapping(_) => vec![document],
        _ => {
            return Err(ValidationError::new(
                "Document must be a mapping or a sequence",
            ))
        }
    };

    let checker = Checker {
        names,
        identifiers: &loader.context().identifiers,
        foreign_properties: loader.foreign_properties(),
        strict,
        strict_foreign_properties,
    };

    let mut anyerrors = Vec::new();
    for (pos, item) in items.iter().enumerate() {
        let sr = match document {
            Node::Sequence(s) => SourceRef::of_item(s, pos),
            _ => SourceRef::of(item),
        };
        if roots
            .iter()
            .any(|root| checker.conforms(&Schema::Named(root.name().to_string()), item))
        {
            continue;
        }

        let mut errors = Vec::new();
        for root in &roots {
            let schema = Schema::Named(root.name().to_string());
            if let Err(e) = checker.check(&schema, item) {
                let classmatch = e.is_class_validation();
                let wrapped = ValidationError::wrap(
                    format!("tried `{}` but", shortname(root.name())),
                    Some(&sr),
                    vec![e],
                    "",
                );
                if classmatch {
                    // the class discriminator matched this root; other
                    // alternatives are noise
                    errors = vec![wrapped.with_kind(ErrorKind::ClassValidation)];
                    break;
                }
                errors.push(wrapped);
            }
        }

        let mut objerr = "Invalid".to_string();
        for ident in &loader.context().identifiers {
            if let Some(m) = item.as_mapping() {
                if let Some(id) = m.get_str(ident) {
                    objerr = format!("Object `{}` is not valid because", relname(id));
                    break;
                }
            }
        }
        anyerrors.push(ValidationError::wrap(objerr, Some(&sr), errors, "-"));
    }

    if anyerrors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::wrap("", None, anyerrors, "*"))
    }
}

/// Matches document nodes against schema shapes.
pub struct Checker<'a> {
    pub names: &'a Names,
    pub identifiers: &'a [String],
    pub foreign_properties: &'a HashSet<String>,
    pub strict: bool,
    pub strict_foreign_properties: bool,
}

impl<'a> Checker<'a> {
    /// Cheap boolean probe: does `datum` match `schema`?
    pub fn conforms(&self, schema: &Schema, datum: &Node) -> bool {
        match schema {
            Schema::Null => datum.is_null(),
            Schema::Boolean => matches!(datum, Node::Bool(_)),
            Schema::String => matches!(datum, Node::String(_)),
            Schema::Int => matches!(datum, Node::Int(i) if (INT_MIN..=INT_MAX).contains(i)),
            Schema::Long => matches!(datum, Node::Int(_)),
            Schema::Float | Schema::Double => matches!(datum, Node::Int(_) | Node::Float(_)),
            Schema::Any => !datum.is_null(),
            Schema::Array(items) => match datum {
                Node::Sequence(s) => s.iter().all(|d| self.conforms(items, d)),
                _ => false,
            },
            Schema::Union(alts) => alts.iter().any(|alt| self.conforms(alt, datum)),
            Schema::Named(name) => match self.names.get(name) {
                Some(NamedSchema::Enum(e)) => match datum.as_str() {
                    Some(s) => e.symbols.iter().any(|sym| sym == s),
                    None => false,
                },
                Some(NamedSchema::Record(r)) => self.check_record(r, datum).is_ok(),
                None => false,
            },
        }
    }

    /// Detailed validation, producing the full error tree on mismatch.
    pub fn check(&self, schema: &Schema, datum: &Node) -> Result<()> {
        match schema {
            Schema::Null => {
                if datum.is_null() {
                    Ok(())
                } else {
                    Err(ValidationError::new("the value is not null"))
                }
            }
            Schema::Boolean => {
                if matches!(datum, Node::Bool(_)) {
                    Ok(())
                } else {
                    Err(ValidationError::new("the value is not boolean"))
                }
            }
            Schema::String => {
                if matches!(datum, Node::String(_)) {
                    Ok(())
                } else {
                    Err(ValidationError::new("the value is not string"))
                }
            }
            Schema::Int => match datum {
                Node::Int(i) if (INT_MIN..=INT_MAX).contains(i) => Ok(()),
                _ => Err(ValidationError::new(format!(
                    "`{}` is not int",
                    datum.preview()
                ))),
            },
            Schema::Long => match datum {
                Node::Int(_) => Ok(()),
                _ => Err(ValidationError::new(format!(
                    "the value `{}` is not long",
                    datum.preview()
                ))),
            },
            Schema::Float | Schema::Double => match datum {
                Node::Int(_) | Node::Float(_) => Ok(()),
                _ => Err(ValidationError::new(format!(
                    "the value `{}` is not float or double",
                    datum.preview()
                ))),
            },
            Schema::Any => {
                if datum.is_null() {
                    Err(ValidationError::new("'Any' type must be non-null"))
                } else {
                    Ok(())
                }
            }
            Schema::Array(items) => self.check_array(items, datum),
            Schema::Union(alts) => self.check_union(alts, datum),
            Schema::Named(name) => match self.names.get(name) {
                Some(NamedSchema::Enum(e)) => match datum.as_str() {
                    Some(s) if e.symbols.iter().any(|sym| sym == s) => Ok(()),
                    Some(s) => Err(ValidationError::new(format!(
                        "the value `{}` is not a valid {}, expected {}'{}'",
                        s,
                        shortname(&e.name),
                        if e.symbols.len() > 1 { "one of " } else { "" },
                        e.symbols.join("', '")
                    ))),
                    None => Err(ValidationError::new(format!(
                        "value is a {} but expected a string",
                        datum.type_name()
                    ))),
                },
                Some(NamedSchema::Record(r)) => self.check_record(r, datum),
                None => Err(ValidationError::schema(format!(
                    "unrecognized schema type `{}`",
                    name
                ))),
            },
        }
    }

    fn check_array(&self, items: &Schema, datum: &Node) -> Result<()> {
        let seq = match datum {
            Node::Sequence(s) => s,
            _ => {
                return Err(ValidationError::new(format!(
                    "the value `{}` is not a list, expected list of {}",
                    datum.preview(),
                    items.friendly()
                )))
            }
        };
        for (i, d) in seq.iter().enumerate() {
            if let Err(e) = self.check(items, d) {
                return Err(ValidationError::wrap(
                    "item is invalid because",
                    Some(&SourceRef::of_item(seq, i)),
                    vec![e],
                    "",
                ));
            }
        }
        Ok(())
    }

    fn check_union(&self, alts: &[Schema], datum: &Node) -> Result<()> {
        if alts.iter().any(|alt| self.conforms(alt, datum)) {
            return Ok(());
        }

        // Re-validate only the alternatives whose shape can plausibly match,
        // so the report doesn't drown in irrelevant "not a string" noise.
        let mut errors = Vec::new();
        let mut checked = Vec::new();
        for alt in alts {
            let skip = match datum {
                Node::Sequence(_) => !matches!(alt, Schema::Array(_)),
                Node::Mapping(_) => !matches!(alt, Schema::Named(n)
                    if matches!(self.names.get(n), Some(NamedSchema::Record(_)))),
                Node::Bool(_) | Node::Int(_) | Node::Float(_) | Node::String(_) => {
                    matches!(alt, Schema::Array(_))
                        || matches!(alt, Schema::Named(n)
                            if matches!(self.names.get(n), Some(NamedSchema::Record(_))))
                }
                Node::Null => false,
            };
            if skip || (!datum.is_null() && *alt == Schema::Null) {
                continue;
            }
            checked.push(alt);
            match self.check(alt, datum) {
                Ok(()) => {}
                Err(e) if e.is_class_validation() => return Err(e),
                Err(e) => errors.push(ValidationError::wrap(
                    format!("tried {} but", alt.friendly()),
                    None,
                    vec![e],
                    "",
                )),
            }
        }
        if errors.is_empty() {
            return Err(ValidationError::new(format!(
                "value is a {}, expected {}",
                datum.type_name(),
                Schema::Union(alts.to_vec()).friendly()
            )));
        }
        Err(ValidationError::wrap("", None, errors, "-"))
    }

    fn check_record(&self, record: &RecordSchema, datum: &Node) -> Result<()> {
        let m = match datum {
            Node::Mapping(m) => m,
            _ => return Err(ValidationError::new("the value is not a mapping")),
        };

        // A `class` field is a discriminator: mismatch rules this record out
        // entirely, a match pins the union/root report to this branch.
        let mut classmatch = false;
        if let Some(f) = record.field("class") {
            let d = m.get_str(&f.name);
            match d {
                None => return Err(ValidationError::new("Missing 'class' field")),
                Some(d) if d != shortname(&record.name) && d != record.name => {
                    return Err(ValidationError::new(format!(
                        "Expected class '{}' but this is '{}'",
                        shortname(&record.name),
                        d
                    )))
                }
                Some(_) => classmatch = true,
            }
        }

        let mut errors = Vec::new();
        for f in &record.fields {
            if f.name == "class" {
                continue;
            }
            let present = m.contains_key(&f.name);
            let fieldval = match m.get(&f.name) {
                Some(v) => v.clone(),
                None => match &f.default {
                    Some(d) => Node::from_json(d),
                    None => Node::Null,
                },
            };
            if let Err(e) = self.check(&f.schema, &fieldval) {
                if !present {
                    errors.push(ValidationError::new(format!(
                        "missing required field `{}`",
                        f.name
                    )));
                } else {
                    errors.push(ValidationError::wrap(
                        format!("the `{}` field is not valid because", f.name),
                        Some(&SourceRef::of_key(m, &f.name)),
                        vec![e],
                        "",
                    ));
                }
            }
        }

        for (key, _) in m.iter() {
            if record.fields.iter().any(|f| &f.name == key) {
                continue;
            }
            if self.identifiers.iter().any(|i| i == key)
                || self.foreign_properties.contains(key)
                || key.starts_with('@')
                || key.starts_with('$')
            {
                continue;
            }
            let sr = SourceRef::of_key(m, key);
            if !UriSplit::parse(key).scheme.is_empty() {
                // a fully-qualified key: an extension field from $schemas
                let err = ValidationError::at(
                    &sr,
                    format!(
                        "unrecognized extension field `{}`{}{}",
                        key,
                        if self.strict_foreign_properties {
                            " and strict foreign property checking is enabled"
                        } else {
                            ""
                        },
                        if self.foreign_properties.is_empty() {
                            String::new()
                        } else {
                            let mut fps: Vec<&str> =
                                self.foreign_properties.iter().map(String::as_str).collect();
                            fps.sort();
                            format!(
                                ".\nForeign properties from $schemas:\n  {}",
                                fps.join("\n  ")
                            )
                        }
                    ),
                );
                if self.strict_foreign_properties {
                    errors.push(err);
                } else {
                    tracing::warn!("{}", err.into_warning().one_line());
                }
            } else {
                let err = ValidationError::at(
                    &sr,
                    format!(
                        "invalid field `{}`, expected one of: {}",
                        key,
                        record
                            .fields
                            .iter()
                            .map(|f| format!("'{}'", f.name))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                );
                if self.strict {
                    errors.push(err);
                } else {
                    tracing::warn!("{}", err.into_warning().one_line());
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            let err = ValidationError::wrap("", None, errors, "*");
            if classmatch {
                Err(err.with_kind(ErrorKind::ClassValidation))
            } else {
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Mapping, Sequence};
    use serde_json::json;

    fn names() -> Names {
        Names::build(&[
            json!({
                "type": "record",
                "name": "https://x.org/v#Step",
                "documentRoot": true,
                "fields": [
                    {"name": "class", "type": "string"},
                    {"name": "run", "type": "string"},
                    {"name": "retries", "type": ["null", "int"], "default": null},
                    {"name": "mode", "type": ["null", {
                        "type": "enum", "name": "https://x.org/v#Mode",
                        "symbols": ["fast", "safe"]
                    }]}
                ]
            }),
        ])
        .unwrap()
    }

    fn checker<'a>(names: &'a Names, idents: &'a [String], fp: &'a HashSet<String>) -> Checker<'a> {
        Checker {
            names,
            identifiers: idents,
            foreign_properties: fp,
            strict: true,
            strict_foreign_properties: false,
        }
    }

    fn step(class: &str, run: Option<&str>) -> Node {
        let mut m = Mapping::new();
        m.insert("class", Node::from(class));
        if let Some(r) = run {
            m.insert("run", Node::from(r));
        }
        Node::Mapping(m)
    }

    #[test]
    fn test_record_conforms() {
        let n = names();
        let idents = vec![];
        let fp = HashSet::new();
        let c = checker(&n, &idents, &fp);
        let schema = Schema::Named("https://x.org/v#Step".to_string());
        assert!(c.conforms(&schema, &step("Step", Some("echo"))));
        assert!(!c.conforms(&schema, &step("Step", None)));
    }

    #[test]
    fn test_missing_required_field() {
        let n = names();
        let idents = vec![];
        let fp = HashSet::new();
        let c = checker(&n, &idents, &fp);
        let schema = Schema::Named("https://x.org/v#Step".to_string());
        let err = c.check(&schema, &step("Step", None)).unwrap_err();
        assert!(err.pretty().contains("missing required field `run`"));
    }

    #[test]
    fn test_class_mismatch_is_cheap_rejection() {
        let n = names();
        let idents = vec![];
        let fp = HashSet::new();
        let c = checker(&n, &idents, &fp);
        let schema = Schema::Named("https://x.org/v#Step".to_string());
        let err = c.check(&schema, &step("Other", Some("echo"))).unwrap_err();
        assert!(err.message.contains("Expected class 'Step'"));
        assert!(!err.is_class_validation());
    }

    #[test]
    fn test_class_match_marks_class_validation() {
        let n = names();
        let idents = vec![];
        let fp = HashSet::new();
        let c = checker(&n, &idents, &fp);
        let schema = Schema::Named("https://x.org/v#Step".to_string());
        let err = c.check(&schema, &step("Step", None)).unwrap_err();
        assert!(err.is_class_validation());
    }

    #[test]
    fn test_enum_error_lists_symbols() {
        let n = names();
        let idents = vec![];
        let fp = HashSet::new();
        let c = checker(&n, &idents, &fp);
        let mut m = Mapping::new();
        m.insert("class", Node::from("Step"));
        m.insert("run", Node::from("echo"));
        m.insert("mode", Node::from("turbo"));
        let schema = Schema::Named("https://x.org/v#Step".to_string());
        let err = c.check(&schema, &Node::Mapping(m)).unwrap_err();
        let text = err.pretty();
        assert!(text.contains("not a valid Mode"));
        assert!(text.contains("'fast', 'safe'"));
    }

    #[test]
    fn test_int_range() {
        let n = Names::default();
        let idents = vec![];
        let fp = HashSet::new();
        let c = checker(&n, &idents, &fp);
        assert!(c.check(&Schema::Int, &Node::Int(1 << 40)).is_err());
        assert!(c.check(&Schema::Long, &Node::Int(1 << 40)).is_ok());
        assert!(c.check(&Schema::Float, &Node::Int(3)).is_ok());
    }

    #[test]
    fn test_union_skips_implausible_shapes() {
        let n = names();
        let idents = vec![];
        let fp = HashSet::new();
        let c = checker(&n, &idents, &fp);
        let union = Schema::Union(vec![
            Schema::Null,
            Schema::Int,
            Schema::Named("https://x.org/v#Step".to_string()),
        ]);
        let err = c.check(&union, &Node::from("nope")).unwrap_err();
        let text = err.pretty();
        // the record and null branches are shape-incompatible with a string
        assert!(text.contains("tried int but"));
        assert!(!text.contains("tried Step but"));
    }

    #[test]
    fn test_array_items_checked_positionally() {
        let n = Names::default();
        let idents = vec![];
        let fp = HashSet::new();
        let c = checker(&n, &idents, &fp);
        let mut s = Sequence::new();
        s.push(Node::Int(1));
        s.push(Node::from("two"));
        let err = c
            .check(&Schema::Array(Box::new(Schema::Int)), &Node::Sequence(s))
            .unwrap_err();
        assert!(err.pretty().contains("item is invalid because"));
    }

    #[test]
    fn test_unknown_field_strict() {
        let n = names();
        let idents = vec![];
        let fp = HashSet::new();
        let c = checker(&n, &idents, &fp);
        let mut m = Mapping::new();
        m.insert("class", Node::from("Step"));
        m.insert("run", Node::from("echo"));
        m.insert("bogus", Node::from("x"));
        let schema = Schema::Named("https://x.org/v#Step".to_string());
        let err = c.check(&schema, &Node::Mapping(m)).unwrap_err();
        assert!(err.pretty().contains("invalid field `bogus`, expected one of"));
    }

    #[test]
    fn test_default_satisfies_missing_field() {
        let n = names();
        let idents = vec![];
        let fp = HashSet::new();
        let c = checker(&n, &idents, &fp);
        // retries is absent but has default null, and mode is nullable
        let schema = Schema::Named("https://x.org/v#Step".to_string());
        assert!(c.check(&schema, &step("Step", Some("echo"))).is_ok());
    }
}
