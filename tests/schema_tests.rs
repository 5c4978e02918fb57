//! End-to-end pipeline: load a schema document, derive its vocabulary,
//! flatten inheritance, and validate documents against it.

mod common;

use arbor_schemas::compiler::load_schema_with;
use arbor_schemas::{load_and_validate, NamedSchema, Schema};
use common::MemFetcher;

const SCHEMA_URL: &str = "http://example.com/schema.yml";

const SCHEMA: &str = r##"
$base: "https://example.com/acme#"
$graph:
  - name: Mode
    type: enum
    symbols: [fast, safe]
  - name: Process
    type: record
    abstract: true
    fields:
      - name: id
        type: string
        jsonldPredicate: "@id"
      - name: label
        type: ["null", string]
  - name: Tool
    type: record
    extends: Process
    documentRoot: true
    fields:
      - name: class
        type: string
        jsonldPredicate:
          _id: "@type"
          _type: "@vocab"
      - name: mode
        type: Mode?
      - name: args
        type: string[]?
"##;

fn load(files: &[(&str, &str)]) -> arbor_schemas::SchemaDocument {
    load_schema_with(
        SCHEMA_URL,
        MemFetcher::boxed(files),
        MemFetcher::boxed(files),
        false,
    )
    .unwrap()
}

fn schema_files<'a>(doc: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![(SCHEMA_URL, SCHEMA), ("http://example.com/job.yml", doc)]
}

#[test]
fn test_schema_flattens_inheritance() {
    let schema = load(&[(SCHEMA_URL, SCHEMA)]);
    // abstract base is dropped; the concrete subtype carries its fields
    assert!(schema.names.get("https://example.com/acme#Process").is_none());
    let tool = schema.names.get("https://example.com/acme#Tool").unwrap();
    match tool {
        NamedSchema::Record(r) => {
            assert!(r.document_root);
            let names: Vec<_> = r.fields.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["id", "label", "class", "mode", "args"]);
            assert_eq!(
                r.field("id").unwrap().inherited_from.as_deref(),
                Some("https://example.com/acme#Process")
            );
            assert_eq!(
                r.field("mode").unwrap().schema,
                Schema::Union(vec![
                    Schema::Null,
                    Schema::Named("https://example.com/acme#Mode".to_string())
                ])
            );
        }
        other => panic!("expected record, got {:?}", other),
    }
    match schema.names.get("https://example.com/acme#Mode").unwrap() {
        NamedSchema::Enum(e) => assert_eq!(e.symbols, vec!["fast", "safe"]),
        other => panic!("expected enum, got {:?}", other),
    }
}

#[test]
fn test_schema_derives_document_context() {
    let schema = load(&[(SCHEMA_URL, SCHEMA)]);
    let ctx = schema.loader.context();
    assert_eq!(ctx.identifiers, vec!["id".to_string()]);
    assert!(ctx.vocab_fields.contains("class"));
    assert_eq!(
        ctx.vocab.get("Tool").map(String::as_str),
        Some("https://example.com/acme#Tool")
    );
    assert_eq!(
        ctx.vocab.get("fast").map(String::as_str),
        Some("https://example.com/acme#Mode/fast")
    );
}

#[test]
fn test_valid_document_passes() {
    let doc = "id: job1\nclass: Tool\nmode: fast\nargs: [-v, input.txt]\n";
    let files = schema_files(doc);
    let mut schema = load(&files);
    let (data, _meta) =
        load_and_validate(&mut schema, "http://example.com/job.yml", true, false).unwrap();
    let m = data.as_mapping().unwrap();
    assert_eq!(m.get_str("id"), Some("http://example.com/job.yml#job1"));
    assert_eq!(m.get_str("class"), Some("Tool"));
}

#[test]
fn test_bad_enum_value_is_reported() {
    let doc = "id: job1\nclass: Tool\nmode: turbo\n";
    let files = schema_files(doc);
    let mut schema = load(&files);
    let err =
        load_and_validate(&mut schema, "http://example.com/job.yml", true, false).unwrap_err();
    let text = err.pretty();
    assert!(text.contains("tried `Tool` but"));
    assert!(text.contains("mode"));
    assert!(text.contains("'fast', 'safe'"));
}

#[test]
fn test_missing_required_field_is_reported() {
    let doc = "id: job1\nmode: fast\n";
    let files = schema_files(doc);
    let mut schema = load(&files);
    let err =
        load_and_validate(&mut schema, "http://example.com/job.yml", true, false).unwrap_err();
    assert!(err.pretty().contains("Missing 'class' field"));
}

#[test]
fn test_unknown_field_rejected_in_strict_mode() {
    let doc = "id: job1\nclass: Tool\nbogus: 1\n";
    let files = schema_files(doc);
    let mut schema = load(&files);
    let err =
        load_and_validate(&mut schema, "http://example.com/job.yml", true, false).unwrap_err();
    assert!(err.pretty().contains("invalid field `bogus`"));
}

#[test]
fn test_unknown_field_tolerated_when_lenient() {
    let doc = "id: job1\nclass: Tool\nbogus: 1\n";
    let files = schema_files(doc);
    let mut schema = load(&files);
    assert!(load_and_validate(&mut schema, "http://example.com/job.yml", false, false).is_ok());
}

#[test]
fn test_error_reports_document_position() {
    let doc = "id: job1\nclass: Tool\nmode: turbo\n";
    let files = schema_files(doc);
    let mut schema = load(&files);
    let err =
        load_and_validate(&mut schema, "http://example.com/job.yml", true, false).unwrap_err();
    // the enum failure points at the `mode` line of the document
    assert!(err.pretty().contains("job.yml:3:1:"));
}

#[test]
fn test_schema_with_imported_types() {
    let base_types = "
$base: \"https://example.com/acme#\"
$graph:
  - name: Named
    type: record
    abstract: true
    fields:
      - name: id
        type: string
        jsonldPredicate: \"@id\"
";
    let main = "
$base: \"https://example.com/acme#\"
$graph:
  - $import: types.yml
  - name: Thing
    type: record
    extends: Named
    documentRoot: true
    fields:
      - name: label
        type: string
";
    let files = vec![
        (SCHEMA_URL, main),
        ("http://example.com/types.yml", base_types),
        ("http://example.com/thing.yml", "id: t1\nlabel: hello\n"),
    ];
    let mut schema = load_schema_with(
        SCHEMA_URL,
        MemFetcher::boxed(&files),
        MemFetcher::boxed(&files),
        false,
    )
    .unwrap();
    let thing = schema.names.get("https://example.com/acme#Thing").unwrap();
    match thing {
        NamedSchema::Record(r) => {
            let names: Vec<_> = r.fields.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["id", "label"]);
        }
        other => panic!("expected record, got {:?}", other),
    }
    assert!(
        load_and_validate(&mut schema, "http://example.com/thing.yml", true, false).is_ok()
    );
}
