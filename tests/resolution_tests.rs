//! Resolution engine behavior: scoped identifiers, DSL desugaring, id-map
//! normalization, scoped references, mixins, and link validation.

mod common;

use arbor_schemas::context::{ContextSpec, TermDef, TermInfo};
use arbor_schemas::{parse_document, Loader};
use common::MemFetcher;
use serde_json::json;

fn loader(spec: ContextSpec, files: &[(&str, &str)]) -> Loader {
    Loader::with_fetcher(&spec, MemFetcher::boxed(files)).unwrap()
}

fn id_context() -> ContextSpec {
    let mut spec = ContextSpec::new();
    spec.insert("id".to_string(), TermDef::from("@id"));
    spec
}

#[test]
fn test_scoped_identifier_nesting() {
    let mut ldr = loader(id_context(), &[]);
    let doc = parse_document("id: foo\nbar:\n  id: baz\n", "t.yml").unwrap();
    let (resolved, _) = ldr
        .resolve_all(doc, "http://example.com/", true, false)
        .unwrap();
    assert_eq!(
        resolved.to_json(),
        json!({
            "id": "http://example.com/#foo",
            "bar": {"id": "http://example.com/#foo/baz"}
        })
    );
    assert!(ldr.index().contains_key("http://example.com/#foo/baz"));
}

#[test]
fn test_blank_node_passes_through() {
    let mut ldr = loader(id_context(), &[]);
    let doc = parse_document("id: \"_:foo\"\n", "t.yml").unwrap();
    let (resolved, _) = ldr
        .resolve_all(doc, "http://example.com/", true, false)
        .unwrap();
    assert_eq!(resolved.to_json(), json!({"id": "_:foo"}));
}

fn type_dsl_context() -> ContextSpec {
    let mut spec = ContextSpec::new();
    spec.insert(
        "t".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some("http://example.com/v#t".to_string()),
            term_type: Some("@vocab".to_string()),
            type_dsl: true,
            ..TermInfo::default()
        }),
    );
    spec.insert(
        "File".to_string(),
        TermDef::from("http://example.com/v#File"),
    );
    spec.insert(
        "null".to_string(),
        TermDef::from("http://example.com/v#null"),
    );
    spec.insert(
        "array".to_string(),
        TermDef::from("http://example.com/v#array"),
    );
    spec
}

#[test]
fn test_type_dsl_desugaring() {
    for (written, expected) in [
        ("t: File\n", json!({"t": "File"})),
        ("t: File?\n", json!({"t": ["null", "File"]})),
        ("t: File[]\n", json!({"t": {"type": "array", "items": "File"}})),
        (
            "t: File[]?\n",
            json!({"t": ["null", {"type": "array", "items": "File"}]}),
        ),
    ] {
        let mut ldr = loader(type_dsl_context(), &[]);
        let doc = parse_document(written, "t.yml").unwrap();
        let (resolved, _) = ldr
            .resolve_all(doc, "http://example.com/", true, false)
            .unwrap();
        assert_eq!(resolved.to_json(), expected, "for input {:?}", written);
    }
}

#[test]
fn test_type_dsl_list_flattens_and_dedups() {
    let mut ldr = loader(type_dsl_context(), &[]);
    let doc = parse_document("t: [File?, File]\n", "t.yml").unwrap();
    let (resolved, _) = ldr
        .resolve_all(doc, "http://example.com/", true, false)
        .unwrap();
    // File? expands to [null, File]; the flattened union keeps first-seen
    // order and drops the duplicate File
    assert_eq!(resolved.to_json(), json!({"t": ["null", "File"]}));
}

#[test]
fn test_secondary_files_dsl() {
    let mut spec = ContextSpec::new();
    spec.insert(
        "sf".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some("http://example.com/v#sf".to_string()),
            secondary_files_dsl: true,
            ..TermInfo::default()
        }),
    );
    let mut ldr = loader(spec, &[]);
    let doc = parse_document("sf:\n  - .foo\n  - .bar?\n", "t.yml").unwrap();
    let (resolved, _) = ldr
        .resolve_all(doc, "http://example.com/", true, false)
        .unwrap();
    assert_eq!(
        resolved.to_json(),
        json!({"sf": [
            {"pattern": ".foo", "required": null},
            {"pattern": ".bar", "required": false}
        ]})
    );
}

#[test]
fn test_idmap_normalization() {
    let mut spec = id_context();
    spec.insert(
        "inputs".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some("http://example2.com/v#inputs".to_string()),
            map_subject: Some("id".to_string()),
            map_predicate: Some("a".to_string()),
            ..TermInfo::default()
        }),
    );
    let mut ldr = loader(spec, &[]);
    let doc = parse_document("inputs:\n  zip: 1\n  zing: 2\n", "t.yml").unwrap();
    let (resolved, _) = ldr
        .resolve_all(doc, "http://example2.com/", true, false)
        .unwrap();
    // keys are processed in sorted order for reproducible output
    assert_eq!(
        resolved.to_json(),
        json!({"inputs": [
            {"a": 2, "id": "http://example2.com/#zing"},
            {"a": 1, "id": "http://example2.com/#zip"}
        ]})
    );
}

#[test]
fn test_idmap_scalar_without_predicate_fails() {
    let mut spec = id_context();
    spec.insert(
        "inputs".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some("http://example2.com/v#inputs".to_string()),
            map_subject: Some("id".to_string()),
            ..TermInfo::default()
        }),
    );
    let mut ldr = loader(spec, &[]);
    let doc = parse_document("inputs:\n  zip: 1\n", "t.yml").unwrap();
    let err = ldr
        .resolve_all(doc, "http://example2.com/", true, false)
        .unwrap_err();
    assert!(err.pretty().contains("mapPredicate"));
}

fn workflow_context() -> ContextSpec {
    let mut spec = id_context();
    spec.insert(
        "out".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some("http://example2.com/v#out".to_string()),
            term_type: Some("@id".to_string()),
            identity: true,
            ..TermInfo::default()
        }),
    );
    spec.insert(
        "in".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some("http://example2.com/v#in".to_string()),
            map_subject: Some("id".to_string()),
            map_predicate: Some("source".to_string()),
            ..TermInfo::default()
        }),
    );
    spec.insert(
        "source".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some("http://example2.com/v#source".to_string()),
            term_type: Some("@id".to_string()),
            ref_scope: Some(2),
            ..TermInfo::default()
        }),
    );
    spec
}

const WORKFLOW: &str = "\
steps:
  - id: step1
    out: [out]
  - id: step2
    in:
      inp:
        source: step1/out
";

#[test]
fn test_scoped_reference_resolves_sibling_output() {
    let mut ldr = loader(workflow_context(), &[]);
    let doc = parse_document(WORKFLOW, "wf.yml").unwrap();
    let (resolved, _) = ldr
        .resolve_all(doc, "http://example2.com/", true, false)
        .unwrap();
    let steps = resolved.as_mapping().unwrap().get("steps").unwrap();
    let step2 = steps.as_sequence().unwrap().get(1).unwrap();
    let inputs = step2.as_mapping().unwrap().get("in").unwrap();
    let inp = inputs.as_sequence().unwrap().get(0).unwrap().as_mapping().unwrap();
    assert_eq!(
        inp.get_str("source"),
        Some("http://example2.com/#step1/out")
    );
}

#[test]
fn test_scoped_reference_failure_lists_attempts() {
    let mut ldr = loader(workflow_context(), &[]);
    let doc =
        parse_document(&WORKFLOW.replace("step1/out", "nosuch/out"), "wf.yml").unwrap();
    let err = ldr
        .resolve_all(doc, "http://example2.com/", true, false)
        .unwrap_err();
    let text = err.pretty();
    assert!(text.contains("unknown identifier `nosuch/out`"));
    // every probed variant is enumerated for debugging
    assert!(text.contains("http://example2.com/#nosuch/out"));
}

#[test]
fn test_undefined_reference_detection() {
    let mut spec = ContextSpec::new();
    spec.insert(
        "class".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some("http://example2.com/v#class".to_string()),
            term_type: Some("@vocab".to_string()),
            ..TermInfo::default()
        }),
    );
    let mut ldr = loader(spec, &[]);
    let doc = parse_document("class: xWorkflow\n", "t.yml").unwrap();
    let err = ldr
        .resolve_all(doc, "http://example2.com/", true, false)
        .unwrap_err();
    let text = err.pretty();
    assert!(text.contains("Field `class`"));
    assert!(text.contains("http://example2.com/xWorkflow"));
}

#[test]
fn test_import_splices_into_sequence() {
    let files = [(
        "http://example.com/pair.yml",
        "- id: a\n- id: b\n",
    )];
    let mut ldr = loader(id_context(), &files);
    let doc = parse_document(
        "- id: first\n- $import: pair.yml\n- id: last\n",
        "t.yml",
    )
    .unwrap();
    let (resolved, _) = ldr
        .resolve_all(doc, "http://example.com/main.yml", true, false)
        .unwrap();
    let seq = resolved.as_sequence().unwrap();
    assert_eq!(seq.len(), 4);
    let ids: Vec<_> = seq
        .iter()
        .map(|n| n.as_mapping().unwrap().get_str("id").unwrap().to_string())
        .collect();
    assert_eq!(
        ids,
        vec![
            "http://example.com/main.yml#first",
            "http://example.com/pair.yml#a",
            "http://example.com/pair.yml#b",
            "http://example.com/main.yml#last"
        ]
    );
}

#[test]
fn test_import_must_be_sole_key() {
    let mut ldr = loader(id_context(), &[]);
    let doc = parse_document("$import: other.yml\nextra: 1\n", "t.yml").unwrap();
    let err = ldr
        .resolve_all(doc, "http://example.com/", true, false)
        .unwrap_err();
    assert!(err.pretty().contains("'$import' must be the only field"));
}

#[test]
fn test_include_returns_raw_text() {
    let files = [("http://example.com/notes.md", "# plain text\n")];
    let mut ldr = loader(id_context(), &files);
    let doc = parse_document("doc:\n  $include: notes.md\n", "t.yml").unwrap();
    let (resolved, _) = ldr
        .resolve_all(doc, "http://example.com/main.yml", true, false)
        .unwrap();
    assert_eq!(
        resolved.to_json(),
        json!({"doc": "# plain text\n"})
    );
}

#[test]
fn test_mixin_non_aliasing() {
    let files = [(
        "http://example.com/mixin.yml",
        "run: defaultRun\nlabel: shared\n",
    )];
    let mut ldr = loader(id_context(), &files);
    let doc = parse_document(
        "- id: one\n  $mixin: mixin.yml\n- id: two\n  $mixin: mixin.yml\n",
        "t.yml",
    )
    .unwrap();
    let (resolved, _) = ldr
        .resolve_all(doc, "http://example.com/main.yml", true, false)
        .unwrap();
    let seq = resolved.as_sequence().unwrap();
    let first = seq.get(0).unwrap().as_mapping().unwrap();
    let second = seq.get(1).unwrap().as_mapping().unwrap();
    // both call sites get the mixin defaults under their own identity
    assert_eq!(first.get_str("run"), Some("defaultRun"));
    assert_eq!(second.get_str("run"), Some("defaultRun"));
    assert_eq!(first.get_str("id"), Some("http://example.com/main.yml#one"));
    assert_eq!(second.get_str("id"), Some("http://example.com/main.yml#two"));
    assert!(first.get("$mixin").is_none());
}

#[test]
fn test_mixin_overlay_wins_over_target() {
    let files = [(
        "http://example.com/mixin.yml",
        "run: defaultRun\nlabel: shared\n",
    )];
    let mut ldr = loader(id_context(), &files);
    let doc = parse_document(
        "id: one\n$mixin: mixin.yml\nlabel: mine\n",
        "t.yml",
    )
    .unwrap();
    let (resolved, _) = ldr
        .resolve_all(doc, "http://example.com/main.yml", true, false)
        .unwrap();
    let m = resolved.as_mapping().unwrap();
    assert_eq!(m.get_str("label"), Some("mine"));
    assert_eq!(m.get_str("run"), Some("defaultRun"));
}

#[test]
fn test_resolution_is_idempotent() {
    let files = [(
        "http://example.com/doc.yml",
        "id: thing\nbar:\n  id: nested\n",
    )];
    let mut ldr = loader(id_context(), &files);
    let (first, _) = ldr.resolve("http://example.com/doc.yml").unwrap();
    let (second, _) = ldr.resolve("http://example.com/doc.yml").unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_fragment_reference_into_loaded_file() {
    let files = [(
        "http://example.com/doc.yml",
        "id: thing\nbar:\n  id: nested\n",
    )];
    let mut ldr = loader(id_context(), &files);
    ldr.resolve("http://example.com/doc.yml").unwrap();
    let (frag, _) = ldr
        .resolve("http://example.com/doc.yml#thing/nested")
        .unwrap();
    let m = frag.as_mapping().unwrap();
    assert_eq!(
        m.get_str("id"),
        Some("http://example.com/doc.yml#thing/nested")
    );
}

#[test]
fn test_missing_fragment_is_reported() {
    let files = [("http://example.com/doc.yml", "id: thing\n")];
    let mut ldr = loader(id_context(), &files);
    ldr.resolve("http://example.com/doc.yml").unwrap();
    let err = ldr
        .resolve("http://example.com/doc.yml#nope")
        .unwrap_err();
    assert!(err.pretty().contains("Reference `#nope` not found"));
}

#[test]
fn test_namespaces_expand_prefixes_in_subtree() {
    let mut spec = id_context();
    spec.insert(
        "link".to_string(),
        TermDef::Detailed(TermInfo {
            id: Some("http://example.com/v#link".to_string()),
            term_type: Some("@id".to_string()),
            no_link_check: true,
            ..TermInfo::default()
        }),
    );
    let mut ldr = loader(spec, &[]);
    let doc = parse_document(
        "$namespaces:\n  acid: http://example.com/acid#\nlink: acid:one\n",
        "t.yml",
    )
    .unwrap();
    let (resolved, _) = ldr
        .resolve_all(doc, "http://example.com/", true, false)
        .unwrap();
    let m = resolved.as_mapping().unwrap();
    assert_eq!(m.get_str("link"), Some("http://example.com/acid#one"));
}

#[test]
fn test_base_directive_overrides_base_url() {
    let mut ldr = loader(id_context(), &[]);
    let doc = parse_document("$base: http://other.org/\nid: foo\n", "t.yml").unwrap();
    let (resolved, _) = ldr
        .resolve_all(doc, "http://example.com/", true, false)
        .unwrap();
    let m = resolved.as_mapping().unwrap();
    assert_eq!(m.get_str("id"), Some("http://other.org/#foo"));
}

#[test]
fn test_file_scheme_resolution() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("main.yml"),
        "id: top\nsub:\n  $import: other.yml\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("other.yml"), "id: other\nlabel: imported\n").unwrap();
    let mut ldr = Loader::new(&id_context()).unwrap();
    let url =
        arbor_schemas::fetcher::file_uri(&dir.path().join("main.yml").display().to_string());
    let (resolved, _) = ldr.resolve(&url).unwrap();
    let m = resolved.as_mapping().unwrap();
    let sub = m.get("sub").unwrap().as_mapping().unwrap();
    assert_eq!(sub.get_str("label"), Some("imported"));
}

#[test]
fn test_errors_carry_source_positions() {
    let mut ldr = loader(workflow_context(), &[]);
    let doc = parse_document(
        &WORKFLOW.replace("step1/out", "nosuch/out"),
        "wf.yml",
    )
    .unwrap();
    let err = ldr
        .resolve_all(doc, "http://example2.com/", true, false)
        .unwrap_err();
    assert!(err.pretty().contains("wf.yml:"));
}
