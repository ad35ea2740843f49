mod common;

use common::{findings, registry, standard, CallTracker};
use runbookcore::{ArtifactDefinition, ComponentKind, Schema, Workflow, WorkflowError};
use runbookruntime::{ExecutionPlan, Planner};
use std::sync::Arc;
use tempfile::TempDir;

fn planner() -> Planner {
    Planner::new(registry(&Arc::new(CallTracker::default())))
}

#[test]
fn test_plan_resolves_schemas_in_dependency_order() {
    let yaml = r#"
name: resolve
artifacts:
  report:
    inputs: [a, b]
    transform: { type: detect }
    output: true
  a:
    source: { type: static }
  b:
    source: { type: static }
"#;
    let plan = planner().plan_str(yaml).unwrap();

    assert_eq!(plan.execution_order(), ["a", "b", "report"]);
    assert_eq!(plan.output_schema("a"), Some(&standard()));
    assert_eq!(plan.input_schema("a"), None);
    assert_eq!(plan.input_schema("report"), Some(&standard()));
    assert_eq!(plan.output_schema("report"), Some(&findings()));
}

#[test]
fn test_plan_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runbook.yaml");
    std::fs::write(
        &path,
        "name: on-disk\nartifacts:\n  a: { source: { type: static } }\n",
    )
    .unwrap();

    let plan = planner().plan(&path).unwrap();
    assert_eq!(plan.workflow().name, "on-disk");
    assert_eq!(plan.graph().len(), 1);
}

#[test]
fn test_cycle_rejected_before_resolution() {
    let yaml = r#"
name: cyclic
artifacts:
  a: { inputs: c, transform: { type: identity } }
  b: { inputs: a, transform: { type: identity } }
  c: { inputs: b, transform: { type: identity } }
"#;
    match planner().plan_str(yaml).unwrap_err() {
        WorkflowError::CycleDetected { cycle } => {
            assert!(cycle.contains(&"a".to_string()));
        }
        other => panic!("expected cycle, got {:?}", other),
    }
}

#[test]
fn test_dangling_reference_rejected() {
    let yaml = r#"
name: dangling
artifacts:
  a: { source: { type: static } }
  b: { inputs: [a, ghost], transform: { type: identity } }
"#;
    assert_eq!(
        planner().plan_str(yaml).unwrap_err(),
        WorkflowError::MissingArtifact {
            artifact: "b".to_string(),
            reference: "ghost".to_string(),
        }
    );
}

#[test]
fn test_unknown_component_types_rejected() {
    let yaml = "name: w\nartifacts:\n  a: { source: { type: nope } }\n";
    assert_eq!(
        planner().plan_str(yaml).unwrap_err(),
        WorkflowError::ComponentNotFound {
            kind: ComponentKind::Connector,
            component_type: "nope".to_string(),
        }
    );

    let yaml = r#"
name: w
artifacts:
  a: { source: { type: static } }
  b: { inputs: a, transform: { type: static } }
"#;
    assert!(matches!(
        planner().plan_str(yaml).unwrap_err(),
        WorkflowError::ComponentNotFound {
            kind: ComponentKind::Analyser,
            ..
        }
    ));
}

#[test]
fn test_fan_in_schema_mismatch() {
    let yaml = r#"
name: mixed
artifacts:
  a: { source: { type: static } }
  b: { source: { type: static_v2 } }
  c: { inputs: [a, b], transform: { type: identity } }
"#;
    let err = planner().plan_str(yaml).unwrap_err();
    assert!(matches!(err, WorkflowError::SchemaCompatibility { .. }));
    assert_eq!(err.artifact(), Some("c"));
}

#[test]
fn test_transform_rejects_undeclared_input_schema() {
    let yaml = r#"
name: w
artifacts:
  a: { source: { type: static_v2 } }
  b: { inputs: a, transform: { type: detect } }
"#;
    let err = planner().plan_str(yaml).unwrap_err();
    assert!(matches!(err, WorkflowError::SchemaCompatibility { .. }));
    assert!(err.to_string().contains("standard_input/2.0.0"));
}

#[test]
fn test_output_schema_override_must_be_declared() {
    let yaml = r#"
name: w
artifacts:
  a:
    source: { type: static }
    output_schema: other/1.0.0
"#;
    assert!(matches!(
        planner().plan_str(yaml).unwrap_err(),
        WorkflowError::SchemaCompatibility { .. }
    ));

    // connectors that declare nothing accept any override
    let yaml = r#"
name: w
artifacts:
  a:
    source: { type: static_any }
    output_schema: other/2.1.0
"#;
    let plan = planner().plan_str(yaml).unwrap();
    assert_eq!(plan.output_schema("a"), Some(&Schema::new("other", "2.1.0")));
}

#[test]
fn test_component_without_schema_needs_override() {
    let yaml = "name: w\nartifacts:\n  a: { source: { type: static_any } }\n";
    assert!(matches!(
        planner().plan_str(yaml).unwrap_err(),
        WorkflowError::SchemaCompatibility { .. }
    ));
}

#[test]
fn test_input_schema_pin_checked_against_upstream() {
    let yaml = r#"
name: w
artifacts:
  a: { source: { type: static } }
  b:
    inputs: a
    transform: { type: identity }
    input_schema: standard_input/2.0.0
"#;
    let err = planner().plan_str(yaml).unwrap_err();
    assert_eq!(err.artifact(), Some("b"));

    let pinned = yaml.replace("2.0.0", "1.0.0");
    assert!(planner().plan_str(&pinned).is_ok());
}

#[test]
fn test_invalid_config_rejected() {
    let mut workflow = Workflow::new("w")
        .with_artifact("a", ArtifactDefinition::source("static"))
        .unwrap();
    workflow.config.max_concurrency = 0;
    assert!(matches!(
        planner().plan_workflow(workflow).unwrap_err(),
        WorkflowError::Validation { artifact: None, .. }
    ));
}

#[test]
fn test_plan_workflow_built_in_code() {
    let workflow = Workflow::new("built")
        .with_artifact("a", ArtifactDefinition::source("static"))
        .unwrap()
        .with_artifact("b", ArtifactDefinition::derived(["a"], "detect").with_output(true))
        .unwrap();

    let plan = planner().plan_workflow(workflow).unwrap();
    assert_eq!(plan.graph().depth().unwrap(), 2);
    assert_eq!(plan.output_schema("b"), Some(&findings()));
}

const SCAN: &str = r#"
name: scan
inputs:
  records: { input_schema: standard_input/1.0.0 }
outputs:
  result: { artifact: found }
  rows: { artifact: cleaned }
artifacts:
  cleaned: { inputs: records, transform: { type: identity } }
  found: { inputs: cleaned, transform: { type: detect } }
"#;

fn runbooks(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, body) in files {
        std::fs::write(dir.path().join(name), body).unwrap();
    }
    dir
}

fn plan_parent(files: &[(&str, &str)]) -> Result<ExecutionPlan, WorkflowError> {
    let dir = runbooks(files);
    planner().plan(&dir.path().join("parent.yaml"))
}

fn parent_with(directive: &str) -> String {
    format!(
        "name: parent\nartifacts:\n  data: {{ source: {{ type: static }} }}\n  scan:\n{}",
        directive
    )
}

#[test]
fn test_child_runbook_flattened_into_namespaced_artifacts() {
    let parent = r#"
name: parent
artifacts:
  data: { source: { type: static } }
  scan:
    inputs: data
    child_runbook:
      path: scan.yaml
      input_mapping: { records: data }
      output: result
    output: true
  summary: { inputs: scan, transform: { type: identity } }
"#;
    let plan = plan_parent(&[("parent.yaml", parent), ("scan.yaml", SCAN)]).unwrap();

    assert_eq!(
        plan.execution_order(),
        ["data", "scan__cleaned", "scan__found", "summary"]
    );
    assert_eq!(plan.resolve_alias("scan"), "scan__found");
    assert_eq!(plan.resolve_alias("data"), "data");
    assert_eq!(plan.aliases().len(), 1);

    let workflow = plan.workflow();
    assert!(!workflow.contains("scan"));
    assert_eq!(workflow.artifact("scan__cleaned").unwrap().inputs(), ["data".to_string()]);
    assert_eq!(workflow.artifact("summary").unwrap().inputs(), ["scan__found".to_string()]);
    assert!(workflow.artifact("scan__found").unwrap().output);
    assert!(!workflow.artifact("scan__cleaned").unwrap().output);

    assert_eq!(plan.output_schema("scan__found"), Some(&findings()));
    assert_eq!(plan.input_schema("summary"), Some(&findings()));
}

#[test]
fn test_child_output_mapping_creates_aliases() {
    let parent = r#"
name: parent
artifacts:
  data: { source: { type: static } }
  scan:
    inputs: data
    child_runbook:
      path: scan.yaml
      input_mapping: { records: data }
      output_mapping: { result: scan_findings, rows: clean_rows }
  report: { inputs: clean_rows, transform: { type: detect } }
"#;
    let plan = plan_parent(&[("parent.yaml", parent), ("scan.yaml", SCAN)]).unwrap();

    assert_eq!(plan.resolve_alias("scan_findings"), "scan__found");
    assert_eq!(plan.resolve_alias("clean_rows"), "scan__cleaned");
    assert_eq!(plan.resolve_alias("scan"), "scan");
    assert_eq!(
        plan.workflow().artifact("report").unwrap().inputs(),
        ["scan__cleaned".to_string()]
    );
    assert_eq!(plan.output_schema("report"), Some(&findings()));
}

const OUTER: &str = r#"
name: outer
inputs:
  records: { input_schema: standard_input/1.0.0 }
outputs:
  result: { artifact: inner }
artifacts:
  inner:
    inputs: records
    child_runbook:
      path: scan.yaml
      input_mapping: { records: records }
      output: result
"#;

const NESTED_PARENT: &str = r#"
name: parent
artifacts:
  data: { source: { type: static } }
  outer:
    inputs: data
    child_runbook:
      path: outer.yaml
      input_mapping: { records: data }
      output: result
  summary: { inputs: outer, transform: { type: identity } }
"#;

#[test]
fn test_nested_child_runbooks() {
    let plan = plan_parent(&[
        ("parent.yaml", NESTED_PARENT),
        ("outer.yaml", OUTER),
        ("scan.yaml", SCAN),
    ])
    .unwrap();

    assert_eq!(
        plan.execution_order(),
        ["data", "outer__inner__cleaned", "outer__inner__found", "summary"]
    );
    assert_eq!(plan.resolve_alias("outer"), "outer__inner__found");
    assert_eq!(plan.resolve_alias("outer__inner"), "outer__inner__found");
    assert_eq!(
        plan.workflow().artifact("outer__inner__cleaned").unwrap().inputs(),
        ["data".to_string()]
    );
}

#[test]
fn test_child_nesting_bounded_by_max_child_depth() {
    let parent = NESTED_PARENT.replace("name: parent\n", "name: parent\nconfig: { max_child_depth: 1 }\n");
    let err = plan_parent(&[
        ("parent.yaml", parent.as_str()),
        ("outer.yaml", OUTER),
        ("scan.yaml", SCAN),
    ])
    .unwrap_err();

    assert!(matches!(err, WorkflowError::Validation { .. }));
    assert_eq!(err.artifact(), Some("outer__inner"));
    assert!(err.to_string().contains("max_child_depth"));
}

#[test]
fn test_circular_child_runbook_detected() {
    let looping = r#"
name: loop
inputs:
  records: { input_schema: standard_input/1.0.0 }
outputs:
  result: { artifact: again }
artifacts:
  again:
    inputs: records
    child_runbook:
      path: loop.yaml
      input_mapping: { records: records }
      output: result
"#;
    let parent = parent_with(
        "    inputs: data\n    child_runbook: { path: loop.yaml, input_mapping: { records: data }, output: result }\n",
    );
    match plan_parent(&[("parent.yaml", parent.as_str()), ("loop.yaml", looping)]).unwrap_err() {
        WorkflowError::CircularRunbook { chain } => {
            assert_eq!(chain.len(), 2);
            assert!(chain.iter().all(|p| p.ends_with("loop.yaml")));
        }
        other => panic!("expected circular runbook, got {:?}", other),
    }
}

#[test]
fn test_required_child_input_must_be_mapped() {
    let parent = parent_with("    inputs: data\n    child_runbook: { path: scan.yaml, output: result }\n");
    let err = plan_parent(&[("parent.yaml", parent.as_str()), ("scan.yaml", SCAN)]).unwrap_err();
    assert_eq!(err.artifact(), Some("scan"));
    assert!(err.to_string().contains("requires input 'records'"), "{}", err);
}

#[test]
fn test_undeclared_child_input_rejected() {
    let parent = parent_with(
        "    inputs: data\n    child_runbook: { path: scan.yaml, input_mapping: { rows: data }, output: result }\n",
    );
    let err = plan_parent(&[("parent.yaml", parent.as_str()), ("scan.yaml", SCAN)]).unwrap_err();
    assert!(err.to_string().contains("declares no input 'rows'"), "{}", err);
}

#[test]
fn test_unknown_child_output_rejected() {
    let parent = parent_with(
        "    inputs: data\n    child_runbook: { path: scan.yaml, input_mapping: { records: data }, output: nope }\n",
    );
    let err = plan_parent(&[("parent.yaml", parent.as_str()), ("scan.yaml", SCAN)]).unwrap_err();
    assert!(err.to_string().contains("has no output 'nope'"), "{}", err);
}

#[test]
fn test_child_input_schema_must_match_mapped_artifact() {
    let parent = parent_with(
        "    inputs: data\n    child_runbook: { path: scan.yaml, input_mapping: { records: data }, output: result }\n",
    )
    .replace("type: static }", "type: static_v2 }");
    let err = plan_parent(&[("parent.yaml", parent.as_str()), ("scan.yaml", SCAN)]).unwrap_err();

    assert!(matches!(err, WorkflowError::SchemaCompatibility { .. }));
    assert_eq!(err.artifact(), Some("scan"));
    assert!(err.to_string().contains("standard_input/2.0.0"));
}

#[test]
fn test_child_paths_cannot_escape_parent_dir() {
    for path in ["../scan.yaml", "/tmp/scan.yaml"] {
        let parent = parent_with(&format!(
            "    inputs: data\n    child_runbook: {{ path: \"{}\", input_mapping: {{ records: data }}, output: result }}\n",
            path
        ));
        let err = plan_parent(&[("parent.yaml", parent.as_str()), ("scan.yaml", SCAN)]).unwrap_err();
        assert!(err.to_string().contains("must be relative"), "{}", err);
    }
}

#[test]
fn test_missing_child_file_is_parse_error() {
    let parent = parent_with(
        "    inputs: data\n    child_runbook: { path: absent.yaml, input_mapping: { records: data }, output: result }\n",
    );
    let err = plan_parent(&[("parent.yaml", parent.as_str())]).unwrap_err();
    assert!(matches!(err, WorkflowError::Parse(_)));
}

#[test]
fn test_optional_directive_marks_child_artifacts_optional() {
    let parent = parent_with(
        "    inputs: data\n    optional: true\n    child_runbook: { path: scan.yaml, input_mapping: { records: data }, output: result }\n",
    );
    let plan = plan_parent(&[("parent.yaml", parent.as_str()), ("scan.yaml", SCAN)]).unwrap();
    let workflow = plan.workflow();
    assert!(workflow.artifact("scan__cleaned").unwrap().optional);
    assert!(workflow.artifact("scan__found").unwrap().optional);
    assert!(!workflow.artifact("data").unwrap().optional);
}

#[test]
fn test_child_runbooks_need_a_file_location() {
    let parent = parent_with(
        "    inputs: data\n    child_runbook: { path: scan.yaml, input_mapping: { records: data }, output: result }\n",
    );
    let err = planner().plan_str(&parent).unwrap_err();
    assert!(err.to_string().contains("loaded from a file"), "{}", err);
}
