use runbookcore::SkipReason;
use runbooknodes::{register_all, standard_input};
use runbookruntime::{ArtifactStatus, ComponentRegistry, RunbookRuntime, RuntimeConfig};
use serde_json::json;

fn runtime() -> RunbookRuntime {
    let mut registry = ComponentRegistry::new();
    register_all(&mut registry);
    RunbookRuntime::with_registry(registry, RuntimeConfig::default())
}

#[test]
fn test_register_all_lists_components() {
    let runtime = runtime();
    let types: Vec<_> = runtime
        .registry()
        .list_components()
        .into_iter()
        .map(|c| c.component_type)
        .collect();
    assert_eq!(types, vec!["static", "delay", "log", "passthrough", "select"]);
}

#[tokio::test]
async fn test_select_pipeline() {
    let yaml = r#"
name: select-pipeline
artifacts:
  logs:
    source:
      type: static
      properties:
        items: ["error: disk full", "ok", "error: timeout"]
  more_logs:
    source:
      type: static
      properties:
        items: ["error: oom"]
  errors:
    inputs: [logs, more_logs]
    output_schema: standard_input/1.0.0
    transform:
      type: select
      properties: { contains: "error" }
    output: true
  audited:
    inputs: errors
    transform: { type: log, properties: { label: audit } }
"#;
    let mut runtime = runtime();
    let plan = runtime.planner().plan_str(yaml).unwrap();
    assert_eq!(plan.output_schema("audited"), Some(&standard_input("1.0.0")));

    let result = runtime.execute(&plan).await;
    assert!(result.is_success());

    let errors = runtime.store().get("errors").unwrap();
    assert_eq!(
        errors.content,
        vec![json!("error: disk full"), json!("error: timeout"), json!("error: oom")]
    );
    assert_eq!(result.exported().len(), 1);
}

#[tokio::test]
async fn test_v2_records_through_select() {
    let yaml = r#"
name: versioned
artifacts:
  records:
    output_schema: standard_input/2.0.0
    source:
      type: static
      properties:
        items:
          - { content: "keep me" }
          - { content: "drop" }
  kept:
    inputs: records
    transform: { type: select, properties: { contains: keep } }
"#;
    let mut runtime = runtime();
    let plan = runtime.planner().plan_str(yaml).unwrap();
    assert_eq!(plan.output_schema("kept"), Some(&standard_input("2.0.0")));
    let result = runtime.execute(&plan).await;

    assert_eq!(result.status("kept"), Some(ArtifactStatus::Succeeded));
    assert_eq!(
        runtime.store().get("kept").unwrap().content,
        vec![json!({"content": "keep me"})]
    );
}

#[tokio::test]
async fn test_delay_hits_timeout() {
    let yaml = r#"
name: slow
config: { timeout: 0.2 }
artifacts:
  a: { source: { type: static, properties: { items: [1] } } }
  b:
    inputs: a
    transform: { type: delay, properties: { delay_ms: 800 } }
"#;
    let mut runtime = runtime();
    let plan = runtime.planner().plan_str(yaml).unwrap();
    let result = runtime.execute(&plan).await;

    assert!(result.timed_out);
    assert_eq!(result.status("a"), Some(ArtifactStatus::Succeeded));
    assert_eq!(result.skip_reason("b"), Some(&SkipReason::Timeout));
}
