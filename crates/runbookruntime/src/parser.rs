//! Workflow YAML parsing with environment variable substitution.

use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;
use runbookcore::{
    ArtifactDefinition, ChildDirective, ChildOutputs, ChildRunbook, ComponentSpec,
    InputDeclaration, MergeStrategy, OutputDeclaration, Production, Properties, Schema, Workflow,
    WorkflowConfig, WorkflowError,
};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Parse a workflow file. The path is kept on the workflow so child
/// runbooks can be resolved against its directory.
///
/// # Errors
///
/// Returns [`WorkflowError::Parse`] if the file cannot be read, the YAML is
/// malformed or an environment variable is missing, and
/// [`WorkflowError::Validation`] if the artifact rules are broken.
pub fn parse_workflow(path: &Path) -> Result<Workflow, WorkflowError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        WorkflowError::Parse(format!("cannot read workflow file {}: {}", path.display(), e))
    })?;
    let mut workflow = parse_workflow_str(&content)?;
    workflow.set_source_path(path);
    Ok(workflow)
}

/// Parse a workflow document, substituting `${VAR}` from the process
/// environment.
pub fn parse_workflow_str(document: &str) -> Result<Workflow, WorkflowError> {
    parse_workflow_str_with_env(document, |name| std::env::var(name).ok())
}

/// Parse a workflow document, resolving `${VAR}` through `lookup`.
pub fn parse_workflow_str_with_env<F>(document: &str, lookup: F) -> Result<Workflow, WorkflowError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut raw: RawWorkflow = serde_yaml::from_str(document)
        .map_err(|e| WorkflowError::Parse(format!("invalid workflow YAML: {}", e)))?;

    let mut env = EnvSubstitution::new(&lookup);
    raw.substitute(&mut env);
    env.finish()?;

    raw.into_workflow()
}

/// Substitute `${VAR}` patterns in a single string.
///
/// # Errors
///
/// Returns [`WorkflowError::Parse`] naming every variable `lookup` could not
/// resolve.
pub fn substitute_env_vars<F>(input: &str, lookup: F) -> Result<String, WorkflowError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = EnvSubstitution::new(&lookup);
    let mut value = input.to_string();
    env.string(&mut value);
    env.finish()?;
    Ok(value)
}

struct EnvSubstitution<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
    missing: BTreeSet<String>,
}

impl<'a> EnvSubstitution<'a> {
    fn new(lookup: &'a dyn Fn(&str) -> Option<String>) -> Self {
        Self {
            lookup,
            missing: BTreeSet::new(),
        }
    }

    fn string(&mut self, value: &mut String) {
        if !value.contains("${") {
            return;
        }
        let replaced = ENV_VAR_RE
            .replace_all(value.as_str(), |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                match (self.lookup)(name) {
                    Some(v) => v,
                    None => {
                        self.missing.insert(name.to_string());
                        caps[0].to_string()
                    }
                }
            })
            .into_owned();
        *value = replaced;
    }

    fn opt(&mut self, value: &mut Option<String>) {
        if let Some(v) = value {
            self.string(v);
        }
    }

    fn json(&mut self, value: &mut serde_json::Value) {
        match value {
            serde_json::Value::String(s) => self.string(s),
            serde_json::Value::Array(items) => items.iter_mut().for_each(|v| self.json(v)),
            serde_json::Value::Object(map) => map.values_mut().for_each(|v| self.json(v)),
            _ => {}
        }
    }

    fn finish(self) -> Result<(), WorkflowError> {
        if self.missing.is_empty() {
            return Ok(());
        }
        let names: Vec<_> = self.missing.into_iter().collect();
        Err(WorkflowError::Parse(format!(
            "missing environment variable(s): {}",
            names.join(", ")
        )))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWorkflow {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    contact: Option<String>,
    #[serde(default)]
    config: RawConfig,
    #[serde(default)]
    inputs: Entries<RawInputDeclaration>,
    #[serde(default)]
    outputs: Entries<RawOutputDeclaration>,
    #[serde(default)]
    artifacts: Entries<RawArtifact>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    timeout: Option<f64>,
    cost_limit: Option<f64>,
    max_concurrency: Option<usize>,
    max_child_depth: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawArtifact {
    name: Option<String>,
    description: Option<String>,
    contact: Option<String>,
    source: Option<RawComponent>,
    inputs: Option<RawInputs>,
    transform: Option<RawComponent>,
    #[serde(default)]
    merge: MergeStrategy,
    input_schema: Option<String>,
    output_schema: Option<String>,
    #[serde(default)]
    output: bool,
    #[serde(default)]
    optional: bool,
    child_runbook: Option<RawChildRunbook>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawChildRunbook {
    path: String,
    #[serde(default)]
    input_mapping: Entries<String>,
    output: Option<String>,
    output_mapping: Option<Entries<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInputDeclaration {
    input_schema: String,
    #[serde(default)]
    optional: bool,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOutputDeclaration {
    artifact: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawComponent {
    #[serde(rename = "type")]
    component_type: String,
    #[serde(default)]
    properties: Properties,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInputs {
    One(String),
    Many(Vec<String>),
}

/// Mapping entries in document order. Duplicate keys are kept so they can
/// be reported as validation errors against the offending key.
#[derive(Debug)]
struct Entries<T>(Vec<(String, T)>);

impl<T> Default for Entries<T> {
    fn default() -> Self {
        Entries(Vec::new())
    }
}

impl<'de, T> Deserialize<'de> for Entries<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T> Visitor<'de> for EntriesVisitor<T>
        where
            T: Deserialize<'de>,
        {
            type Value = Entries<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(Entries::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, T>()? {
                    entries.push(entry);
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

impl Entries<String> {
    fn substitute(&mut self, env: &mut EnvSubstitution<'_>) {
        self.0.iter_mut().for_each(|(_, value)| env.string(value));
    }

    fn into_map(self, id: &str, field: &str) -> Result<IndexMap<String, String>, WorkflowError> {
        let mut map = IndexMap::with_capacity(self.0.len());
        for (key, value) in self.0 {
            if map.contains_key(&key) {
                return Err(WorkflowError::validation(
                    id,
                    format!("'{}' lists '{}' more than once", field, key),
                ));
            }
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl RawWorkflow {
    fn substitute(&mut self, env: &mut EnvSubstitution<'_>) {
        env.string(&mut self.name);
        env.string(&mut self.description);
        env.opt(&mut self.contact);
        for (_, input) in &mut self.inputs.0 {
            env.string(&mut input.input_schema);
            env.opt(&mut input.description);
        }
        for (_, output) in &mut self.outputs.0 {
            env.string(&mut output.artifact);
            env.opt(&mut output.description);
        }
        for (_, artifact) in &mut self.artifacts.0 {
            artifact.substitute(env);
        }
    }

    fn into_workflow(self) -> Result<Workflow, WorkflowError> {
        let config = self.config.into_config()?;
        config.validate()?;

        let mut workflow = Workflow::new(self.name).with_description(self.description).with_config(config);
        workflow.contact = self.contact;

        for (name, raw) in self.inputs.0 {
            let schema = Schema::parse(&raw.input_schema).map_err(|e| {
                WorkflowError::invalid_workflow(format!("input '{}': invalid 'input_schema': {}", name, e))
            })?;
            let declaration = InputDeclaration {
                schema,
                optional: raw.optional,
                description: raw.description,
            };
            workflow.add_input(name, declaration)?;
        }
        for (id, raw) in self.artifacts.0 {
            match raw.into_entry(&id)? {
                Entry::Artifact(definition) => workflow.add_artifact(id, definition)?,
                Entry::Child(directive) => workflow.add_child(id, directive)?,
            }
        }
        for (name, raw) in self.outputs.0 {
            let declaration = OutputDeclaration {
                artifact: raw.artifact,
                description: raw.description,
            };
            workflow.add_output(name, declaration)?;
        }
        workflow.validate_interface()?;
        Ok(workflow)
    }
}

impl RawConfig {
    fn into_config(self) -> Result<WorkflowConfig, WorkflowError> {
        let defaults = WorkflowConfig::default();
        let timeout = match self.timeout {
            None => None,
            Some(secs) if secs > 0.0 => Some(Duration::try_from_secs_f64(secs).map_err(|_| {
                WorkflowError::invalid_workflow(format!("timeout {} is out of range", secs))
            })?),
            Some(secs) => {
                return Err(WorkflowError::invalid_workflow(format!(
                    "timeout must be greater than zero, got {}",
                    secs
                )))
            }
        };
        Ok(WorkflowConfig {
            timeout,
            cost_limit: self.cost_limit,
            max_concurrency: self.max_concurrency.unwrap_or(defaults.max_concurrency),
            max_child_depth: self.max_child_depth.unwrap_or(defaults.max_child_depth),
        })
    }
}

impl RawArtifact {
    fn substitute(&mut self, env: &mut EnvSubstitution<'_>) {
        env.opt(&mut self.name);
        env.opt(&mut self.description);
        env.opt(&mut self.contact);
        env.opt(&mut self.input_schema);
        env.opt(&mut self.output_schema);
        for component in [&mut self.source, &mut self.transform].into_iter().flatten() {
            env.string(&mut component.component_type);
            component.properties.values_mut().for_each(|v| env.json(v));
        }
        match &mut self.inputs {
            Some(RawInputs::One(id)) => env.string(id),
            Some(RawInputs::Many(ids)) => ids.iter_mut().for_each(|id| env.string(id)),
            None => {}
        }
        if let Some(child) = &mut self.child_runbook {
            env.string(&mut child.path);
            child.input_mapping.substitute(env);
            env.opt(&mut child.output);
            if let Some(mapping) = &mut child.output_mapping {
                mapping.substitute(env);
            }
        }
    }

    fn into_entry(mut self, id: &str) -> Result<Entry, WorkflowError> {
        match self.child_runbook.take() {
            Some(child) => self.into_child(id, child).map(Entry::Child),
            None => self.into_definition(id).map(Entry::Artifact),
        }
    }

    fn into_child(self, id: &str, child: RawChildRunbook) -> Result<ChildDirective, WorkflowError> {
        let conflicts = [
            ("source", self.source.is_some()),
            ("transform", self.transform.is_some()),
            ("input_schema", self.input_schema.is_some()),
            ("output_schema", self.output_schema.is_some()),
        ];
        if let Some((field, _)) = conflicts.iter().find(|(_, set)| *set) {
            return Err(WorkflowError::validation(
                id,
                format!("cannot combine 'child_runbook' with '{}'", field),
            ));
        }
        let inputs = match self.inputs {
            Some(RawInputs::One(input)) => vec![input],
            Some(RawInputs::Many(inputs)) => inputs,
            None => return Err(WorkflowError::validation(id, "'child_runbook' requires 'inputs'")),
        };
        let outputs = match (child.output, child.output_mapping) {
            (Some(output), None) => ChildOutputs::Single(output),
            (None, Some(mapping)) => ChildOutputs::Mapped(mapping.into_map(id, "output_mapping")?),
            (Some(_), Some(_)) => {
                return Err(WorkflowError::validation(
                    id,
                    "cannot have both 'output' and 'output_mapping'",
                ))
            }
            (None, None) => {
                return Err(WorkflowError::validation(
                    id,
                    "'child_runbook' requires 'output' or 'output_mapping'",
                ))
            }
        };

        Ok(ChildDirective {
            name: self.name,
            description: self.description,
            inputs,
            runbook: ChildRunbook {
                path: child.path.into(),
                input_mapping: child.input_mapping.into_map(id, "input_mapping")?,
                outputs,
            },
            output: self.output,
            optional: self.optional,
        })
    }

    fn into_definition(self, id: &str) -> Result<ArtifactDefinition, WorkflowError> {
        let production = match (self.source, self.inputs, self.transform) {
            (Some(_), Some(_), _) => {
                return Err(WorkflowError::validation(
                    id,
                    "cannot have both 'source' and 'inputs'",
                ))
            }
            (None, None, _) => {
                return Err(WorkflowError::validation(
                    id,
                    "must define either 'source' or 'inputs'",
                ))
            }
            (Some(_), None, Some(_)) => {
                return Err(WorkflowError::validation(id, "'transform' requires 'inputs'"))
            }
            (None, Some(_), None) => {
                return Err(WorkflowError::validation(id, "'inputs' requires a 'transform'"))
            }
            (Some(source), None, None) => Production::Source(source.into_spec()),
            (None, Some(inputs), Some(transform)) => Production::Derived {
                inputs: match inputs {
                    RawInputs::One(input) => vec![input],
                    RawInputs::Many(inputs) => inputs,
                },
                transform: transform.into_spec(),
            },
        };

        Ok(ArtifactDefinition {
            name: self.name,
            description: self.description,
            contact: self.contact,
            production,
            merge: self.merge,
            input_schema: parse_schema_field(id, "input_schema", self.input_schema)?,
            output_schema: parse_schema_field(id, "output_schema", self.output_schema)?,
            output: self.output,
            optional: self.optional,
        })
    }
}

enum Entry {
    Artifact(ArtifactDefinition),
    Child(ChildDirective),
}

impl RawComponent {
    fn into_spec(self) -> ComponentSpec {
        ComponentSpec {
            component_type: self.component_type,
            properties: self.properties,
        }
    }
}

fn parse_schema_field(
    id: &str,
    field: &str,
    value: Option<String>,
) -> Result<Option<Schema>, WorkflowError> {
    value
        .map(|s| Schema::parse(&s))
        .transpose()
        .map_err(|e| WorkflowError::validation(id, format!("invalid '{}': {}", field, e)))
}
