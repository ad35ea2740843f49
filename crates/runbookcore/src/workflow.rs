use crate::{Schema, WorkflowError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub type ArtifactId = String;

/// Free-form component configuration taken verbatim from the document.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Complete, validated workflow definition.
///
/// Artifacts keep declaration order so diagnostics iterate deterministically;
/// execution order is derived from the dependency graph only.
///
/// A workflow used as a child runbook declares `inputs` its parent maps
/// artifacts onto and `outputs` the parent may alias. Child directives are
/// kept apart from artifacts and expanded by the planner.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub description: String,
    pub contact: Option<String>,
    pub config: WorkflowConfig,
    artifacts: IndexMap<ArtifactId, ArtifactDefinition>,
    children: IndexMap<ArtifactId, ChildDirective>,
    inputs: IndexMap<String, InputDeclaration>,
    outputs: IndexMap<String, OutputDeclaration>,
    source_path: Option<PathBuf>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            contact: None,
            config: WorkflowConfig::default(),
            artifacts: IndexMap::new(),
            children: IndexMap::new(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            source_path: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an artifact, rejecting malformed or duplicate ids and
    /// definitions that break the artifact rules.
    pub fn add_artifact(
        &mut self,
        id: impl Into<ArtifactId>,
        definition: ArtifactDefinition,
    ) -> Result<(), WorkflowError> {
        let id = id.into();
        self.check_new_id(&id)?;
        definition.validate(&id)?;
        self.artifacts.insert(id, definition);
        Ok(())
    }

    /// Add a child runbook directive under `id`. The id shares the artifact
    /// namespace.
    pub fn add_child(
        &mut self,
        id: impl Into<ArtifactId>,
        directive: ChildDirective,
    ) -> Result<(), WorkflowError> {
        let id = id.into();
        self.check_new_id(&id)?;
        directive.validate(&id)?;
        self.children.insert(id, directive);
        Ok(())
    }

    /// Declare an input a parent runbook must map. Artifacts reference it by
    /// name like any other input.
    pub fn add_input(
        &mut self,
        name: impl Into<String>,
        declaration: InputDeclaration,
    ) -> Result<(), WorkflowError> {
        let name = name.into();
        self.check_new_id(&name)?;
        self.inputs.insert(name, declaration);
        Ok(())
    }

    pub fn add_output(
        &mut self,
        name: impl Into<String>,
        declaration: OutputDeclaration,
    ) -> Result<(), WorkflowError> {
        let name = name.into();
        if self.outputs.contains_key(&name) {
            return Err(WorkflowError::invalid_workflow(format!("duplicate output '{}'", name)));
        }
        self.outputs.insert(name, declaration);
        Ok(())
    }

    fn check_new_id(&self, id: &str) -> Result<(), WorkflowError> {
        if !is_valid_identifier(id) {
            return Err(WorkflowError::validation(
                id,
                "artifact ids must start with a letter or '_' and contain only letters, digits, '_', '-' or '.'",
            ));
        }
        if self.artifacts.contains_key(id) || self.children.contains_key(id) {
            return Err(WorkflowError::validation(id, "duplicate artifact id"));
        }
        if self.inputs.contains_key(id) {
            return Err(WorkflowError::validation(id, "id is already a declared input"));
        }
        Ok(())
    }

    /// Cross-entry rules that only hold once the whole document is in.
    ///
    /// A runbook that declares inputs receives its data from a parent and
    /// cannot have source artifacts. Every declared output must name an
    /// artifact or child directive of this runbook.
    pub fn validate_interface(&self) -> Result<(), WorkflowError> {
        if !self.inputs.is_empty() {
            if let Some((id, _)) = self.artifacts.iter().find(|(_, def)| def.is_source()) {
                return Err(WorkflowError::validation(
                    id,
                    "a runbook that declares inputs cannot have source artifacts",
                ));
            }
        }
        for (name, output) in &self.outputs {
            if !self.contains(&output.artifact) && !self.children.contains_key(&output.artifact) {
                return Err(WorkflowError::invalid_workflow(format!(
                    "output '{}' references non-existent artifact '{}'",
                    name, output.artifact
                )));
            }
        }
        Ok(())
    }

    pub fn with_artifact(
        mut self,
        id: impl Into<ArtifactId>,
        definition: ArtifactDefinition,
    ) -> Result<Self, WorkflowError> {
        self.add_artifact(id, definition)?;
        Ok(self)
    }

    pub fn artifact(&self, id: &str) -> Option<&ArtifactDefinition> {
        self.artifacts.get(id)
    }

    pub fn artifact_mut(&mut self, id: &str) -> Option<&mut ArtifactDefinition> {
        self.artifacts.get_mut(id)
    }

    pub fn artifacts(&self) -> impl Iterator<Item = (&ArtifactId, &ArtifactDefinition)> {
        self.artifacts.iter()
    }

    pub fn artifact_ids(&self) -> impl Iterator<Item = &ArtifactId> {
        self.artifacts.keys()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.artifacts.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// `id -> referenced input ids`, in declaration order.
    pub fn dependency_map(&self) -> IndexMap<ArtifactId, Vec<ArtifactId>> {
        self.artifacts
            .iter()
            .map(|(id, def)| (id.clone(), def.inputs().to_vec()))
            .collect()
    }

    /// Rewrite every artifact input through `f`.
    pub fn remap_inputs(&mut self, mut f: impl FnMut(&str) -> ArtifactId) {
        for definition in self.artifacts.values_mut() {
            definition.remap_inputs(&mut f);
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Remove and return the child directives, leaving plain artifacts.
    pub fn take_children(&mut self) -> IndexMap<ArtifactId, ChildDirective> {
        std::mem::take(&mut self.children)
    }

    pub fn inputs(&self) -> impl Iterator<Item = (&String, &InputDeclaration)> {
        self.inputs.iter()
    }

    pub fn input(&self, name: &str) -> Option<&InputDeclaration> {
        self.inputs.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputDeclaration> {
        self.outputs.get(name)
    }

    /// File the workflow was read from; child runbook paths resolve
    /// against its directory.
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn set_source_path(&mut self, path: impl Into<PathBuf>) {
        self.source_path = Some(path.into());
    }

    pub fn validate_config(&self) -> Result<(), WorkflowError> {
        self.config.validate()
    }
}

/// An input a child runbook expects from its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct InputDeclaration {
    pub schema: Schema,
    /// May be left unmapped, as long as no artifact consumes it.
    pub optional: bool,
    pub description: Option<String>,
}

impl InputDeclaration {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            optional: false,
            description: None,
        }
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }
}

/// An artifact a child runbook exposes to its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDeclaration {
    pub artifact: ArtifactId,
    pub description: Option<String>,
}

impl OutputDeclaration {
    pub fn new(artifact: impl Into<ArtifactId>) -> Self {
        Self {
            artifact: artifact.into(),
            description: None,
        }
    }
}

/// Which child outputs become visible in the parent, and under which ids.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildOutputs {
    /// The directive's own id stands for this child output.
    Single(String),
    /// `child output name -> parent alias`.
    Mapped(IndexMap<String, ArtifactId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildRunbook {
    /// Relative to the directory of the runbook that references it.
    pub path: PathBuf,
    /// `child input name -> parent artifact id`.
    pub input_mapping: IndexMap<String, ArtifactId>,
    pub outputs: ChildOutputs,
}

impl ChildRunbook {
    pub fn new(path: impl Into<PathBuf>, outputs: ChildOutputs) -> Self {
        Self {
            path: path.into(),
            input_mapping: IndexMap::new(),
            outputs,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>, artifact: impl Into<ArtifactId>) -> Self {
        self.input_mapping.insert(input.into(), artifact.into());
        self
    }
}

/// An artifact slot filled by splicing a child runbook into the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildDirective {
    pub name: Option<String>,
    pub description: Option<String>,
    pub inputs: Vec<ArtifactId>,
    pub runbook: ChildRunbook,
    /// Export the aliased child outputs.
    pub output: bool,
    /// Every expanded artifact fails as a warning.
    pub optional: bool,
}

impl ChildDirective {
    pub fn new<I, S>(inputs: I, runbook: ChildRunbook) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArtifactId>,
    {
        Self {
            name: None,
            description: None,
            inputs: inputs.into_iter().map(Into::into).collect(),
            runbook,
            output: false,
            optional: false,
        }
    }

    pub fn with_output(mut self, output: bool) -> Self {
        self.output = output;
        self
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    fn validate(&self, id: &str) -> Result<(), WorkflowError> {
        if self.runbook.path.as_os_str().is_empty() {
            return Err(WorkflowError::validation(id, "child runbook path must not be empty"));
        }
        check_inputs(id, &self.inputs)?;
        for (input, artifact) in &self.runbook.input_mapping {
            if !self.inputs.contains(artifact) {
                return Err(WorkflowError::validation(
                    id,
                    format!(
                        "input_mapping '{}' uses '{}', which is not listed in 'inputs'",
                        input, artifact
                    ),
                ));
            }
        }
        if let ChildOutputs::Mapped(mapping) = &self.runbook.outputs {
            if mapping.is_empty() {
                return Err(WorkflowError::validation(id, "'output_mapping' must not be empty"));
            }
            for (pos, alias) in mapping.values().enumerate() {
                if !is_valid_identifier(alias) {
                    return Err(WorkflowError::validation(
                        id,
                        format!("malformed output alias '{}'", alias),
                    ));
                }
                if mapping.values().take(pos).any(|a| a == alias) {
                    return Err(WorkflowError::validation(
                        id,
                        format!("output alias '{}' is used more than once", alias),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// How a single artifact is produced. Exactly one of the two, enforced by
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Production {
    /// Extracted by a connector.
    Source(ComponentSpec),
    /// Derived from other artifacts through a transform.
    Derived {
        inputs: Vec<ArtifactId>,
        transform: ComponentSpec,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSpec {
    pub component_type: String,
    pub properties: Properties,
}

impl ComponentSpec {
    pub fn new(component_type: impl Into<String>) -> Self {
        Self {
            component_type: component_type.into(),
            properties: Properties::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    #[default]
    Concatenate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactDefinition {
    pub name: Option<String>,
    pub description: Option<String>,
    pub contact: Option<String>,
    pub production: Production,
    pub merge: MergeStrategy,
    pub input_schema: Option<Schema>,
    pub output_schema: Option<Schema>,
    /// Exported as a final result of the run.
    pub output: bool,
    /// Failure is reported as a warning rather than an error.
    pub optional: bool,
}

impl ArtifactDefinition {
    fn with_production(production: Production) -> Self {
        Self {
            name: None,
            description: None,
            contact: None,
            production,
            merge: MergeStrategy::default(),
            input_schema: None,
            output_schema: None,
            output: false,
            optional: false,
        }
    }

    pub fn source(connector_type: impl Into<String>) -> Self {
        Self::with_production(Production::Source(ComponentSpec::new(connector_type)))
    }

    pub fn derived<I, S>(inputs: I, transform_type: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArtifactId>,
    {
        Self::with_production(Production::Derived {
            inputs: inputs.into_iter().map(Into::into).collect(),
            transform: ComponentSpec::new(transform_type),
        })
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.component_mut().properties = properties;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.component_mut().properties.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_output(mut self, output: bool) -> Self {
        self.output = output;
        self
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn is_source(&self) -> bool {
        matches!(self.production, Production::Source(_))
    }

    /// Referenced input ids; empty for source artifacts.
    pub fn inputs(&self) -> &[ArtifactId] {
        match &self.production {
            Production::Source(_) => &[],
            Production::Derived { inputs, .. } => inputs,
        }
    }

    /// Rewrite input references through `f`; sources are untouched.
    pub fn remap_inputs(&mut self, mut f: impl FnMut(&str) -> ArtifactId) {
        if let Production::Derived { inputs, .. } = &mut self.production {
            for input in inputs.iter_mut() {
                *input = f(input.as_str());
            }
        }
    }

    /// The connector or transform that produces this artifact.
    pub fn component(&self) -> &ComponentSpec {
        match &self.production {
            Production::Source(spec) => spec,
            Production::Derived { transform, .. } => transform,
        }
    }

    fn component_mut(&mut self) -> &mut ComponentSpec {
        match &mut self.production {
            Production::Source(spec) => spec,
            Production::Derived { transform, .. } => transform,
        }
    }

    fn validate(&self, id: &str) -> Result<(), WorkflowError> {
        if self.component().component_type.trim().is_empty() {
            return Err(WorkflowError::validation(id, "component type must not be empty"));
        }
        match &self.production {
            Production::Source(_) => {
                if self.input_schema.is_some() {
                    return Err(WorkflowError::validation(
                        id,
                        "'input_schema' requires 'inputs'",
                    ));
                }
            }
            Production::Derived { inputs, .. } => check_inputs(id, inputs)?,
        }
        Ok(())
    }
}

fn check_inputs(id: &str, inputs: &[ArtifactId]) -> Result<(), WorkflowError> {
    if inputs.is_empty() {
        return Err(WorkflowError::validation(id, "'inputs' must not be empty"));
    }
    for (pos, input) in inputs.iter().enumerate() {
        if !is_valid_identifier(input) {
            return Err(WorkflowError::validation(
                id,
                format!("malformed input reference '{}'", input),
            ));
        }
        if inputs[..pos].contains(input) {
            return Err(WorkflowError::validation(
                id,
                format!("input '{}' is listed more than once", input),
            ));
        }
    }
    Ok(())
}

/// Global execution settings declared by the workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    pub timeout: Option<Duration>,
    pub cost_limit: Option<f64>,
    pub max_concurrency: usize,
    pub max_child_depth: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            cost_limit: None,
            max_concurrency: 10,
            max_child_depth: 3,
        }
    }
}

impl WorkflowConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.max_concurrency == 0 {
            return Err(WorkflowError::invalid_workflow("max_concurrency must be at least 1"));
        }
        if self.max_child_depth == 0 {
            return Err(WorkflowError::invalid_workflow("max_child_depth must be at least 1"));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(WorkflowError::invalid_workflow("timeout must be greater than zero"));
        }
        if self.cost_limit.is_some_and(|c| !c.is_finite() || c < 0.0) {
            return Err(WorkflowError::invalid_workflow("cost_limit must be a non-negative number"));
        }
        Ok(())
    }
}

/// `^[A-Za-z_][A-Za-z0-9_.-]*$`
pub fn is_valid_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
