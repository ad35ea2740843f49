//! Turns a workflow into an immutable, validated execution plan.

use crate::compose::{self, InputBinding};
use crate::dag::DependencyGraph;
use crate::parser;
use crate::registry::ComponentRegistry;
use runbookcore::{ArtifactDefinition, ArtifactId, Production, Schema, Workflow, WorkflowError};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Schemas an artifact consumes and produces, fixed at planning time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchemas {
    /// Schema of the merged upstream message; `None` for sources.
    pub input: Option<Schema>,
    pub output: Schema,
}

/// A workflow that passed every planning check, together with its graph
/// and resolved schemas. Only the [`Planner`] builds one.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    workflow: Workflow,
    graph: DependencyGraph,
    order: Vec<ArtifactId>,
    schemas: HashMap<ArtifactId, ResolvedSchemas>,
    aliases: BTreeMap<ArtifactId, ArtifactId>,
}

impl ExecutionPlan {
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Topological order, ties broken by declaration order.
    pub fn execution_order(&self) -> &[ArtifactId] {
        &self.order
    }

    pub fn schemas(&self, id: &str) -> Option<&ResolvedSchemas> {
        self.schemas.get(id)
    }

    pub fn output_schema(&self, id: &str) -> Option<&Schema> {
        self.schemas.get(id).map(|s| &s.output)
    }

    pub fn input_schema(&self, id: &str) -> Option<&Schema> {
        self.schemas.get(id).and_then(|s| s.input.as_ref())
    }

    /// Child runbook directive ids and output aliases, each mapped to the
    /// namespaced artifact it stands for.
    pub fn aliases(&self) -> &BTreeMap<ArtifactId, ArtifactId> {
        &self.aliases
    }

    /// The artifact id behind `id`, or `id` itself when it is not an alias.
    pub fn resolve_alias<'a>(&'a self, id: &'a str) -> &'a str {
        self.aliases.get(id).map(String::as_str).unwrap_or(id)
    }
}

pub struct Planner {
    registry: Arc<ComponentRegistry>,
}

impl Planner {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry }
    }

    /// Parse and plan a workflow file.
    pub fn plan(&self, path: &Path) -> Result<ExecutionPlan, WorkflowError> {
        let workflow = parser::parse_workflow(path)?;
        self.plan_workflow(workflow)
    }

    pub fn plan_str(&self, document: &str) -> Result<ExecutionPlan, WorkflowError> {
        let workflow = parser::parse_workflow_str(document)?;
        self.plan_workflow(workflow)
    }

    /// Plan an already-built workflow.
    ///
    /// # Errors
    ///
    /// Any configuration, child runbook, cycle, reference, component or
    /// schema problem. No plan is returned unless every artifact resolves.
    pub fn plan_workflow(&self, workflow: Workflow) -> Result<ExecutionPlan, WorkflowError> {
        workflow.validate_config()?;
        workflow.validate_interface()?;
        let compose::Flattened {
            workflow,
            aliases,
            bindings,
        } = compose::flatten(workflow)?;

        let graph = DependencyGraph::from_workflow(&workflow);
        graph.validate()?;
        check_references(&workflow)?;

        let order = graph.topological_order()?;
        let mut schemas: HashMap<ArtifactId, ResolvedSchemas> = HashMap::with_capacity(order.len());
        for id in &order {
            let Some(definition) = workflow.artifact(id) else {
                continue;
            };
            let resolved = self.resolve(id, definition, &schemas)?;
            tracing::debug!(
                artifact = %id,
                input = ?resolved.input.as_ref().map(ToString::to_string),
                output = %resolved.output,
                "Resolved schemas"
            );
            schemas.insert(id.clone(), resolved);
        }
        check_bindings(&bindings, &schemas)?;

        tracing::info!(
            "Planned workflow '{}': {} artifacts, depth {}",
            workflow.name,
            order.len(),
            graph.depth()?
        );

        Ok(ExecutionPlan {
            workflow,
            graph,
            order,
            schemas,
            aliases,
        })
    }

    fn resolve(
        &self,
        id: &str,
        definition: &ArtifactDefinition,
        resolved: &HashMap<ArtifactId, ResolvedSchemas>,
    ) -> Result<ResolvedSchemas, WorkflowError> {
        match &definition.production {
            Production::Source(spec) => {
                let factory = self.registry.get_connector_factory(&spec.component_type)?;
                let output = resolve_output(id, definition, &factory.output_schemas(), None)?;
                Ok(ResolvedSchemas {
                    input: None,
                    output,
                })
            }
            Production::Derived { inputs, transform } => {
                let input = resolve_input(id, inputs, resolved)?;
                if let Some(pinned) = &definition.input_schema {
                    if *pinned != input {
                        return Err(WorkflowError::SchemaCompatibility {
                            artifact: id.to_string(),
                            message: format!(
                                "input_schema {} does not match upstream schema {}",
                                pinned, input
                            ),
                        });
                    }
                }

                let factory = self.registry.get_analyser_factory(&transform.component_type)?;
                let accepted = factory.input_schemas();
                if !accepted.is_empty() && !accepted.contains(&input) {
                    return Err(WorkflowError::SchemaCompatibility {
                        artifact: id.to_string(),
                        message: format!(
                            "transform '{}' does not accept {} (accepts {})",
                            transform.component_type,
                            input,
                            join(&accepted)
                        ),
                    });
                }

                let output =
                    resolve_output(id, definition, &factory.output_schemas(), Some(&input))?;
                Ok(ResolvedSchemas {
                    input: Some(input),
                    output,
                })
            }
        }
    }
}

fn check_references(workflow: &Workflow) -> Result<(), WorkflowError> {
    for (id, definition) in workflow.artifacts() {
        if let Some(reference) = definition.inputs().iter().find(|r| !workflow.contains(r)) {
            return Err(WorkflowError::MissingArtifact {
                artifact: id.clone(),
                reference: reference.clone(),
            });
        }
    }
    Ok(())
}

/// Artifacts mapped into a child runbook must produce the schema the child
/// declares for that input.
fn check_bindings(
    bindings: &[InputBinding],
    resolved: &HashMap<ArtifactId, ResolvedSchemas>,
) -> Result<(), WorkflowError> {
    for binding in bindings {
        let Some(actual) = resolved.get(&binding.artifact).map(|r| &r.output) else {
            return Err(WorkflowError::MissingArtifact {
                artifact: binding.directive.clone(),
                reference: binding.artifact.clone(),
            });
        };
        if *actual != binding.schema {
            return Err(WorkflowError::SchemaCompatibility {
                artifact: binding.directive.clone(),
                message: format!(
                    "input '{}' expects {} but '{}' produces {}",
                    binding.input, binding.schema, binding.artifact, actual
                ),
            });
        }
    }
    Ok(())
}

/// Fan-in inputs must agree on one schema.
fn resolve_input(
    id: &str,
    inputs: &[ArtifactId],
    resolved: &HashMap<ArtifactId, ResolvedSchemas>,
) -> Result<Schema, WorkflowError> {
    let mut upstream = inputs.iter().map(|input| {
        resolved
            .get(input)
            .map(|r| (input, &r.output))
            .ok_or_else(|| WorkflowError::MissingArtifact {
                artifact: id.to_string(),
                reference: input.clone(),
            })
    });

    let (first_id, first) = match upstream.next() {
        Some(entry) => entry?,
        None => return Err(WorkflowError::validation(id, "'inputs' must not be empty")),
    };
    for entry in upstream {
        let (other_id, other) = entry?;
        if other != first {
            return Err(WorkflowError::SchemaCompatibility {
                artifact: id.to_string(),
                message: format!(
                    "fan-in inputs disagree: '{}' produces {} but '{}' produces {}",
                    first_id, first, other_id, other
                ),
            });
        }
    }
    Ok(first.clone())
}

/// Explicit override first, then the component's first declared schema.
/// Transforms that declare no output schema pass their input schema on.
fn resolve_output(
    id: &str,
    definition: &ArtifactDefinition,
    declared: &[Schema],
    input: Option<&Schema>,
) -> Result<Schema, WorkflowError> {
    let component = &definition.component().component_type;
    match &definition.output_schema {
        Some(wanted) if declared.is_empty() || declared.contains(wanted) => Ok(wanted.clone()),
        Some(wanted) => Err(WorkflowError::SchemaCompatibility {
            artifact: id.to_string(),
            message: format!(
                "'{}' cannot produce {} (produces {})",
                component,
                wanted,
                join(declared)
            ),
        }),
        None => declared.first().or(input).cloned().ok_or_else(|| WorkflowError::SchemaCompatibility {
            artifact: id.to_string(),
            message: format!(
                "'{}' declares no output schema; set output_schema explicitly",
                component
            ),
        }),
    }
}

fn join(schemas: &[Schema]) -> String {
    schemas.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
