//! Plan-time expansion of child runbooks.
//!
//! A `child_runbook` directive splices another runbook file into its
//! parent. Child artifacts are renamed `<directive>__<artifact>`, their
//! references to declared inputs are rewired onto the mapped parent
//! artifacts, and the directive id (or each `output_mapping` alias) becomes
//! an alias for the exposed child artifact. Nesting is bounded by the root
//! runbook's `max_child_depth`.

use crate::parser;
use indexmap::IndexMap;
use runbookcore::{ArtifactId, ChildDirective, ChildOutputs, Schema, Workflow, WorkflowError};
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

pub const NAMESPACE_SEPARATOR: &str = "__";

/// A parent artifact fed into a declared child input.
#[derive(Debug, Clone)]
pub(crate) struct InputBinding {
    pub directive: ArtifactId,
    pub input: String,
    pub artifact: ArtifactId,
    pub schema: Schema,
}

pub(crate) struct Flattened {
    pub workflow: Workflow,
    /// `alias -> artifact id`, already followed to a real artifact.
    pub aliases: BTreeMap<ArtifactId, ArtifactId>,
    pub bindings: Vec<InputBinding>,
}

/// Replace every child directive of `workflow` with the artifacts it
/// expands into.
pub(crate) fn flatten(mut workflow: Workflow) -> Result<Flattened, WorkflowError> {
    if !workflow.has_children() {
        return Ok(Flattened {
            workflow,
            aliases: BTreeMap::new(),
            bindings: Vec::new(),
        });
    }
    let children = workflow.take_children();

    let Some(root_path) = workflow.source_path().map(Path::to_path_buf) else {
        let id = children.keys().next().cloned().unwrap_or_default();
        return Err(WorkflowError::validation(
            id,
            "child runbooks can only be resolved for workflows loaded from a file",
        ));
    };

    let mut flattener = Flattener {
        max_depth: workflow.config.max_child_depth,
        workflow,
        aliases: BTreeMap::new(),
        bindings: Vec::new(),
        exported: Vec::new(),
        references: Vec::new(),
    };
    let level = Level {
        scope: Scope::root(),
        dir: parent_dir(&root_path),
        ancestors: vec![canonical(&root_path)?],
        optional: false,
    };
    flattener.expand_all(&children, &level)?;
    flattener.finish()
}

/// Maps the names visible inside one runbook to plan-wide ids.
struct Scope {
    prefix: Option<String>,
    inputs: HashMap<String, ArtifactId>,
}

impl Scope {
    fn root() -> Self {
        Self {
            prefix: None,
            inputs: HashMap::new(),
        }
    }

    /// Declared inputs resolve to the parent artifact mapped onto them;
    /// everything else is namespaced.
    fn resolve(&self, name: &str) -> ArtifactId {
        match self.inputs.get(name) {
            Some(id) => id.clone(),
            None => self.namespaced(name),
        }
    }

    fn namespaced(&self, name: &str) -> ArtifactId {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, name),
            None => name.to_string(),
        }
    }
}

/// Where a set of directives was declared.
struct Level {
    scope: Scope,
    dir: PathBuf,
    /// Canonical paths from the root runbook down to the declaring one.
    ancestors: Vec<PathBuf>,
    optional: bool,
}

struct Flattener {
    max_depth: usize,
    workflow: Workflow,
    aliases: BTreeMap<ArtifactId, ArtifactId>,
    bindings: Vec<InputBinding>,
    /// Aliases whose target is exported.
    exported: Vec<ArtifactId>,
    /// `(directive, input)` pairs that must name a real artifact.
    references: Vec<(ArtifactId, ArtifactId)>,
}

impl Flattener {
    fn expand_all(
        &mut self,
        directives: &IndexMap<ArtifactId, ChildDirective>,
        level: &Level,
    ) -> Result<(), WorkflowError> {
        for (id, directive) in directives {
            self.expand(id, directive, level)?;
        }
        Ok(())
    }

    fn expand(
        &mut self,
        id: &str,
        directive: &ChildDirective,
        level: &Level,
    ) -> Result<(), WorkflowError> {
        let directive_id = level.scope.namespaced(id);
        let path = child_path(&directive_id, &directive.runbook.path, &level.dir)?;
        let resolved = canonical(&path)?;
        if let Some(start) = level.ancestors.iter().position(|p| *p == resolved) {
            let mut chain: Vec<String> = level.ancestors[start..]
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            chain.push(resolved.display().to_string());
            return Err(WorkflowError::CircularRunbook { chain });
        }
        if level.ancestors.len() > self.max_depth {
            return Err(WorkflowError::validation(
                &directive_id,
                format!(
                    "child runbook nesting exceeds max_child_depth of {}",
                    self.max_depth
                ),
            ));
        }

        let mut child = parser::parse_workflow(&path)?;
        tracing::debug!(
            artifact = %directive_id,
            path = %path.display(),
            "Expanding child runbook '{}'",
            child.name
        );

        for input in &directive.inputs {
            self.references
                .push((directive_id.clone(), level.scope.resolve(input)));
        }

        let mut scope = Scope {
            prefix: Some(format!("{}{}", directive_id, NAMESPACE_SEPARATOR)),
            inputs: HashMap::new(),
        };
        for (input, parent) in &directive.runbook.input_mapping {
            let Some(declared) = child.input(input) else {
                return Err(WorkflowError::validation(
                    &directive_id,
                    format!("child runbook '{}' declares no input '{}'", child.name, input),
                ));
            };
            let artifact = level.scope.resolve(parent);
            self.bindings.push(InputBinding {
                directive: directive_id.clone(),
                input: input.clone(),
                artifact: artifact.clone(),
                schema: declared.schema.clone(),
            });
            scope.inputs.insert(input.clone(), artifact);
        }
        if let Some((input, _)) = child
            .inputs()
            .find(|(name, declared)| !declared.optional && !scope.inputs.contains_key(*name))
        {
            return Err(WorkflowError::validation(
                &directive_id,
                format!(
                    "child runbook '{}' requires input '{}' but it is not mapped",
                    child.name, input
                ),
            ));
        }

        let exposed: Vec<(&str, ArtifactId)> = match &directive.runbook.outputs {
            ChildOutputs::Single(name) => vec![(name.as_str(), directive_id.clone())],
            ChildOutputs::Mapped(mapping) => mapping
                .iter()
                .map(|(name, alias)| (name.as_str(), level.scope.namespaced(alias)))
                .collect(),
        };
        for (name, alias) in exposed {
            let Some(declared) = child.output(name) else {
                return Err(WorkflowError::validation(
                    &directive_id,
                    format!("child runbook '{}' has no output '{}'", child.name, name),
                ));
            };
            let target = scope.resolve(&declared.artifact);
            if self.aliases.insert(alias.clone(), target).is_some() {
                return Err(WorkflowError::validation(alias, "alias is defined more than once"));
            }
            if directive.output {
                self.exported.push(alias);
            }
        }

        let optional = level.optional || directive.optional;
        let nested = child.take_children();
        for (local, definition) in child.artifacts() {
            let mut definition = definition.clone();
            definition.remap_inputs(|input| scope.resolve(input));
            definition.optional |= optional;
            self.workflow.add_artifact(scope.namespaced(local), definition)?;
        }

        let mut ancestors = level.ancestors.clone();
        ancestors.push(resolved);
        let nested_level = Level {
            scope,
            dir: parent_dir(&path),
            ancestors,
            optional,
        };
        self.expand_all(&nested, &nested_level)
    }

    fn finish(mut self) -> Result<Flattened, WorkflowError> {
        if let Some(alias) = self.aliases.keys().find(|a| self.workflow.contains(a)) {
            return Err(WorkflowError::validation(
                alias,
                "child runbook alias collides with an artifact id",
            ));
        }

        // a child output may itself be a nested directive's alias
        let aliases: BTreeMap<ArtifactId, ArtifactId> = self
            .aliases
            .keys()
            .map(|alias| (alias.clone(), follow(&self.aliases, alias)))
            .collect();
        let resolve = |id: &str| aliases.get(id).cloned().unwrap_or_else(|| id.to_string());

        self.workflow.remap_inputs(resolve);
        for (directive, input) in &self.references {
            if !self.workflow.contains(&resolve(input)) {
                return Err(WorkflowError::MissingArtifact {
                    artifact: directive.clone(),
                    reference: input.clone(),
                });
            }
        }
        for binding in &mut self.bindings {
            binding.artifact = resolve(&binding.artifact);
        }
        for alias in &self.exported {
            if let Some(definition) = self.workflow.artifact_mut(&resolve(alias)) {
                definition.output = true;
            }
        }

        tracing::debug!(
            "Expanded child runbooks of '{}': {} artifacts, {} aliases",
            self.workflow.name,
            self.workflow.len(),
            aliases.len()
        );
        Ok(Flattened {
            workflow: self.workflow,
            aliases,
            bindings: self.bindings,
        })
    }
}

/// Follow an alias chain to the artifact at its end. Chains are bounded by
/// the number of aliases, since every hop descends one namespace.
fn follow(aliases: &BTreeMap<ArtifactId, ArtifactId>, alias: &str) -> ArtifactId {
    let mut current = alias;
    for _ in 0..=aliases.len() {
        match aliases.get(current) {
            Some(next) => current = next,
            None => break,
        }
    }
    current.to_string()
}

/// Child paths are relative and may not climb out of the declaring
/// runbook's directory.
fn child_path(id: &str, path: &Path, dir: &Path) -> Result<PathBuf, WorkflowError> {
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(WorkflowError::validation(
            id,
            format!(
                "child runbook path '{}' must be relative and stay inside its parent's directory",
                path.display()
            ),
        ));
    }
    Ok(dir.join(path))
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn canonical(path: &Path) -> Result<PathBuf, WorkflowError> {
    path.canonicalize().map_err(|e| {
        WorkflowError::Parse(format!("cannot read workflow file {}: {}", path.display(), e))
    })
}
