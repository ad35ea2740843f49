use crate::Schema;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunbookError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Which registry table a component type was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Connector,
    Analyser,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Connector => f.write_str("connector"),
            ComponentKind::Analyser => f.write_str("analyser"),
        }
    }
}

/// Planning-time errors. Every variant is fatal: a plan is never produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Failed to parse workflow: {0}")]
    Parse(String),

    #[error("{}", validation_message(.artifact, .message))]
    Validation {
        artifact: Option<String>,
        message: String,
    },

    #[error("Cycle detected in artifact dependencies: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("Artifact '{artifact}' references non-existent artifact '{reference}'")]
    MissingArtifact { artifact: String, reference: String },

    #[error("Schema incompatibility in artifact '{artifact}': {message}")]
    SchemaCompatibility { artifact: String, message: String },

    #[error("Unknown {kind} type: {component_type}")]
    ComponentNotFound {
        kind: ComponentKind,
        component_type: String,
    },

    #[error("Circular child runbook reference: {}", .chain.join(" -> "))]
    CircularRunbook { chain: Vec<String> },
}

impl WorkflowError {
    pub fn validation(artifact: impl Into<String>, message: impl Into<String>) -> Self {
        WorkflowError::Validation {
            artifact: Some(artifact.into()),
            message: message.into(),
        }
    }

    pub fn invalid_workflow(message: impl Into<String>) -> Self {
        WorkflowError::Validation {
            artifact: None,
            message: message.into(),
        }
    }

    /// The artifact id the error is attributed to, if any.
    pub fn artifact(&self) -> Option<&str> {
        match self {
            WorkflowError::Validation { artifact, .. } => artifact.as_deref(),
            WorkflowError::MissingArtifact { artifact, .. }
            | WorkflowError::SchemaCompatibility { artifact, .. } => Some(artifact),
            WorkflowError::CycleDetected { cycle } => cycle.first().map(String::as_str),
            WorkflowError::Parse(_)
            | WorkflowError::ComponentNotFound { .. }
            | WorkflowError::CircularRunbook { .. } => None,
        }
    }
}

fn validation_message(artifact: &Option<String>, message: &str) -> String {
    match artifact {
        Some(id) => format!("Invalid artifact '{}': {}", id, message),
        None => format!("Invalid workflow: {}", message),
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Artifact '{0}' not found in store")]
    NotFound(String),

    #[error("Artifact '{0}' has already been written")]
    AlreadyWritten(String),
}

/// Errors raised by connector and analyser implementations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComponentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Unsupported schema: {0}")]
    UnsupportedSchema(Schema),
}

/// Failure of a single artifact during execution. Captured in the
/// artifact's result, never raised out of the executor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArtifactExecutionError {
    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The plan referenced something the executing registry cannot
    /// provide, typically a component type it never registered.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("Component produced schema {actual}, expected {expected}")]
    SchemaMismatch { expected: Schema, actual: Schema },

    #[error("Worker task panicked: {0}")]
    Panicked(String),
}
