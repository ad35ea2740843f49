//! Core abstractions for the runbook engine
//!
//! This crate provides the workflow model, schema and message types, the
//! component traits plugins implement, and the error and event types every
//! other crate depends on. It does no scheduling of its own.

mod component;
mod error;
pub mod events;
mod message;
mod schema;
mod workflow;

pub use component::{Analyser, Connector};
pub use error::{
    ArtifactExecutionError, ComponentError, ComponentKind, RunbookError, StoreError, WorkflowError,
};
pub use events::*;
pub use message::Message;
pub use schema::{Schema, DEFAULT_SCHEMA_VERSION};
pub use workflow::{
    is_valid_identifier, ArtifactDefinition, ArtifactId, ChildDirective, ChildOutputs,
    ChildRunbook, ComponentSpec, InputDeclaration, MergeStrategy, OutputDeclaration, Production,
    Properties, Workflow, WorkflowConfig,
};

/// Result type for runbook operations
pub type Result<T> = std::result::Result<T, RunbookError>;
