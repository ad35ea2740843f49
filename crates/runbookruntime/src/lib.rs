//! Workflow planning and execution runtime
//!
//! This crate turns workflow documents into validated execution plans and
//! drives them as DAGs: parsing, child runbook expansion, the dependency
//! graph, the component registry, schema resolution, the artifact store and
//! the executor.

mod codec;
mod compose;
mod dag;
mod executor;
mod parser;
mod planner;
mod registry;
mod runtime;
mod store;
mod worker;

pub use codec::SchemaCodecs;
pub use compose::NAMESPACE_SEPARATOR;
pub use dag::{DependencyGraph, GraphSorter};
pub use executor::{ArtifactResult, ArtifactStatus, DagExecutor, ExecutionResult};
pub use parser::{parse_workflow, parse_workflow_str, parse_workflow_str_with_env, substitute_env_vars};
pub use planner::{ExecutionPlan, Planner, ResolvedSchemas};
pub use registry::{
    AnalyserFactory, ComponentInfo, ComponentMetadata, ComponentRegistry, ConnectorFactory,
};
pub use runtime::{RunbookRuntime, RuntimeConfig};
pub use store::ArtifactStore;
pub use worker::WorkerPool;
