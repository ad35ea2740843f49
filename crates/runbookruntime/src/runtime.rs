use crate::executor::{DagExecutor, ExecutionResult};
use crate::planner::{ExecutionPlan, Planner};
use crate::registry::ComponentRegistry;
use crate::store::ArtifactStore;
use runbookcore::{EventBus, ExecutionEvent, RunbookError};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Main entry point bundling registry, planner, executor and event bus.
pub struct RunbookRuntime {
    registry: Arc<ComponentRegistry>,
    planner: Planner,
    executor: DagExecutor,
    event_bus: Arc<EventBus>,
}

impl RunbookRuntime {
    /// Create a runtime over a fully populated registry
    pub fn with_registry(registry: ComponentRegistry, config: RuntimeConfig) -> Self {
        let registry = Arc::new(registry);
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let executor = DagExecutor::new(Arc::clone(&registry)).with_events(Arc::clone(&event_bus));

        Self {
            planner: Planner::new(Arc::clone(&registry)),
            registry,
            executor,
            event_bus,
        }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Plan a workflow file without running it.
    pub fn plan(&self, path: &Path) -> Result<ExecutionPlan, RunbookError> {
        Ok(self.planner.plan(path)?)
    }

    /// Plan and execute a workflow file.
    pub async fn run(&mut self, path: &Path) -> Result<ExecutionResult, RunbookError> {
        let plan = self.plan(path)?;
        Ok(self.executor.execute(&plan).await)
    }

    pub async fn execute(&mut self, plan: &ExecutionPlan) -> ExecutionResult {
        self.executor.execute(plan).await
    }

    pub async fn execute_with_cancel(
        &mut self,
        plan: &ExecutionPlan,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        self.executor.execute_with_cancel(plan, cancel).await
    }

    /// Messages of the most recent execution.
    pub fn store(&self) -> &Arc<ArtifactStore> {
        self.executor.store()
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Capacity of the execution event channel. Subscribers that fall
    /// further behind lose the oldest events.
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
        }
    }
}
