use crate::planner::{ExecutionPlan, ResolvedSchemas};
use crate::registry::ComponentRegistry;
use crate::store::ArtifactStore;
use crate::worker::WorkerPool;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use runbookcore::{
    ArtifactDefinition, ArtifactExecutionError, ArtifactId, EventBus, ExecutionEvent, Message,
    Production, RunId, Schema, Severity, SkipReason,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

type Call = Box<dyn FnOnce() -> Result<Message, ArtifactExecutionError> + Send>;

type Completion = (ArtifactId, Result<Message, ArtifactExecutionError>, Duration);

/// Executes plans as DAGs with bounded parallelism.
///
/// Owns the artifact store it writes into. The store is cleared at the start
/// of every execution and stays readable afterwards through [`store`].
///
/// [`store`]: DagExecutor::store
pub struct DagExecutor {
    registry: Arc<ComponentRegistry>,
    store: Arc<ArtifactStore>,
    events: Option<Arc<EventBus>>,
}

impl DagExecutor {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            registry,
            store: Arc::new(ArtifactStore::new()),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Store holding the messages of the most recent execution.
    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Execute a plan to completion or until its timeout elapses.
    ///
    /// Artifact failures never surface as an `Err`; they are recorded in the
    /// returned [`ExecutionResult`].
    pub async fn execute(&mut self, plan: &ExecutionPlan) -> ExecutionResult {
        self.execute_with_cancel(plan, CancellationToken::new()).await
    }

    /// Like [`execute`](Self::execute), but also stops when `cancel` fires.
    /// Calls already handed to the worker pool are abandoned, not awaited.
    pub async fn execute_with_cancel(
        &mut self,
        plan: &ExecutionPlan,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let run_id = RunId::new_v4();
        let started_at = Utc::now();
        let start_time = Instant::now();
        let workflow = plan.workflow();

        self.store.clear();
        self.emit(ExecutionEvent::RunStarted {
            run_id,
            workflow: workflow.name.clone(),
            artifacts: workflow.len(),
            timestamp: started_at,
        });
        tracing::info!(
            "Starting run {} of workflow '{}' ({} artifacts, max concurrency {})",
            run_id,
            workflow.name,
            workflow.len(),
            workflow.config.max_concurrency
        );

        let mut state = RunState::default();
        let deadline = async {
            match workflow.config.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        // a run that finishes in the same poll as its deadline still succeeds
        let interrupted = tokio::select! {
            biased;
            _ = self.drive(plan, run_id, &mut state) => None,
            _ = deadline => Some(SkipReason::Timeout),
            _ = cancel.cancelled() => Some(SkipReason::Cancelled),
        };

        if let Some(reason) = &interrupted {
            tracing::warn!("Run {} interrupted ({}); skipping unfinished artifacts", run_id, reason);
            for id in plan.execution_order() {
                if !state.results.contains_key(id) && !state.skipped.contains(id) {
                    self.skip(run_id, &mut state, id, reason.clone());
                }
            }
        }

        let total_duration = start_time.elapsed();
        let result = ExecutionResult {
            run_id,
            workflow: workflow.name.clone(),
            started_at,
            artifacts: state.results,
            skipped: state.skipped,
            skip_reasons: state.skip_reasons,
            timed_out: interrupted == Some(SkipReason::Timeout),
            cancelled: interrupted == Some(SkipReason::Cancelled),
            total_duration,
        };

        self.emit(ExecutionEvent::RunCompleted {
            run_id,
            success: result.is_success(),
            duration_ms: total_duration.as_millis() as u64,
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Run {} finished in {}ms: {} succeeded, {} failed, {} skipped",
            run_id,
            total_duration.as_millis(),
            result.completed().len(),
            result.failed().len(),
            result.skipped.len()
        );

        result
    }

    /// Scheduling loop. Streams completions: every finished artifact is
    /// recorded as soon as it arrives and newly unlocked artifacts launch
    /// while slots are free.
    ///
    /// All store writes happen here, so dropping this future (timeout or
    /// cancellation) discards whatever in-flight calls later produce.
    async fn drive(&self, plan: &ExecutionPlan, run_id: RunId, state: &mut RunState) {
        let workflow = plan.workflow();
        let limit = workflow.config.max_concurrency.max(1);
        let pool = WorkerPool::new(limit);
        let mut sorter = plan.graph().sorter();
        let mut queued: VecDeque<ArtifactId> = VecDeque::new();
        let mut running: FuturesUnordered<BoxFuture<'static, Completion>> = FuturesUnordered::new();

        loop {
            queued.extend(sorter.ready(&state.skipped));

            while running.len() < limit {
                let Some(id) = queued.pop_front() else {
                    break;
                };
                let (Some(definition), Some(schemas)) = (workflow.artifact(&id), plan.schemas(&id))
                else {
                    continue;
                };

                self.emit(ExecutionEvent::ArtifactStarted {
                    run_id,
                    artifact_id: id.clone(),
                    component_type: definition.component().component_type.clone(),
                    timestamp: Utc::now(),
                });
                tracing::debug!(artifact = %id, "Launching artifact ({} running)", running.len() + 1);

                let call = self.prepare(&id, definition, schemas);
                let pool = pool.clone();
                running.push(
                    async move {
                        let start = Instant::now();
                        let outcome = match call {
                            Ok(call) => pool.run(call).await,
                            Err(e) => Err(e),
                        };
                        (id, outcome, start.elapsed())
                    }
                    .boxed(),
                );
            }

            let Some((id, outcome, duration)) = running.next().await else {
                break;
            };
            let Some(definition) = workflow.artifact(&id) else {
                continue;
            };

            let outcome = outcome.and_then(|message| -> Result<_, ArtifactExecutionError> {
                self.store.save(id.clone(), message)?;
                Ok(self.store.get(&id)?)
            });

            match outcome {
                Ok(message) => {
                    tracing::info!(
                        artifact = %id,
                        duration_ms = duration.as_millis() as u64,
                        "Artifact produced {} items",
                        message.len()
                    );
                    self.emit(ExecutionEvent::ArtifactSucceeded {
                        run_id,
                        artifact_id: id.clone(),
                        items: message.len(),
                        duration_ms: duration.as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                    sorter.done(&id);
                    state.results.insert(
                        id.clone(),
                        ArtifactResult::new(id, definition, Ok(message), duration),
                    );
                }
                Err(error) => {
                    let severity = Severity::for_optional(definition.optional);
                    match severity {
                        Severity::Warning => tracing::warn!(
                            artifact = %id,
                            "Optional artifact failed: {}",
                            error
                        ),
                        Severity::Error => tracing::error!(artifact = %id, "Artifact failed: {}", error),
                    }
                    self.emit(ExecutionEvent::ArtifactFailed {
                        run_id,
                        artifact_id: id.clone(),
                        error: error.to_string(),
                        severity,
                        duration_ms: duration.as_millis() as u64,
                        timestamp: Utc::now(),
                    });

                    for dependent in plan.graph().transitive_dependents(&id) {
                        if !state.skipped.contains(&dependent) && !state.results.contains_key(&dependent) {
                            let reason = SkipReason::UpstreamFailed {
                                upstream: id.clone(),
                            };
                            self.skip(run_id, state, &dependent, reason);
                        }
                    }
                    state.results.insert(
                        id.clone(),
                        ArtifactResult::new(id, definition, Err(error), duration),
                    );
                }
            }
        }
    }

    /// Build the blocking call for one artifact. Upstream messages are read
    /// here, on the scheduling loop, after they were written.
    fn prepare(
        &self,
        id: &str,
        definition: &ArtifactDefinition,
        schemas: &ResolvedSchemas,
    ) -> Result<Call, ArtifactExecutionError> {
        let output = schemas.output.clone();
        match &definition.production {
            Production::Source(spec) => {
                let factory = self
                    .registry
                    .get_connector_factory(&spec.component_type)?;
                let properties = spec.properties.clone();
                Ok(Box::new(move || -> Result<Message, ArtifactExecutionError> {
                    let connector = factory.create(&properties)?;
                    let message = connector.extract(&output)?;
                    check_schema(&output, message)
                }))
            }
            Production::Derived { inputs, transform } => {
                let factory = self
                    .registry
                    .get_analyser_factory(&transform.component_type)?;
                let upstream = inputs
                    .iter()
                    .map(|input| self.store.get(input))
                    .collect::<Result<Vec<_>, _>>()?;
                let input_schema = schemas.input.clone().unwrap_or_else(|| output.clone());
                let properties = transform.properties.clone();
                let id = id.to_string();
                Ok(Box::new(move || -> Result<Message, ArtifactExecutionError> {
                    let input = merge(&id, input_schema, &upstream);
                    let analyser = factory.create(&properties)?;
                    let message = analyser.process(input, &output)?;
                    check_schema(&output, message)
                }))
            }
        }
    }

    fn skip(&self, run_id: RunId, state: &mut RunState, id: &str, reason: SkipReason) {
        tracing::warn!(artifact = %id, "Skipping artifact: {}", reason);
        self.emit(ExecutionEvent::ArtifactSkipped {
            run_id,
            artifact_id: id.to_string(),
            reason: reason.clone(),
            timestamp: Utc::now(),
        });
        state.skipped.insert(id.to_string());
        state.skip_reasons.insert(id.to_string(), reason);
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

/// Merge upstream messages with the concatenate strategy. A single input is
/// passed through unchanged.
fn merge(id: &str, schema: Schema, upstream: &[Arc<Message>]) -> Message {
    match upstream {
        [single] => Message::clone(single),
        many => Message::concatenate(id, schema, many.iter().map(|m| m.as_ref())),
    }
}

fn check_schema(expected: &Schema, message: Message) -> Result<Message, ArtifactExecutionError> {
    if message.schema != *expected {
        return Err(ArtifactExecutionError::SchemaMismatch {
            expected: expected.clone(),
            actual: message.schema,
        });
    }
    Ok(message)
}

/// Bookkeeping that must survive the scheduling loop being dropped.
#[derive(Default)]
struct RunState {
    results: HashMap<ArtifactId, ArtifactResult>,
    skipped: BTreeSet<ArtifactId>,
    skip_reasons: HashMap<ArtifactId, SkipReason>,
}

/// Final state of one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactStatus::Succeeded => f.write_str("succeeded"),
            ArtifactStatus::Failed => f.write_str("failed"),
            ArtifactStatus::Skipped => f.write_str("skipped"),
        }
    }
}

/// Outcome of an artifact that ran.
#[derive(Debug, Clone)]
pub struct ArtifactResult {
    pub artifact_id: ArtifactId,
    pub outcome: Result<Arc<Message>, ArtifactExecutionError>,
    pub duration: Duration,
    pub optional: bool,
    pub output: bool,
}

impl ArtifactResult {
    fn new(
        artifact_id: ArtifactId,
        definition: &ArtifactDefinition,
        outcome: Result<Arc<Message>, ArtifactExecutionError>,
        duration: Duration,
    ) -> Self {
        Self {
            artifact_id,
            outcome,
            duration,
            optional: definition.optional,
            output: definition.output,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn message(&self) -> Option<&Arc<Message>> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ArtifactExecutionError> {
        self.outcome.as_ref().err()
    }
}

/// Result of one execution. Artifacts that ran are in `artifacts`; the rest
/// are in `skipped`.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub run_id: RunId,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub artifacts: HashMap<ArtifactId, ArtifactResult>,
    pub skipped: BTreeSet<ArtifactId>,
    pub skip_reasons: HashMap<ArtifactId, SkipReason>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub total_duration: Duration,
}

impl ExecutionResult {
    pub fn status(&self, id: &str) -> Option<ArtifactStatus> {
        if let Some(result) = self.artifacts.get(id) {
            return Some(if result.is_success() {
                ArtifactStatus::Succeeded
            } else {
                ArtifactStatus::Failed
            });
        }
        self.skipped.contains(id).then_some(ArtifactStatus::Skipped)
    }

    pub fn skip_reason(&self, id: &str) -> Option<&SkipReason> {
        self.skip_reasons.get(id)
    }

    pub fn completed(&self) -> BTreeSet<ArtifactId> {
        self.select(|r| r.is_success())
    }

    pub fn failed(&self) -> BTreeSet<ArtifactId> {
        self.select(|r| !r.is_success())
    }

    /// Failed optional artifacts.
    pub fn warnings(&self) -> BTreeSet<ArtifactId> {
        self.select(|r| !r.is_success() && r.optional)
    }

    /// Failed non-optional artifacts.
    pub fn errors(&self) -> BTreeSet<ArtifactId> {
        self.select(|r| !r.is_success() && !r.optional)
    }

    /// No non-optional failures and the run was not interrupted.
    pub fn is_success(&self) -> bool {
        !self.timed_out && !self.cancelled && self.errors().is_empty()
    }

    /// Succeeded artifacts flagged `output`, sorted by id.
    pub fn exported(&self) -> Vec<(&ArtifactId, &Arc<Message>)> {
        let mut exported: Vec<_> = self
            .artifacts
            .iter()
            .filter(|(_, r)| r.output)
            .filter_map(|(id, r)| r.message().map(|m| (id, m)))
            .collect();
        exported.sort_by(|a, b| a.0.cmp(b.0));
        exported
    }

    fn select(&self, keep: impl Fn(&ArtifactResult) -> bool) -> BTreeSet<ArtifactId> {
        self.artifacts
            .values()
            .filter(|r| keep(r))
            .map(|r| r.artifact_id.clone())
            .collect()
    }
}
