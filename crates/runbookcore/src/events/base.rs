use crate::ArtifactId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

pub type RunId = Uuid;

/// How loudly a failed artifact is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Failure of an `optional` artifact.
    Warning,
    Error,
}

impl Severity {
    pub fn for_optional(optional: bool) -> Self {
        if optional {
            Severity::Warning
        } else {
            Severity::Error
        }
    }
}

/// Why an artifact never ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// An ancestor failed or was itself skipped. `upstream` is the artifact
    /// whose failure started the cascade.
    UpstreamFailed { upstream: ArtifactId },
    /// The global deadline elapsed before the artifact succeeded.
    Timeout,
    /// The run was cancelled externally.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpstreamFailed { upstream } => write!(f, "upstream '{}' failed", upstream),
            SkipReason::Timeout => f.write_str("timed out"),
            SkipReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Events emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: RunId,
        workflow: String,
        artifacts: usize,
        timestamp: DateTime<Utc>,
    },
    ArtifactStarted {
        run_id: RunId,
        artifact_id: ArtifactId,
        component_type: String,
        timestamp: DateTime<Utc>,
    },
    ArtifactSucceeded {
        run_id: RunId,
        artifact_id: ArtifactId,
        items: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ArtifactFailed {
        run_id: RunId,
        artifact_id: ArtifactId,
        error: String,
        severity: Severity,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ArtifactSkipped {
        run_id: RunId,
        artifact_id: ArtifactId,
        reason: SkipReason,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: RunId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            ExecutionEvent::RunStarted { run_id, .. }
            | ExecutionEvent::ArtifactStarted { run_id, .. }
            | ExecutionEvent::ArtifactSucceeded { run_id, .. }
            | ExecutionEvent::ArtifactFailed { run_id, .. }
            | ExecutionEvent::ArtifactSkipped { run_id, .. }
            | ExecutionEvent::RunCompleted { run_id, .. } => *run_id,
        }
    }
}

/// Broadcast channel for execution events. Emitting without subscribers is
/// a no-op; slow subscribers lag rather than block the executor.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let run_id = RunId::new_v4();

        bus.emit(ExecutionEvent::ArtifactSkipped {
            run_id,
            artifact_id: "b".to_string(),
            reason: SkipReason::UpstreamFailed {
                upstream: "a".to_string(),
            },
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id(), run_id);
        match event {
            ExecutionEvent::ArtifactSkipped { artifact_id, reason, .. } => {
                assert_eq!(artifact_id, "b");
                assert_eq!(reason.to_string(), "upstream 'a' failed");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new(4);
        bus.emit(ExecutionEvent::RunCompleted {
            run_id: RunId::new_v4(),
            success: true,
            duration_ms: 0,
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn test_severity_for_optional() {
        assert_eq!(Severity::for_optional(true), Severity::Warning);
        assert_eq!(Severity::for_optional(false), Severity::Error);
    }
}
