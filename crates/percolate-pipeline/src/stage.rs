use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A step of the build or cache pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Provision,
    BuildHook,
    Transpile,
    Bundle,
    Launcher,
    Assemble,
    CacheSnapshot,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::BuildHook => "build_hook",
            Self::Transpile => "transpile",
            Self::Bundle => "bundle",
            Self::Launcher => "launcher",
            Self::Assemble => "assemble",
            Self::CacheSnapshot => "cache_snapshot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Started,
    Succeeded,
    /// Failed, but the pipeline carries on.
    Recovered,
    Failed,
}

/// Whether a stage's failure aborts the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Fatal,
    Recoverable,
}

/// A stage transition, as delivered to a [`StageObserver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    pub build_id: String,
    pub stage: Stage,
    pub status: StageStatus,
    /// Set on every status but `Started`.
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Receives stage transitions. Implementations can log, record, or forward.
pub trait StageObserver: Send + Sync {
    fn on_event(&self, event: &StageEvent);
}

/// Emits stage transitions as structured log events.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl StageObserver for TracingObserver {
    fn on_event(&self, event: &StageEvent) {
        let stage = event.stage.as_str();
        let build_id = event.build_id.as_str();
        match event.status {
            StageStatus::Started => tracing::info!(build_id, stage, "Stage started"),
            StageStatus::Succeeded => tracing::info!(
                build_id,
                stage,
                duration_ms = event.duration_ms,
                "Stage complete"
            ),
            StageStatus::Recovered => tracing::warn!(
                build_id,
                stage,
                duration_ms = event.duration_ms,
                error = event.error.as_deref().unwrap_or_default(),
                "Stage failed; continuing"
            ),
            StageStatus::Failed => tracing::error!(
                build_id,
                stage,
                duration_ms = event.duration_ms,
                error = event.error.as_deref().unwrap_or_default(),
                "Stage failed"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<StageEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StageEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// `(stage, status)` pairs in arrival order.
    pub fn transitions(&self) -> Vec<(Stage, StageStatus)> {
        self.events()
            .into_iter()
            .map(|e| (e.stage, e.status))
            .collect()
    }
}

impl StageObserver for RecordingObserver {
    fn on_event(&self, event: &StageEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Forwards every event to each inner observer in turn.
pub struct FanoutObserver {
    observers: Vec<Arc<dyn StageObserver>>,
}

impl FanoutObserver {
    pub fn new(observers: Vec<Arc<dyn StageObserver>>) -> Self {
        Self { observers }
    }
}

impl StageObserver for FanoutObserver {
    fn on_event(&self, event: &StageEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

/// What a stage produced, and whether a failure may be stepped over.
#[derive(Debug)]
pub struct StageResult<T> {
    pub stage: Stage,
    pub outcome: Result<T, PipelineError>,
    pub recoverable: bool,
    pub duration: Duration,
}

impl<T> StageResult<T> {
    /// The stage's output, or its error regardless of policy.
    pub fn into_result(self) -> Result<T, PipelineError> {
        self.outcome
    }

    /// `Ok(Some(_))` on success, `Ok(None)` for a recoverable failure, and
    /// `Err` for a fatal one.
    pub fn recover(self) -> Result<Option<T>, PipelineError> {
        match self.outcome {
            Ok(value) => Ok(Some(value)),
            Err(_) if self.recoverable => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Runs stages for one invocation, timing them and reporting transitions.
pub struct StageRunner {
    build_id: String,
    observer: Arc<dyn StageObserver>,
}

impl StageRunner {
    pub fn new(build_id: impl Into<String>, observer: Arc<dyn StageObserver>) -> Self {
        Self {
            build_id: build_id.into(),
            observer,
        }
    }

    pub async fn run<T, F>(&self, stage: Stage, policy: FailurePolicy, work: F) -> StageResult<T>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        self.emit(stage, StageStatus::Started, None, None);
        let start = Instant::now();
        let outcome = work.await;
        let duration = start.elapsed();
        let recoverable = policy == FailurePolicy::Recoverable;

        let duration_ms = Some(duration.as_millis() as u64);
        match &outcome {
            Ok(_) => self.emit(stage, StageStatus::Succeeded, duration_ms, None),
            Err(e) if recoverable => {
                self.emit(stage, StageStatus::Recovered, duration_ms, Some(e.to_string()));
            }
            Err(e) => self.emit(stage, StageStatus::Failed, duration_ms, Some(e.to_string())),
        }

        StageResult {
            stage,
            outcome,
            recoverable,
            duration,
        }
    }

    fn emit(
        &self,
        stage: Stage,
        status: StageStatus,
        duration_ms: Option<u64>,
        error: Option<String>,
    ) {
        self.observer.on_event(&StageEvent {
            build_id: self.build_id.clone(),
            stage,
            status,
            duration_ms,
            error,
            timestamp: Utc::now(),
        });
    }
}
