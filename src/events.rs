use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    StepStarted,
    StepFinished,
    StepRetried,
    Decision,
    HealAttempted,
    BranchDiverged,
    InvariantViolated,
    RunFinished,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub run_id: String,
    pub kind: EventKind,
    pub payload: Value,
    pub at: DateTime<Utc>,
}

/// Append-only event log the core reports to but does not own. Emitting
/// never fails from the caller's point of view.
pub trait EventSink: Send + Sync {
    fn emit(&self, run_id: &str, kind: EventKind, payload: Value);
}

/// Writes every event to the tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, run_id: &str, kind: EventKind, payload: Value) {
        tracing::info!(run_id, kind = ?kind, payload = %payload, "event");
    }
}

/// In-memory append-only log keyed by run id. Safe under concurrent runs.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    runs: DashMap<String, Vec<Event>>,
}

impl MemoryEventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self, run_id: &str) -> Vec<Event> {
        self.runs
            .get(run_id)
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self, run_id: &str) -> Vec<EventKind> {
        self.events(run_id).into_iter().map(|e| e.kind).collect()
    }
}

impl EventSink for MemoryEventLog {
    fn emit(&self, run_id: &str, kind: EventKind, payload: Value) {
        self.runs.entry(run_id.to_string()).or_default().push(Event {
            run_id: run_id.to_string(),
            kind,
            payload,
            at: Utc::now(),
        });
    }
}
