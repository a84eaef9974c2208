use std::sync::Arc;

use serde_json::Value;

use crate::config::AppConfig;
use crate::events::{EventKind, EventSink, TracingEventSink};

/// Everything a run needs from the outside world, built once and passed
/// down explicitly.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub config: Arc<AppConfig>,
    events: Arc<dyn EventSink>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, config: Arc<AppConfig>, events: Arc<dyn EventSink>) -> Self {
        Self {
            run_id: run_id.into(),
            config,
            events,
        }
    }

    /// A context with a fresh run id that logs events through tracing.
    pub fn with_config(config: AppConfig) -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            Arc::new(config),
            Arc::new(TracingEventSink),
        )
    }

    pub fn emit(&self, kind: EventKind, payload: Value) {
        self.events.emit(&self.run_id, kind, payload);
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
