use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::context::RunContext;
use crate::events::EventKind;
use crate::healing::{
    ArtifactId, DefinitionScanner, EntityDiscovery, ErrorRouter, FallbackGenerator, RegenerationOutcome,
    RegenerationRequest, Regenerator, StubFallback,
};
use crate::workspace::{FileStore, LocalFileStore};

#[derive(Debug, Clone, Default)]
pub struct HealRequest {
    pub step: String,
    pub error: Option<String>,
    pub instructions: Option<String>,
}

impl HealRequest {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealOutcome {
    /// The regenerator rewrote the artifact directly in the workspace.
    HealedInPlace {
        artifact: ArtifactId,
        files_written: Vec<String>,
    },
    /// Fallback content, already written to the workspace.
    Content {
        artifact: ArtifactId,
        files: BTreeMap<String, String>,
    },
    NoRepair { reason: String },
}

impl HealOutcome {
    pub fn is_healed(&self) -> bool {
        !matches!(self, HealOutcome::NoRepair { .. })
    }

    pub fn path(&self) -> HealPath {
        match self {
            HealOutcome::HealedInPlace { .. } => HealPath::Intelligent,
            HealOutcome::Content { .. } => HealPath::Fallback,
            HealOutcome::NoRepair { .. } => HealPath::None,
        }
    }
}

/// Which repair path produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealPath {
    Intelligent,
    Fallback,
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealRecord {
    pub step: String,
    pub artifact: Option<ArtifactId>,
    pub path: HealPath,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct HealReport {
    pub healed: Vec<String>,
    pub still_failed: Vec<String>,
    pub outcomes: Vec<(String, HealOutcome)>,
}

impl HealReport {
    pub fn all_healed(&self) -> bool {
        self.still_failed.is_empty()
    }
}

/// Repairs the artifact behind a failed step: a [`Regenerator`] rewrites it
/// in place, and if that fails a [`FallbackGenerator`] writes placeholder
/// content keyed by the workspace's primary entity.
pub struct HealingPipeline {
    root: PathBuf,
    router: ErrorRouter,
    regenerator: Arc<dyn Regenerator>,
    fallback: Arc<dyn FallbackGenerator>,
    discovery: Arc<dyn EntityDiscovery>,
    files: Arc<dyn FileStore>,
    history: Vec<HealRecord>,
}

impl HealingPipeline {
    pub fn new(
        root: impl Into<PathBuf>,
        router: ErrorRouter,
        regenerator: Arc<dyn Regenerator>,
        fallback: Arc<dyn FallbackGenerator>,
        discovery: Arc<dyn EntityDiscovery>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            root: root.into(),
            router,
            regenerator,
            fallback,
            discovery,
            files,
            history: Vec::new(),
        }
    }

    /// Pipeline over the local file system with the default routing table,
    /// the stub fallback and the definition scanner.
    pub fn local(root: impl Into<PathBuf>, regenerator: Arc<dyn Regenerator>) -> Self {
        let files: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());
        Self::new(
            root,
            ErrorRouter::default(),
            regenerator,
            Arc::new(StubFallback::new()),
            Arc::new(DefinitionScanner::with_default_candidates(Arc::clone(&files))),
            files,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn router(&self) -> &ErrorRouter {
        &self.router
    }

    pub fn history(&self) -> &[HealRecord] {
        &self.history
    }

    /// Try to repair whatever `request.step` produced: intelligent
    /// regeneration first, then the fallback generator.
    pub async fn attempt_heal(&mut self, ctx: &RunContext, request: &HealRequest) -> HealOutcome {
        let step = request.step.as_str();
        let Some(artifact) = self.router.route(step).cloned() else {
            tracing::info!(step, "No repairable artifact for step");
            let outcome = HealOutcome::NoRepair {
                reason: format!("no repairable artifact for step '{step}'"),
            };
            self.record(ctx, step, None, &outcome);
            return outcome;
        };

        tracing::info!(step, artifact = %artifact.path, kind = %artifact.kind, "Attempting heal");

        let regeneration = RegenerationRequest {
            root: self.root.clone(),
            step: step.to_string(),
            artifact: artifact.clone(),
            error: request.error.clone(),
            instructions: request.instructions.clone(),
        };
        let regen_failure = match self.regenerator.regenerate(&regeneration).await {
            RegenerationOutcome::Healed { files_written } => {
                tracing::info!(step, files = files_written.len(), "Artifact regenerated");
                let outcome = HealOutcome::HealedInPlace {
                    artifact: artifact.clone(),
                    files_written,
                };
                self.record(ctx, step, Some(artifact), &outcome);
                return outcome;
            }
            RegenerationOutcome::Failed { reason } => {
                tracing::warn!(step, reason = %reason, "Regeneration failed, trying fallback");
                reason
            }
        };

        let outcome = self.fallback_heal(&artifact, &regen_failure).await;
        self.record(ctx, step, Some(artifact), &outcome);
        outcome
    }

    async fn fallback_heal(&self, artifact: &ArtifactId, regen_failure: &str) -> HealOutcome {
        let Some(entity) = self.discovery.discover(&self.root).await else {
            return HealOutcome::NoRepair {
                reason: format!("regeneration failed ({regen_failure}) and no primary entity was found"),
            };
        };

        let Some(files) = self.fallback.generate(artifact, &entity) else {
            return HealOutcome::NoRepair {
                reason: format!(
                    "regeneration failed ({regen_failure}) and no fallback exists for {}",
                    artifact.path
                ),
            };
        };

        match self.files.write_files(&self.root, &files).await {
            Ok(written) => {
                tracing::info!(
                    artifact = %artifact.path,
                    entity = %entity.entity_name,
                    written,
                    "Fallback content written"
                );
                HealOutcome::Content {
                    artifact: artifact.clone(),
                    files,
                }
            }
            Err(e) => HealOutcome::NoRepair {
                reason: format!("fallback write failed: {e}"),
            },
        }
    }

    /// Heal every request in repair order (data model before router before
    /// integration before client).
    pub async fn heal_all(&mut self, ctx: &RunContext, mut requests: Vec<HealRequest>) -> HealReport {
        requests.sort_by_key(|r| self.router.priority(&r.step));

        let mut report = HealReport::default();
        for request in requests {
            let outcome = self.attempt_heal(ctx, &request).await;
            if outcome.is_healed() {
                report.healed.push(request.step.clone());
            } else {
                report.still_failed.push(request.step.clone());
            }
            report.outcomes.push((request.step, outcome));
        }

        tracing::info!(
            healed = report.healed.len(),
            still_failed = report.still_failed.len(),
            "Healing pass finished"
        );
        report
    }

    fn record(&mut self, ctx: &RunContext, step: &str, artifact: Option<ArtifactId>, outcome: &HealOutcome) {
        let detail = match outcome {
            HealOutcome::HealedInPlace { files_written, .. } => files_written.join(", "),
            HealOutcome::Content { files, .. } => files.keys().cloned().collect::<Vec<_>>().join(", "),
            HealOutcome::NoRepair { reason } => reason.clone(),
        };
        ctx.emit(
            EventKind::HealAttempted,
            json!({
                "step": step,
                "artifact": artifact.as_ref().map(|a| &a.path),
                "path": outcome.path(),
                "detail": detail,
            }),
        );
        self.history.push(HealRecord {
            step: step.to_string(),
            artifact,
            path: outcome.path(),
            detail,
            at: Utc::now(),
        });
    }
}
