pub mod discovery;
pub mod fallback;
pub mod pipeline;
pub mod router;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

pub use discovery::DefinitionScanner;
pub use fallback::StubFallback;
pub use pipeline::{HealOutcome, HealPath, HealRecord, HealReport, HealRequest, HealingPipeline};
pub use router::{ArtifactId, ArtifactKind, ErrorRouter, RouteRule};

/// The entity a generated workspace is organised around, e.g. the first
/// model class in the data model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrimaryEntity {
    /// snake_case name used in paths and identifiers (`order_item`).
    pub entity_name: String,
    /// Type name as declared (`OrderItem`).
    pub model_name: String,
}

#[derive(Debug, Clone)]
pub struct RegenerationRequest {
    pub root: PathBuf,
    pub step: String,
    pub artifact: ArtifactId,
    pub error: Option<String>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegenerationOutcome {
    /// Files were rewritten under the workspace root.
    Healed { files_written: Vec<String> },
    Failed { reason: String },
}

/// Intelligent regeneration. Implementations write directly into the
/// workspace and report which files they touched.
#[async_trait]
pub trait Regenerator: Send + Sync {
    async fn regenerate(&self, request: &RegenerationRequest) -> RegenerationOutcome;
}

/// Used when intelligent regeneration is switched off or has no credentials.
#[derive(Debug, Default)]
pub struct DisabledRegenerator;

#[async_trait]
impl Regenerator for DisabledRegenerator {
    async fn regenerate(&self, _request: &RegenerationRequest) -> RegenerationOutcome {
        RegenerationOutcome::Failed {
            reason: "intelligent regeneration is disabled".to_string(),
        }
    }
}

/// Deterministic content for an artifact, keyed by the primary entity.
/// Returns `None` when no fallback exists for the artifact.
pub trait FallbackGenerator: Send + Sync {
    fn generate(&self, artifact: &ArtifactId, entity: &PrimaryEntity) -> Option<BTreeMap<String, String>>;
}

#[async_trait]
pub trait EntityDiscovery: Send + Sync {
    async fn discover(&self, root: &Path) -> Option<PrimaryEntity>;
}
