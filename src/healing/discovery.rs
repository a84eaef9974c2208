use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use crate::healing::{EntityDiscovery, PrimaryEntity};
use crate::workspace::FileStore;

static DEFINITION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(?:export\s+)?(?:pub\s+)?(?:class|struct|interface|model|type)\s+([A-Z][A-Za-z0-9_]*)",
    )
    .map_err(|e| tracing::error!(error = %e, "Invalid definition pattern"))
    .ok()
});

/// Names that declare framework plumbing rather than a domain entity.
const IGNORED_NAMES: &[&str] = &["Base", "BaseModel", "Config", "Settings", "Meta"];

/// Finds the primary entity by scanning data-model files for the first type
/// definition that is not framework plumbing.
pub struct DefinitionScanner {
    files: Arc<dyn FileStore>,
    candidates: Vec<PathBuf>,
}

impl DefinitionScanner {
    pub fn new(files: Arc<dyn FileStore>, candidates: Vec<PathBuf>) -> Self {
        Self { files, candidates }
    }

    /// Scans the usual data-model locations.
    pub fn with_default_candidates(files: Arc<dyn FileStore>) -> Self {
        Self::new(
            files,
            ["app/models.py", "models.py", "src/models.rs", "src/models.ts", "prisma/schema.prisma"]
                .iter()
                .map(PathBuf::from)
                .collect(),
        )
    }
}

#[async_trait]
impl EntityDiscovery for DefinitionScanner {
    async fn discover(&self, root: &Path) -> Option<PrimaryEntity> {
        for candidate in &self.candidates {
            let path = root.join(candidate);
            let content = match self.files.read_file(&path).await {
                Ok(Some(content)) => content,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read data model");
                    continue;
                }
            };
            if let Some(entity) = first_entity(&content) {
                tracing::debug!(
                    path = %candidate.display(),
                    model = %entity.model_name,
                    "Discovered primary entity"
                );
                return Some(entity);
            }
        }
        None
    }
}

pub fn first_entity(source: &str) -> Option<PrimaryEntity> {
    DEFINITION
        .as_ref()?
        .captures_iter(source)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|name| !IGNORED_NAMES.contains(name))
        .map(|name| PrimaryEntity {
            entity_name: snake_case(name),
            model_name: name.to_string(),
        })
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}
