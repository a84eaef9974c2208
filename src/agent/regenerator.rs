use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::claude::ClaudeClient;
use crate::agent::engine::{AgentEngine, AgentOutcome};
use crate::agent::prompt;
use crate::agent::tools::ToolRegistry;
use crate::config::AppConfig;
use crate::healing::{DisabledRegenerator, RegenerationOutcome, RegenerationRequest, Regenerator};
use crate::workspace::FileStore;

/// Intelligent regeneration backed by a Claude tool-use agent working on
/// the workspace files.
pub struct ClaudeRegenerator {
    engine: AgentEngine,
}

impl ClaudeRegenerator {
    pub fn new(engine: AgentEngine) -> Self {
        Self { engine }
    }

    /// Agent whose file tools read and write through `files`.
    pub fn from_config(config: &AppConfig, api_key: &str, files: Arc<dyn FileStore>) -> Self {
        let mut client = ClaudeClient::new(api_key, &config.claude.model, config.claude.max_tokens);
        if let Some(base_url) = &config.claude.base_url {
            client = client.with_base_url(base_url);
        }
        let tools = ToolRegistry::new(files, config.agent.max_file_size_bytes);
        Self::new(AgentEngine::new(client, tools, config.claude.max_turns))
    }
}

#[async_trait]
impl Regenerator for ClaudeRegenerator {
    async fn regenerate(&self, request: &RegenerationRequest) -> RegenerationOutcome {
        tracing::info!(
            step = %request.step,
            artifact = %request.artifact.path,
            "Starting regeneration agent"
        );
        let system = prompt::system_prompt_for_regeneration(request);
        let message = prompt::initial_message(request);

        match self.engine.run(&system, &request.root, &message).await {
            AgentOutcome::Completed { files_written, .. } if files_written.is_empty() => {
                RegenerationOutcome::Failed {
                    reason: "agent finished without writing any file".to_string(),
                }
            }
            AgentOutcome::Completed { summary, files_written } => {
                tracing::info!(summary = %summary, "Regeneration agent finished");
                RegenerationOutcome::Healed { files_written }
            }
            AgentOutcome::TurnLimitReached { files_written } => RegenerationOutcome::Failed {
                reason: format!(
                    "agent hit the turn limit after writing {} file(s)",
                    files_written.len()
                ),
            },
            AgentOutcome::RateLimited { message } => RegenerationOutcome::Failed {
                reason: format!("rate limited: {message}"),
            },
            AgentOutcome::Failed { error } => RegenerationOutcome::Failed { reason: error },
        }
    }
}

/// The regenerator a run should use: Claude when intelligent healing is on
/// and an API key is configured, otherwise the disabled one.
pub fn regenerator_for(config: &AppConfig, files: Arc<dyn FileStore>) -> Arc<dyn Regenerator> {
    match (config.healing.intelligent, config.claude_api_key()) {
        (true, Some(key)) => Arc::new(ClaudeRegenerator::from_config(config, key, files)),
        (true, None) => {
            tracing::warn!("No Claude API key configured, intelligent healing disabled");
            Arc::new(DisabledRegenerator)
        }
        (false, _) => Arc::new(DisabledRegenerator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healing::{ArtifactId, ArtifactKind};
    use crate::workspace::LocalFileStore;

    fn request() -> RegenerationRequest {
        RegenerationRequest {
            root: std::env::temp_dir(),
            step: "generate_models".to_string(),
            artifact: ArtifactId {
                kind: ArtifactKind::DataModel,
                path: "app/models.py".to_string(),
            },
            error: None,
            instructions: None,
        }
    }

    #[tokio::test]
    async fn test_without_key_regeneration_is_disabled() {
        let config = AppConfig::default();
        let outcome = regenerator_for(&config, Arc::new(LocalFileStore::new())).regenerate(&request()).await;
        assert!(matches!(outcome, RegenerationOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_switched_off_ignores_key() {
        let mut config = AppConfig::default();
        config.claude.api_key = Some("sk-test".to_string());
        config.healing.intelligent = false;
        let outcome = regenerator_for(&config, Arc::new(LocalFileStore::new())).regenerate(&request()).await;
        assert_eq!(
            outcome,
            RegenerationOutcome::Failed {
                reason: "intelligent regeneration is disabled".to_string()
            }
        );
    }
}
