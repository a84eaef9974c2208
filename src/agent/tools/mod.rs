pub mod list_directory;
pub mod read_file;
pub mod write_file;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::claude::ToolDefinition;
use crate::error::Result;
use crate::workspace::FileStore;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn definition(&self) -> ToolDefinition;
    async fn execute(
        &self,
        workspace_root: &Path,
        input: serde_json::Value,
    ) -> Result<ToolOutput>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum ToolOutput {
    /// Normal text result returned to Claude.
    Success(String),
    /// Error result returned to Claude (the agent can recover).
    Error(String),
    /// A file was written. Carries the relative path and the message for Claude.
    Written { path: String, message: String },
}

/// Pull a required string parameter out of the tool input, or return a
/// recoverable tool error.
macro_rules! require_param {
    ($input:expr, $name:literal) => {
        match $input[$name].as_str() {
            Some(v) => v,
            None => {
                return Ok($crate::agent::tools::ToolOutput::Error(format!(
                    "Missing '{}' parameter",
                    $name
                )))
            }
        }
    };
}
pub(crate) use require_param;

/// Resolve a tool-supplied path inside the workspace without creating
/// anything. `.` and the empty string name the root itself.
pub(crate) async fn resolved(
    files: &dyn FileStore,
    workspace_root: &Path,
    requested: &str,
) -> std::result::Result<PathBuf, ToolOutput> {
    files
        .resolve(workspace_root, Path::new(requested))
        .await
        .map_err(|e| ToolOutput::Error(format!("Invalid path: {e}")))
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// The file tools a regeneration agent works with. Every read and write
    /// goes through `files`.
    pub fn new(files: Arc<dyn FileStore>, max_file_size: usize) -> Self {
        let tools: Vec<Box<dyn Tool>> = vec![
            Box::new(read_file::ReadFileTool::new(Arc::clone(&files), max_file_size)),
            Box::new(list_directory::ListDirectoryTool::new(Arc::clone(&files))),
            Box::new(write_file::WriteFileTool::new(files)),
        ];

        Self { tools }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }
}
