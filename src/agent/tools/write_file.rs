use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{require_param, Tool, ToolOutput};
use crate::error::Result;
use crate::workspace::FileStore;

/// Writes whole files through the store, which owns path checks and
/// atomic replacement.
pub struct WriteFileTool {
    files: Arc<dyn FileStore>,
}

impl WriteFileTool {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Write the complete content of a file, creating it (and its directories) if needed. Always write the whole file, never a fragment.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path relative to the workspace root"
                    },
                    "content": {
                        "type": "string",
                        "description": "The complete new content for the file"
                    }
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn execute(&self, workspace_root: &Path, input: serde_json::Value) -> Result<ToolOutput> {
        let path_str = require_param!(input, "path");
        let content = require_param!(input, "content");

        let files = BTreeMap::from([(path_str.to_string(), content.to_string())]);
        match self.files.write_files(workspace_root, &files).await {
            Ok(_) => Ok(ToolOutput::Written {
                path: path_str.to_string(),
                message: format!("Successfully wrote {} bytes to {path_str}", content.len()),
            }),
            Err(e) => Ok(ToolOutput::Error(format!("Failed to write {path_str}: {e}"))),
        }
    }
}
