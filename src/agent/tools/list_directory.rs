use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{require_param, resolved, Tool, ToolOutput};
use crate::error::Result;
use crate::workspace::{EntryKind, FileStore};

pub struct ListDirectoryTool {
    files: Arc<dyn FileStore>,
}

impl ListDirectoryTool {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_directory".to_string(),
            description: "List a directory of the generated workspace with type indicators (file/dir).".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path relative to the workspace root. Use '.' for the root."
                    }
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, workspace_root: &Path, input: serde_json::Value) -> Result<ToolOutput> {
        let path_str = require_param!(input, "path");
        let path = match resolved(self.files.as_ref(), workspace_root, path_str).await {
            Ok(p) => p,
            Err(output) => return Ok(output),
        };

        match self.files.stat(&path).await? {
            Some(EntryKind::Dir) => {}
            Some(EntryKind::File { .. }) => {
                return Ok(ToolOutput::Error(format!("{path_str} is not a directory")))
            }
            None => return Ok(ToolOutput::Error(format!("Directory not found: {path_str}"))),
        }

        let listing: Vec<String> = self
            .files
            .list_dir(&path)
            .await?
            .into_iter()
            // Hidden entries include in-flight temp files.
            .filter(|entry| !entry.name.starts_with('.'))
            .map(|entry| {
                let kind = if entry.is_dir { "dir" } else { "file" };
                format!("{} ({kind})", entry.name)
            })
            .collect();

        if listing.is_empty() {
            Ok(ToolOutput::Success("Directory is empty".to_string()))
        } else {
            Ok(ToolOutput::Success(listing.join("\n")))
        }
    }
}
