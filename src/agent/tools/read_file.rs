use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{require_param, resolved, Tool, ToolOutput};
use crate::error::Result;
use crate::workspace::{EntryKind, FileStore};

pub struct ReadFileTool {
    files: Arc<dyn FileStore>,
    max_file_size: usize,
}

impl ReadFileTool {
    pub fn new(files: Arc<dyn FileStore>, max_file_size: usize) -> Self {
        Self { files, max_file_size }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a generated file. Use this to inspect the broken artifact and the files it depends on before rewriting it.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path relative to the workspace root"
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

        let not_found = || ToolOutput::Error(format!("File not found: {path_str}"));
        match self.files.stat(&path).await? {
            None => return Ok(not_found()),
            Some(EntryKind::Dir) => {
                return Ok(ToolOutput::Error(format!(
                    "{path_str} is a directory, use list_directory"
                )))
            }
            Some(EntryKind::File { size }) if size > self.max_file_size as u64 => {
                return Ok(ToolOutput::Error(format!(
                    "File is too large ({size} bytes, max {} bytes)",
                    self.max_file_size
                )))
            }
            Some(EntryKind::File { .. }) => {}
        }

        Ok(match self.files.read_file(&path).await {
            Ok(Some(content)) => ToolOutput::Success(content),
            Ok(None) => not_found(),
            Err(e) => ToolOutput::Error(format!("Failed to read file: {e}")),
        })
    }
}
