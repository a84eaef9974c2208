use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{AppError, Result};

/// What a path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File { size: u64 },
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// File access used by the healing pipeline and the regeneration agent.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Write every `relative path -> content` entry under `base`. Returns the
    /// number of files written.
    async fn write_files(&self, base: &Path, files: &BTreeMap<String, String>) -> Result<usize>;

    async fn read_file(&self, path: &Path) -> Result<Option<String>>;

    async fn file_exists(&self, path: &Path) -> bool;

    /// Resolve `requested` under `root` for reading, rejecting anything that
    /// escapes it. Never creates anything.
    async fn resolve(&self, root: &Path, requested: &Path) -> Result<PathBuf>;

    /// `None` when nothing exists at `path`.
    async fn stat(&self, path: &Path) -> Result<Option<EntryKind>>;

    /// Entries of a directory, sorted by name.
    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>>;
}

fn traversal(requested: &Path) -> AppError {
    AppError::Workspace(format!(
        "Path traversal detected: {} is outside workspace",
        requested.display()
    ))
}

fn reject_escape(requested: &Path) -> Result<()> {
    if requested.is_absolute()
        || requested
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(traversal(requested));
    }
    Ok(())
}

async fn canonical_root(root: &Path) -> Result<PathBuf> {
    tokio::fs::canonicalize(root)
        .await
        .map_err(|e| AppError::Workspace(format!("Failed to resolve workspace root: {e}")))
}

/// Local file system store. Every write goes to a temp file in the target
/// directory and is renamed into place, so readers never see half a file.
#[derive(Debug, Default, Clone)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `requested` under `root` for writing, rejecting anything that
    /// escapes it. Missing parent directories are created.
    pub async fn verify_path(root: &Path, requested: &Path) -> Result<PathBuf> {
        reject_escape(requested)?;

        let full_path = root.join(requested);
        let file_name = full_path
            .file_name()
            .ok_or_else(|| AppError::Workspace("Invalid file name".to_string()))?
            .to_owned();
        let parent = full_path
            .parent()
            .ok_or_else(|| AppError::Workspace("Invalid file path".to_string()))?;

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to create directory: {e}")))?;

        let canonical_parent = tokio::fs::canonicalize(parent)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to resolve path: {e}")))?;

        // Symlinked directories can still point outside the root.
        if !canonical_parent.starts_with(canonical_root(root).await?) {
            return Err(traversal(requested));
        }

        Ok(canonical_parent.join(file_name))
    }

    /// Resolve `requested` under `root` without creating anything. A path
    /// that does not exist yet resolves lexically.
    pub async fn resolve_path(root: &Path, requested: &Path) -> Result<PathBuf> {
        reject_escape(requested)?;

        let root = canonical_root(root).await?;
        let full_path = root.join(requested);
        match tokio::fs::canonicalize(&full_path).await {
            Ok(resolved) if resolved.starts_with(&root) => Ok(resolved),
            Ok(_) => Err(traversal(requested)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(full_path),
            Err(e) => Err(AppError::Workspace(format!("Failed to resolve path: {e}"))),
        }
    }

    /// Write `content` to `path` via temp file + rename. A failed write
    /// removes its temp file.
    pub async fn write_atomic(path: &Path, content: &str) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| AppError::Workspace(format!("No parent for {}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::Workspace(format!("No file name in {}", path.display())))?;
        let tmp_path = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let result = async {
            tokio::fs::write(&tmp_path, content).await?;
            tokio::fs::rename(&tmp_path, path).await
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %tmp_path.display(), error = %cleanup, "Failed to remove temp file");
                }
            }
            return Err(AppError::Workspace(format!(
                "Failed to write {}: {e}",
                path.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn write_files(&self, base: &Path, files: &BTreeMap<String, String>) -> Result<usize> {
        tokio::fs::create_dir_all(base)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to create workspace dir: {e}")))?;

        let mut written = 0;
        for (relative, content) in files {
            let target = Self::verify_path(base, Path::new(relative)).await?;
            Self::write_atomic(&target, content).await?;
            tracing::debug!(path = %relative, bytes = content.len(), "Wrote file");
            written += 1;
        }
        Ok(written)
    }

    async fn read_file(&self, path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn file_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn resolve(&self, root: &Path, requested: &Path) -> Result<PathBuf> {
        Self::resolve_path(root, requested).await
    }

    async fn stat(&self, path: &Path) -> Result<Option<EntryKind>> {
        match tokio::fs::metadata(path).await {
            Ok(m) if m.is_dir() => Ok(Some(EntryKind::Dir)),
            Ok(m) => Ok(Some(EntryKind::File { size: m.len() })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Workspace(format!("Failed to read metadata: {e}"))),
        }
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let mut read_dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to read directory: {e}")))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to read directory entry: {e}")))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to get file type: {e}")))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
