//! JSON documents on disk.
//!
//! Document `a/b` lives at `<root>/a/b.json`. Writes go to a temp file in
//! the same directory and are renamed into place, so a reader never sees a
//! half-written document.

use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{DocumentStore, normalize_path};
use crate::errors::{WorkflowError, WorkflowResult};

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, path: &str) -> WorkflowResult<(String, PathBuf)> {
        let path = normalize_path(path)?;
        let file = self.root.join(format!("{}.{}", path, EXTENSION));
        Ok((path, file))
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn read(&self, path: &str) -> WorkflowResult<Option<Value>> {
        let (path, file) = self.file_for(path)?;
        let content = match fs::read_to_string(&file).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(WorkflowError::storage(path, e)),
        };
        let value = serde_json::from_str(&content).map_err(|e| {
            WorkflowError::storage(path, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        Ok(Some(value))
    }

    async fn write(&self, path: &str, data: &Value) -> WorkflowResult<()> {
        let (path, file) = self.file_for(path)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkflowError::storage(&path, e))?;
        }
        let content = serde_json::to_string_pretty(data).map_err(|e| {
            WorkflowError::storage(&path, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;

        let tmp = file.with_extension(format!("{}.tmp-{}", EXTENSION, Uuid::new_v4().simple()));
        if let Err(e) = fs::write(&tmp, content).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(WorkflowError::storage(&path, e));
        }
        if let Err(e) = fs::rename(&tmp, &file).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(WorkflowError::storage(&path, e));
        }
        debug!(path = %path, "Document written");
        Ok(())
    }

    async fn delete(&self, path: &str) -> WorkflowResult<()> {
        let (path, file) = self.file_for(path)?;
        match fs::remove_file(&file).await {
            Ok(()) => {
                debug!(path = %path, "Document deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkflowError::storage(path, e)),
        }
    }

    async fn exists(&self, path: &str) -> WorkflowResult<bool> {
        let (path, file) = self.file_for(path)?;
        fs::try_exists(&file)
            .await
            .map_err(|e| WorkflowError::storage(path, e))
    }

    async fn list(&self, prefix: &str) -> WorkflowResult<Vec<String>> {
        let prefix = prefix.trim_matches('/');
        let mut found = Vec::new();

        if !prefix.is_empty() {
            let (doc, file) = self.file_for(prefix)?;
            if fs::try_exists(&file).await.unwrap_or(false) {
                found.push(doc);
            }
        }

        let start = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.root.join(normalize_path(prefix)?)
        };
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(WorkflowError::storage(dir.display().to_string(), e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| WorkflowError::storage(dir.display().to_string(), e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| WorkflowError::storage(path.display().to_string(), e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
                    if let Some(doc) = document_path(&self.root, &path) {
                        found.push(doc);
                    }
                }
            }
        }

        found.sort();
        found.dedup();
        Ok(found)
    }
}

/// `<root>/a/b.json` -> `a/b`
fn document_path(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?.with_extension("");
    let segments: Vec<&str> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    Some(segments.join("/"))
}
