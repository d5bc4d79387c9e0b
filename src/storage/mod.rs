//! Persistent state: a document tree addressed by relative path.
//!
//! - `DocumentStore`: whole-document read/write/delete/list
//! - `MemoryDocumentStore` / `FileDocumentStore`: the two backends
//! - `TransactionManager`: all-or-nothing batches with backup-based undo
//! - `LockManager`: exclusive path locks with a timeout

pub mod file;
pub mod lock;
pub mod memory;
pub mod transaction;

pub use file::FileDocumentStore;
pub use lock::{LockManager, PathLock};
pub use memory::MemoryDocumentStore;
pub use transaction::{
    CommitSummary, Operation, OperationKind, Transaction, TransactionManager, TransactionStatus,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{WorkflowError, WorkflowResult};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// `None` if nothing is stored at `path`.
    async fn read(&self, path: &str) -> WorkflowResult<Option<Value>>;

    /// Create or replace the document at `path`.
    async fn write(&self, path: &str, data: &Value) -> WorkflowResult<()>;

    /// Remove the document at `path`. Removing a missing document is not an error.
    async fn delete(&self, path: &str) -> WorkflowResult<()>;

    async fn exists(&self, path: &str) -> WorkflowResult<bool> {
        Ok(self.read(path).await?.is_some())
    }

    /// Paths of every document under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> WorkflowResult<Vec<String>>;
}

/// Normalize a document path: forward slashes, no leading slash, no `.`/`..`
/// segments, no empty path.
pub fn normalize_path(path: &str) -> WorkflowResult<String> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(WorkflowError::ValidationFailed(format!(
                    "Document path '{}' escapes the store root",
                    path
                )));
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(WorkflowError::ValidationFailed(
            "Document path is empty".to_string(),
        ));
    }
    Ok(segments.join("/"))
}
