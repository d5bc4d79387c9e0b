//! In-memory document store.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::Mutex;

use super::{DocumentStore, normalize_path};
use crate::errors::{WorkflowError, WorkflowResult};

/// Documents kept in a sorted map. Paths registered with `fail_writes_to`
/// reject writes and deletes, for exercising rollback.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<BTreeMap<String, Value>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later write or delete of `path` fail with a storage error.
    pub fn fail_writes_to(&self, path: &str) {
        if let Ok(path) = normalize_path(path) {
            self.failing
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(path);
        }
    }

    pub fn clear_failures(&self) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Copy of every stored document.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.docs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check_writable(&self, path: &str) -> WorkflowResult<()> {
        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
        {
            return Err(WorkflowError::storage(
                path,
                io::Error::new(io::ErrorKind::PermissionDenied, "write rejected"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read(&self, path: &str) -> WorkflowResult<Option<Value>> {
        let path = normalize_path(path)?;
        Ok(self
            .docs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&path)
            .cloned())
    }

    async fn write(&self, path: &str, data: &Value) -> WorkflowResult<()> {
        let path = normalize_path(path)?;
        self.check_writable(&path)?;
        self.docs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path, data.clone());
        Ok(())
    }

    async fn delete(&self, path: &str) -> WorkflowResult<()> {
        let path = normalize_path(path)?;
        self.check_writable(&path)?;
        self.docs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> WorkflowResult<Vec<String>> {
        let prefix = prefix.trim_matches('/');
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(docs
            .keys()
            .filter(|k| {
                prefix.is_empty()
                    || k.as_str() == prefix
                    || k.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
            })
            .cloned()
            .collect())
    }
}
