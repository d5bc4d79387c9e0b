//! All-or-nothing batches of document operations.
//!
//! `begin()` hands out an explicit `Transaction`. Operations are only queued
//! until `commit()`, which applies them in order. On the first failure every
//! applied operation is undone in reverse order from the pre-image read just
//! before it was applied. Undo problems are collected as diagnostics on the
//! returned `TransactionFailure`; the original error is always kept.
//!
//! A manager allows one pending transaction at a time. A second `begin()`
//! while one is pending is rejected with `Conflict`. The slot frees up on
//! commit, on rollback, or when the `Transaction` is dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DocumentStore, normalize_path};
use crate::errors::{TransactionFailure, WorkflowError, WorkflowResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub path: String,
    /// New content for create/update.
    pub data: Option<Value>,
    /// Content at `path` before the operation. Captured when queued and
    /// refreshed when applied.
    pub backup: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Committed,
    RolledBack,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub operations: Vec<Operation>,
}

type ActiveSlot = Arc<Mutex<Option<Uuid>>>;

pub struct TransactionManager {
    store: Arc<dyn DocumentStore>,
    active: ActiveSlot,
}

impl TransactionManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Id of the pending transaction, if any.
    pub fn active_transaction(&self) -> Option<Uuid> {
        *self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn begin(&self) -> WorkflowResult<Transaction> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pending) = *active {
            return Err(WorkflowError::Conflict(format!(
                "Transaction {} is still pending",
                pending
            )));
        }
        let id = Uuid::new_v4();
        *active = Some(id);
        debug!(transaction = %id, "Transaction started");

        Ok(Transaction {
            id,
            status: TransactionStatus::Pending,
            operations: Vec::new(),
            store: self.store.clone(),
            slot: self.active.clone(),
        })
    }

    /// Apply every queued operation, or none of them.
    pub async fn commit(&self, mut tx: Transaction) -> Result<CommitSummary, TransactionFailure> {
        let mut applied: Vec<usize> = Vec::new();

        for index in 0..tx.operations.len() {
            match self.apply(&mut tx.operations[index]).await {
                Ok(()) => applied.push(index),
                Err(error) => {
                    let rollback_errors = self.undo(&tx.operations, &applied).await;
                    tx.status = TransactionStatus::Failed;
                    let op = &tx.operations[index];
                    warn!(
                        transaction = %tx.id,
                        operation = index,
                        kind = %op.kind,
                        path = %op.path,
                        error = %error,
                        undone = applied.len(),
                        rollback_errors = rollback_errors.len(),
                        "Transaction commit failed"
                    );
                    return Err(TransactionFailure {
                        transaction_id: tx.id,
                        failed_operation: Some(index),
                        error,
                        rollback_errors,
                    });
                }
            }
        }

        tx.status = TransactionStatus::Committed;
        info!(
            transaction = %tx.id,
            operations = tx.operations.len(),
            "Transaction committed"
        );
        Ok(CommitSummary {
            transaction_id: tx.id,
            status: tx.status,
            operations: std::mem::take(&mut tx.operations),
        })
    }

    /// Discard the queued operations. Storage is not touched.
    pub fn rollback(&self, mut tx: Transaction) {
        tx.status = TransactionStatus::RolledBack;
        info!(
            transaction = %tx.id,
            discarded = tx.operations.len(),
            "Transaction rolled back"
        );
    }

    /// Run `f` inside a fresh transaction: commit if it returns `Ok`, roll back if it returns `Err`.
    pub async fn execute<T, F>(&self, f: F) -> Result<T, TransactionFailure>
    where
        F: AsyncFnOnce(&mut Transaction) -> WorkflowResult<T>,
    {
        let mut tx = self
            .begin()
            .map_err(|e| TransactionFailure::new(Uuid::nil(), e))?;
        match f(&mut tx).await {
            Ok(value) => {
                self.commit(tx).await?;
                Ok(value)
            }
            Err(error) => {
                let id = tx.id;
                self.rollback(tx);
                Err(TransactionFailure::new(id, error))
            }
        }
    }

    async fn apply(&self, op: &mut Operation) -> WorkflowResult<()> {
        let current = self.store.read(&op.path).await?;
        match op.kind {
            OperationKind::Create => {
                if current.is_some() {
                    return Err(WorkflowError::Conflict(format!(
                        "Cannot create '{}': it already exists",
                        op.path
                    )));
                }
            }
            OperationKind::Update | OperationKind::Delete => {
                if current.is_none() {
                    return Err(WorkflowError::Conflict(format!(
                        "Cannot {} '{}': it does not exist",
                        op.kind, op.path
                    )));
                }
            }
        }
        op.backup = current;

        match (&op.kind, &op.data) {
            (OperationKind::Delete, _) => self.store.delete(&op.path).await,
            (_, Some(data)) => self.store.write(&op.path, data).await,
            (_, None) => Err(WorkflowError::ValidationFailed(format!(
                "No data queued for {} of '{}'",
                op.kind, op.path
            ))),
        }
    }

    /// Undo `applied` operations in reverse. Returns one message per undo that failed.
    async fn undo(&self, operations: &[Operation], applied: &[usize]) -> Vec<String> {
        let mut errors = Vec::new();
        for &index in applied.iter().rev() {
            let op = &operations[index];
            let result = match &op.backup {
                Some(previous) => self.store.write(&op.path, previous).await,
                None => self.store.delete(&op.path).await,
            };
            match result {
                Ok(()) => debug!(path = %op.path, kind = %op.kind, "Operation undone"),
                Err(e) => {
                    warn!(path = %op.path, kind = %op.kind, error = %e, "Undo failed");
                    errors.push(format!("undo {} of '{}': {}", op.kind, op.path, e));
                }
            }
        }
        errors
    }
}

/// Handle for one pending transaction.
pub struct Transaction {
    id: Uuid,
    status: TransactionStatus,
    operations: Vec<Operation>,
    store: Arc<dyn DocumentStore>,
    slot: ActiveSlot,
}

impl Transaction {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Queue creation of a new document. Fails at commit if `path` exists by then.
    pub async fn create(&mut self, path: &str, data: Value) -> WorkflowResult<()> {
        self.enqueue(OperationKind::Create, path, Some(data)).await
    }

    /// Queue replacement of an existing document. Fails at commit if `path` is missing by then.
    pub async fn update(&mut self, path: &str, data: Value) -> WorkflowResult<()> {
        self.enqueue(OperationKind::Update, path, Some(data)).await
    }

    /// Queue removal of an existing document. Fails at commit if `path` is missing by then.
    pub async fn delete(&mut self, path: &str) -> WorkflowResult<()> {
        self.enqueue(OperationKind::Delete, path, None).await
    }

    async fn enqueue(
        &mut self,
        kind: OperationKind,
        path: &str,
        data: Option<Value>,
    ) -> WorkflowResult<()> {
        let path = normalize_path(path)?;
        let backup = match kind {
            OperationKind::Create => None,
            OperationKind::Update | OperationKind::Delete => self.store.read(&path).await?,
        };
        debug!(transaction = %self.id, kind = %kind, path = %path, "Operation queued");
        self.operations.push(Operation {
            kind,
            path,
            data,
            backup,
        });
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let mut active = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if *active == Some(self.id) {
            *active = None;
        }
        debug!(transaction = %self.id, status = ?self.status, "Transaction closed");
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("operations", &self.operations)
            .finish()
    }
}
