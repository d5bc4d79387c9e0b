//! Persistence of workflow instances and their transition audit trail.
//!
//! Layout inside the document store:
//!
//! ```text
//! instances/<work_item>                  current WorkflowInstance
//! audit/<work_item>/<transition_id>      one TransitionAudit per executed transition
//! ```
//!
//! Writes require the instance's `PathLock`, taken with [`InstanceRepository::lock`]
//! and held across load, mutate and save. Every write is one transaction, so the
//! instance document and its audit record change together or not at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::errors::{TransactionFailure, WorkflowError, WorkflowResult};
use crate::model::{ExecutedTransition, WorkflowInstance};
use crate::phase::TransitionOutcome;
use crate::storage::{
    CommitSummary, DocumentStore, LockManager, PathLock, Transaction, TransactionManager,
};

const INSTANCES: &str = "instances";
const AUDIT: &str = "audit";

/// Audit record written next to every committed transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionAudit {
    pub work_item_id: String,
    pub instance_id: Uuid,
    pub transition: ExecutedTransition,
    pub completed_workflow: bool,
    pub recorded_at: DateTime<Utc>,
}

pub struct InstanceRepository {
    store: Arc<dyn DocumentStore>,
    locks: Arc<LockManager>,
    lock_timeout: Duration,
}

impl InstanceRepository {
    pub fn new(store: Arc<dyn DocumentStore>, locks: Arc<LockManager>, lock_timeout: Duration) -> Self {
        Self {
            store,
            locks,
            lock_timeout,
        }
    }

    pub fn instance_path(work_item_id: &str) -> String {
        format!("{}/{}", INSTANCES, work_item_id)
    }

    pub fn audit_path(work_item_id: &str, transition_id: Uuid) -> String {
        format!("{}/{}/{}", AUDIT, work_item_id, transition_id)
    }

    /// Take the exclusive lock for one work item's instance.
    pub async fn lock(&self, work_item_id: &str) -> WorkflowResult<PathLock> {
        self.locks
            .lock(&Self::instance_path(work_item_id), self.lock_timeout)
            .await
    }

    pub async fn load(&self, work_item_id: &str) -> WorkflowResult<Option<WorkflowInstance>> {
        let path = Self::instance_path(work_item_id);
        match self.store.read(&path).await? {
            Some(doc) => Ok(Some(decode(&path, doc)?)),
            None => Ok(None),
        }
    }

    pub async fn get(&self, work_item_id: &str) -> WorkflowResult<WorkflowInstance> {
        self.load(work_item_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("workflow instance", work_item_id))
    }

    /// Work item ids that have a stored instance.
    pub async fn list(&self) -> WorkflowResult<Vec<String>> {
        let prefix = format!("{}/", INSTANCES);
        Ok(self
            .store
            .list(INSTANCES)
            .await?
            .into_iter()
            .filter_map(|p| p.strip_prefix(&prefix).map(String::from))
            .collect())
    }

    /// Store a new instance. Fails with `Conflict` if the work item already has one.
    pub async fn create(
        &self,
        guard: &PathLock,
        instance: &WorkflowInstance,
    ) -> Result<CommitSummary, TransactionFailure> {
        let path = self.checked_path(guard, instance)?;
        let doc = encode(&path, instance).map_err(|e| TransactionFailure::new(Uuid::nil(), e))?;
        let manager = TransactionManager::new(self.store.clone());
        let mut tx = manager.begin().map_err(|e| TransactionFailure::new(Uuid::nil(), e))?;
        if let Err(e) = tx.create(&path, doc).await {
            return Err(abandon(&manager, tx, e));
        }
        let summary = manager.commit(tx).await?;
        info!(work_item = %instance.work_item_id, "Workflow instance stored");
        Ok(summary)
    }

    /// Replace the stored instance after checklist, gate or approval changes.
    pub async fn save(
        &self,
        guard: &PathLock,
        instance: &WorkflowInstance,
    ) -> Result<CommitSummary, TransactionFailure> {
        let path = self.checked_path(guard, instance)?;
        let doc = encode(&path, instance).map_err(|e| TransactionFailure::new(Uuid::nil(), e))?;
        let manager = TransactionManager::new(self.store.clone());
        let mut tx = manager.begin().map_err(|e| TransactionFailure::new(Uuid::nil(), e))?;
        if let Err(e) = tx.update(&path, doc).await {
            return Err(abandon(&manager, tx, e));
        }
        manager.commit(tx).await
    }

    /// Write the moved instance and the transition's audit record together.
    pub async fn persist_transition(
        &self,
        guard: &PathLock,
        instance: &WorkflowInstance,
        outcome: &TransitionOutcome,
    ) -> Result<CommitSummary, TransactionFailure> {
        let path = self.checked_path(guard, instance)?;
        let audit = self
            .audit_record(instance, outcome)
            .map_err(|e| TransactionFailure::new(Uuid::nil(), e))?;
        let audit_path = Self::audit_path(&instance.work_item_id, audit.transition.id);
        let doc = encode(&path, instance).map_err(|e| TransactionFailure::new(Uuid::nil(), e))?;
        let audit_doc =
            encode(&audit_path, &audit).map_err(|e| TransactionFailure::new(Uuid::nil(), e))?;

        let manager = TransactionManager::new(self.store.clone());
        let mut tx = manager.begin().map_err(|e| TransactionFailure::new(Uuid::nil(), e))?;
        if let Err(e) = queue_transition(&mut tx, &path, doc, &audit_path, audit_doc).await {
            return Err(abandon(&manager, tx, e));
        }
        let summary = manager.commit(tx).await?;
        info!(
            work_item = %instance.work_item_id,
            transition = %audit.transition.id,
            from = %audit.transition.from_phase,
            to = %audit.transition.to_phase,
            "Transition persisted"
        );
        Ok(summary)
    }

    /// Every persisted transition of a work item, oldest first.
    pub async fn audit_trail(&self, work_item_id: &str) -> WorkflowResult<Vec<TransitionAudit>> {
        let mut records = Vec::new();
        for path in self.store.list(&format!("{}/{}", AUDIT, work_item_id)).await? {
            if let Some(doc) = self.store.read(&path).await? {
                records.push(decode::<TransitionAudit>(&path, doc)?);
            }
        }
        records.sort_by_key(|r| r.transition.executed_at);
        Ok(records)
    }

    fn checked_path(
        &self,
        guard: &PathLock,
        instance: &WorkflowInstance,
    ) -> Result<String, TransactionFailure> {
        let path = Self::instance_path(&instance.work_item_id);
        if guard.path() != path {
            return Err(TransactionFailure::new(
                Uuid::nil(),
                WorkflowError::ValidationFailed(format!(
                    "Lock on '{}' does not cover '{}'",
                    guard.path(),
                    path
                )),
            ));
        }
        Ok(path)
    }

    fn audit_record(
        &self,
        instance: &WorkflowInstance,
        outcome: &TransitionOutcome,
    ) -> WorkflowResult<TransitionAudit> {
        let transition_id = outcome.transition_id.filter(|_| outcome.success).ok_or_else(|| {
            WorkflowError::ValidationFailed(format!(
                "Transition {} -> {} did not happen and has nothing to persist",
                outcome.from_phase, outcome.to_phase
            ))
        })?;
        let transition = instance
            .transitions
            .iter()
            .find(|t| t.id == transition_id)
            .cloned()
            .ok_or_else(|| WorkflowError::not_found("transition", transition_id.to_string()))?;
        Ok(TransitionAudit {
            work_item_id: instance.work_item_id.clone(),
            instance_id: instance.id,
            recorded_at: transition.executed_at,
            transition,
            completed_workflow: outcome.completed_workflow,
        })
    }
}

async fn queue_transition(
    tx: &mut Transaction,
    path: &str,
    doc: Value,
    audit_path: &str,
    audit_doc: Value,
) -> WorkflowResult<()> {
    tx.update(path, doc).await?;
    tx.create(audit_path, audit_doc).await
}

fn abandon(manager: &TransactionManager, tx: Transaction, error: WorkflowError) -> TransactionFailure {
    let id = tx.id();
    manager.rollback(tx);
    TransactionFailure::new(id, error)
}

fn encode<T: Serialize>(path: &str, value: &T) -> WorkflowResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| WorkflowError::storage(path, io::Error::new(io::ErrorKind::InvalidData, e)))
}

fn decode<T: serde::de::DeserializeOwned>(path: &str, doc: Value) -> WorkflowResult<T> {
    serde_json::from_value(doc)
        .map_err(|e| WorkflowError::storage(path, io::Error::new(io::ErrorKind::InvalidData, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::{
        ChecklistDefinition, ChecklistItemDefinition, PhaseDefinition, PhaseKind, TriggerType,
        WorkItem, WorkItemKind, WorkflowTemplate,
    };
    use crate::phase::PhaseManager;
    use crate::storage::MemoryDocumentStore;

    fn template() -> WorkflowTemplate {
        WorkflowTemplate {
            id: "mini".into(),
            name: String::new(),
            version: None,
            phases: vec![
                PhaseDefinition::new("todo", 0, PhaseKind::Planning),
                PhaseDefinition::new("doing", 1, PhaseKind::Development),
                PhaseDefinition::new("done", 2, PhaseKind::Completed),
            ],
            transitions: vec![],
            quality_gates: vec![],
            checklists: vec![ChecklistDefinition {
                id: "prep".into(),
                name: String::new(),
                items: vec![ChecklistItemDefinition::new("spec", "Write spec", true)],
                is_mandatory: false,
                requires_all_complete: false,
                phases: vec!["todo".into()],
            }],
        }
    }

    fn setup() -> (Arc<MemoryDocumentStore>, InstanceRepository, PhaseManager) {
        let store = Arc::new(MemoryDocumentStore::new());
        let repo = InstanceRepository::new(
            store.clone(),
            Arc::new(LockManager::new()),
            Duration::from_millis(100),
        );
        let manager = PhaseManager::new(Arc::new(FixedClock::new(Utc::now())));
        (store, repo, manager)
    }

    fn item() -> WorkItem {
        WorkItem::new("B-7", WorkItemKind::Bug, "Crash on save")
    }

    #[tokio::test]
    async fn test_create_load_and_conflict() {
        let (_store, repo, manager) = setup();
        let instance = manager.create_instance(&template(), &item()).unwrap();

        let guard = repo.lock("B-7").await.unwrap();
        repo.create(&guard, &instance).await.unwrap();
        assert_eq!(repo.get("B-7").await.unwrap(), instance);
        assert_eq!(repo.list().await.unwrap(), vec!["B-7"]);

        let failure = repo.create(&guard, &instance).await.unwrap_err();
        assert!(matches!(failure.error, WorkflowError::Conflict(_)));
        assert!(matches!(
            repo.get("B-8").await,
            Err(WorkflowError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_persist_transition_writes_instance_and_audit() {
        let (store, repo, manager) = setup();
        let template = template();
        let item = item();
        let mut instance = manager.create_instance(&template, &item).unwrap();
        let guard = repo.lock("B-7").await.unwrap();
        repo.create(&guard, &instance).await.unwrap();

        let outcome = manager
            .transition_to_next(&template, &mut instance, &item, "ops", TriggerType::Manual)
            .await
            .unwrap();
        assert!(outcome.success);
        repo.persist_transition(&guard, &instance, &outcome)
            .await
            .unwrap();

        assert_eq!(repo.get("B-7").await.unwrap().current_phase_id, "doing");
        let trail = repo.audit_trail("B-7").await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].transition.to_phase, "doing");
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_audit_write_keeps_old_instance() {
        let (store, repo, manager) = setup();
        let template = template();
        let item = item();
        let mut instance = manager.create_instance(&template, &item).unwrap();
        let guard = repo.lock("B-7").await.unwrap();
        repo.create(&guard, &instance).await.unwrap();

        let outcome = manager
            .transition_to_next(&template, &mut instance, &item, "ops", TriggerType::Manual)
            .await
            .unwrap();
        let audit_path =
            InstanceRepository::audit_path("B-7", outcome.transition_id.unwrap());
        store.fail_writes_to(&audit_path);

        let failure = repo
            .persist_transition(&guard, &instance, &outcome)
            .await
            .unwrap_err();
        assert_eq!(failure.failed_operation, Some(1));
        assert_eq!(repo.get("B-7").await.unwrap().current_phase_id, "todo");
        assert!(repo.audit_trail("B-7").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_outcome_and_wrong_lock() {
        let (_store, repo, manager) = setup();
        let template = template();
        let item = item();
        let instance = manager.create_instance(&template, &item).unwrap();

        let other = repo.lock("B-99").await.unwrap();
        let failure = repo.create(&other, &instance).await.unwrap_err();
        assert!(matches!(failure.error, WorkflowError::ValidationFailed(_)));

        let guard = repo.lock("B-7").await.unwrap();
        repo.create(&guard, &instance).await.unwrap();
        let rejected = TransitionOutcome::rejected("todo", "done", "nope");
        let failure = repo
            .persist_transition(&guard, &instance, &rejected)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, WorkflowError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_per_work_item() {
        let (_store, repo, _manager) = setup();
        let _held = repo.lock("B-7").await.unwrap();
        assert!(matches!(
            repo.lock("B-7").await,
            Err(WorkflowError::LockTimeout { .. })
        ));
        assert!(repo.lock("B-8").await.is_ok());
    }
}
