//! Workflow phase engine.
//!
//! Work items move through the ordered phases of a [`model::WorkflowTemplate`].
//! Transitions are guarded by conditions, quality gates and checklists, and every
//! change to a [`model::WorkflowInstance`] is persisted transactionally under a
//! per-instance path lock.

pub mod checklist;
pub mod clock;
pub mod condition;
pub mod config;
pub mod errors;
pub mod gates;
pub mod logging;
pub mod model;
pub mod phase;
pub mod report;
pub mod repository;
pub mod storage;

pub use errors::{TransactionFailure, WorkflowError, WorkflowResult};
