//! Workflow instance aggregate
//!
//! A `WorkflowInstance` is one run of a definition version bound to a
//! single document. The coarse `InstanceState` and the node-level
//! `current_node` position move independently: an approval node parks the
//! position while the state sits at `InProgress` until a decision lands.
//! All transitions are guarded; terminal instances refuse every mutation.

use crate::domain::definition::{NodeId, WorkflowId};
use crate::error::EngineError;
use crate::types::{ActorId, DataMap, DocumentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a workflow instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Created but execution has not entered the graph yet
    Pending,
    /// Executing, or parked on an approval node awaiting a decision
    InProgress,
    /// Latest approval decision was positive; execution resumes
    Approved,
    /// An approver rejected the instance; terminal
    Rejected,
    /// Raised out of the normal flow for attention; re-entrant
    Escalated,
    /// Reached an end node; terminal
    Completed,
    /// Explicitly cancelled; terminal
    Cancelled,
}

impl InstanceState {
    /// Terminal states admit no further mutation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceState::Completed | InstanceState::Rejected | InstanceState::Cancelled
        )
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceState::Pending => "pending",
            InstanceState::InProgress => "in_progress",
            InstanceState::Approved => "approved",
            InstanceState::Rejected => "rejected",
            InstanceState::Escalated => "escalated",
            InstanceState::Completed => "completed",
            InstanceState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One node-entry record; the history is append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Node that was entered
    pub node_id: NodeId,
    /// When the position moved to the node
    pub timestamp: DateTime<Utc>,
}

/// A running (or finished) workflow bound to one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique instance id
    pub id: InstanceId,
    /// Definition this instance runs
    pub workflow_id: WorkflowId,
    /// Definition version pinned at start; later revisions never apply here
    pub definition_version: u32,
    /// Document the run is bound to
    pub document_id: DocumentId,
    /// Actor that started the instance
    pub initiated_by: ActorId,
    /// Coarse lifecycle state
    pub state: InstanceState,
    /// Node-level position in the graph
    pub current_node: NodeId,
    /// Accumulated payload visible to condition evaluation
    pub data: DataMap,
    /// Append-only record of every node entered, in order
    pub history: Vec<HistoryEntry>,
    /// Creation time
    pub started_at: DateTime<Utc>,
    /// Set when a terminal state is entered
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped by the store on every write
    pub revision: u64,
}

impl WorkflowInstance {
    /// Create a new pending instance positioned at the start node.
    /// The history stays empty until execution enters the node.
    pub fn new(
        workflow_id: WorkflowId,
        definition_version: u32,
        document_id: DocumentId,
        initiated_by: ActorId,
        start_node: NodeId,
        data: DataMap,
    ) -> Self {
        Self {
            id: InstanceId::new(),
            workflow_id,
            definition_version,
            document_id,
            initiated_by,
            state: InstanceState::Pending,
            current_node: start_node,
            data,
            history: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            revision: 0,
        }
    }

    fn ensure_active(&self) -> Result<(), EngineError> {
        if self.state.is_terminal() {
            return Err(EngineError::InvalidStateTransition(format!(
                "instance {} is {} and cannot change",
                self.id, self.state
            )));
        }
        Ok(())
    }

    /// Move the position to a node and append the matching history entry.
    /// Callers must do this before running any of the node's side effects
    /// so the history records nodes entered, not nodes completed.
    pub fn enter_node(&mut self, node_id: NodeId) -> Result<(), EngineError> {
        self.ensure_active()?;
        self.current_node = node_id.clone();
        self.history.push(HistoryEntry {
            node_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Mark execution as running; idempotent while already in progress
    pub fn mark_in_progress(&mut self) -> Result<(), EngineError> {
        match self.state {
            InstanceState::Pending
            | InstanceState::InProgress
            | InstanceState::Approved
            | InstanceState::Escalated => {
                self.state = InstanceState::InProgress;
                Ok(())
            }
            other => Err(EngineError::InvalidStateTransition(format!(
                "instance {} cannot move to in_progress from {}",
                self.id, other
            ))),
        }
    }

    /// Record a positive approval decision
    pub fn mark_approved(&mut self) -> Result<(), EngineError> {
        match self.state {
            InstanceState::InProgress => {
                self.state = InstanceState::Approved;
                Ok(())
            }
            other => Err(EngineError::InvalidStateTransition(format!(
                "instance {} cannot be approved from {}",
                self.id, other
            ))),
        }
    }

    /// Record a rejection; the instance becomes terminal
    pub fn mark_rejected(&mut self) -> Result<(), EngineError> {
        match self.state {
            InstanceState::InProgress => {
                self.state = InstanceState::Rejected;
                self.completed_at = Some(Utc::now());
                Ok(())
            }
            other => Err(EngineError::InvalidStateTransition(format!(
                "instance {} cannot be rejected from {}",
                self.id, other
            ))),
        }
    }

    /// Finish the run after reaching an end node
    pub fn complete(&mut self) -> Result<(), EngineError> {
        match self.state {
            InstanceState::InProgress | InstanceState::Approved => {
                self.state = InstanceState::Completed;
                self.completed_at = Some(Utc::now());
                Ok(())
            }
            other => Err(EngineError::InvalidStateTransition(format!(
                "instance {} cannot complete from {}",
                self.id, other
            ))),
        }
    }

    /// Explicitly cancel a run that has not finished
    pub fn cancel(&mut self) -> Result<(), EngineError> {
        self.ensure_active()?;
        self.state = InstanceState::Cancelled;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Raise the instance for out-of-band attention. Re-entrant: a later
    /// `mark_in_progress` returns it to normal execution.
    pub fn escalate(&mut self) -> Result<(), EngineError> {
        match self.state {
            InstanceState::Pending | InstanceState::InProgress => {
                self.state = InstanceState::Escalated;
                Ok(())
            }
            other => Err(EngineError::InvalidStateTransition(format!(
                "instance {} cannot escalate from {}",
                self.id, other
            ))),
        }
    }

    /// Merge payload into the instance data; fails on terminal instances
    pub fn merge_data(&mut self, update: DataMap) -> Result<(), EngineError> {
        self.ensure_active()?;
        self.data.merge(update);
        Ok(())
    }
}
