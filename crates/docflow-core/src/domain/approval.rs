//! Approval records
//!
//! Every visit to an approval node opens a fresh pending record for the
//! configured approver. Records are append-only: a decision closes the
//! record in place, revisiting the node opens a new one rather than
//! reopening the old.

use crate::domain::instance::InstanceId;
use crate::error::EngineError;
use crate::types::ActorId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of an approval record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ApprovalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decision status of an approval record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    /// Awaiting the approver's decision
    Pending,
    /// Approved
    Approved,
    /// Rejected
    Rejected,
}

/// One approver's gate on one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Unique record id
    pub id: ApprovalId,
    /// Instance awaiting the decision
    pub instance_id: InstanceId,
    /// Actor whose decision resolves the record
    pub approver_id: ActorId,
    /// Decision status
    pub action: ApprovalAction,
    /// Free-text comments attached to the decision
    pub comments: Option<String>,
    /// When the record was opened
    pub created_at: DateTime<Utc>,
    /// When the decision landed
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalRecord {
    /// Open a pending record for an approver on an instance
    pub fn open(instance_id: InstanceId, approver_id: ActorId) -> Self {
        Self {
            id: ApprovalId::new(),
            instance_id,
            approver_id,
            action: ApprovalAction::Pending,
            comments: None,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    /// Whether the record still awaits a decision
    pub fn is_pending(&self) -> bool {
        self.action == ApprovalAction::Pending
    }

    /// Close the record with a decision; fails if already decided
    pub fn decide(
        &mut self,
        action: ApprovalAction,
        comments: Option<String>,
    ) -> Result<(), EngineError> {
        if !self.is_pending() {
            return Err(EngineError::InvalidStateTransition(format!(
                "approval {} was already decided",
                self.id
            )));
        }
        self.action = action;
        self.comments = comments;
        self.decided_at = Some(Utc::now());
        Ok(())
    }
}
