//! Audit trail entries
//!
//! The audit log is strictly append-only. Entries name what happened and
//! who did it; they never duplicate instance history, which tracks node
//! positions only.

use crate::types::ActorId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Actor the action is attributed to
    pub actor_id: ActorId,
    /// What happened, e.g. "workflow_started" or "approval_granted"
    pub action: String,
    /// Kind of entity the action touched, when one applies
    pub entity_type: Option<String>,
    /// Id of the touched entity
    pub entity_id: Option<String>,
    /// When the action happened
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Build an entry scoped to an entity
    pub fn for_entity(
        actor_id: ActorId,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            actor_id,
            action: action.into(),
            entity_type: Some(entity_type.into()),
            entity_id: Some(entity_id.into()),
            timestamp: Utc::now(),
        }
    }

    /// Build an entry with no entity scope
    pub fn new(actor_id: ActorId, action: impl Into<String>) -> Self {
        Self {
            actor_id,
            action: action.into(),
            entity_type: None,
            entity_id: None,
            timestamp: Utc::now(),
        }
    }
}
