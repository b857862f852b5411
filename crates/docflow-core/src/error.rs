use thiserror::Error;

/// Core error type for the DocFlow workflow engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Workflow definition not found
    #[error("Workflow definition not found: {0}")]
    DefinitionNotFound(String),

    /// Workflow instance not found
    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(String),

    /// No matching pending approval record
    #[error("Pending approval not found: {0}")]
    ApprovalNotFound(String),

    /// Definition graph failed validation; every violated invariant is listed
    #[error("Definition validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    /// Operation attempted against a state that does not permit it
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Lost a serialization race against another writer; caller may retry
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Branch condition could not be evaluated
    #[error("Condition evaluation fault: {0}")]
    ConditionEvaluationFault(String),

    /// Auto-advance chain exceeded the definition's node count
    #[error("Cycle detected in workflow graph: {0}")]
    CycleDetected(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Notification delivery error
    #[error("Notification error: {0}")]
    NotificationError(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::SerializationError(err.to_string())
    }
}
