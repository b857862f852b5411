//! DocFlow Core: workflow definition and execution engine
//!
//! The engine stores workflow graphs as data, runs instances bound to
//! documents, and coordinates the actors around them: initiators start
//! instances, approvers resolve gates, assignees receive work. Execution
//! is a synchronous drive from node to node that suspends on approval
//! gates and finishes on terminal nodes, with an append-only history and
//! audit trail of everything that happened.
//!
//! Surrounding document machinery (OCR, PDF rendering, categorization,
//! UI, authentication) stays outside the crate and reaches the engine
//! only through data: initial payloads, actor ids, and the [`Notifier`]
//! trait for outbound messages.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod application;
pub mod domain;
pub mod error;
pub mod types;

pub use application::{
    DefinitionService, ExecutionService, HandlerOutcome, NodeHandlers, PendingApproval,
};
pub use domain::approval::{ApprovalAction, ApprovalId, ApprovalRecord};
pub use domain::audit::AuditEntry;
pub use domain::condition::{ConditionEvaluator, DefaultConditionEvaluator};
pub use domain::definition::{
    EdgeDefinition, NodeConfig, NodeDefinition, NodeId, WorkflowDefinition, WorkflowGraph,
    WorkflowId,
};
pub use domain::instance::{HistoryEntry, InstanceId, InstanceState, WorkflowInstance};
pub use error::EngineError;
pub use types::{ActorId, DataMap, DocumentId};

use async_trait::async_trait;

/// Outbound notification channel
///
/// The engine never renders or sends messages itself; email, chat, or
/// in-app delivery live behind this trait.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message to one actor
    async fn notify(&self, recipient: ActorId, message: &str) -> Result<(), EngineError>;
}

/// Notifier that only logs deliveries; the default for tests and local
/// runs
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, recipient: ActorId, message: &str) -> Result<(), EngineError> {
        tracing::info!(
            recipient = %recipient,
            message = %message,
            "Notification delivered"
        );
        Ok(())
    }
}
