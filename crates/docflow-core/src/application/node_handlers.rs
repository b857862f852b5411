use crate::{
    domain::approval::ApprovalRecord,
    domain::audit::AuditEntry,
    domain::definition::{NodeConfig, NodeDefinition},
    domain::instance::WorkflowInstance,
    domain::repository::{ApprovalRepository, AuditLog},
    EngineError, Notifier,
};
use std::sync::Arc;

/// What the engine does after a node's entry logic runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Select the next edge and keep driving
    Advance,
    /// Park the instance until an external decision arrives
    Suspend,
    /// The instance reached a terminal node
    Finished,
}

/// Per-node-type entry logic
///
/// Handlers mutate the passed instance in memory only; the execution
/// service persists the whole node transition afterwards. The history
/// entry for the node is already appended when a handler runs.
pub struct NodeHandlers {
    approval_repo: Arc<dyn ApprovalRepository>,
    audit_log: Arc<dyn AuditLog>,
    notifier: Arc<dyn Notifier>,
}

impl NodeHandlers {
    /// Create the handler set
    pub fn new(
        approval_repo: Arc<dyn ApprovalRepository>,
        audit_log: Arc<dyn AuditLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            approval_repo,
            audit_log,
            notifier,
        }
    }

    /// Run the entry logic of a node the instance just moved onto
    pub async fn enter(
        &self,
        instance: &mut WorkflowInstance,
        node: &NodeDefinition,
    ) -> Result<HandlerOutcome, EngineError> {
        match &node.config {
            NodeConfig::Start {} => {
                instance.mark_in_progress()?;
                Ok(HandlerOutcome::Advance)
            }

            NodeConfig::Approval { approver_id } => {
                instance.mark_in_progress()?;

                let record = ApprovalRecord::open(instance.id.clone(), *approver_id);
                self.approval_repo.insert(&record).await?;

                self.audit_log
                    .append(AuditEntry::for_entity(
                        *approver_id,
                        "approval_requested",
                        "instance",
                        instance.id.to_string(),
                    ))
                    .await?;

                self.deliver(
                    *approver_id,
                    &format!("Approval requested for document {}", instance.document_id),
                    instance,
                )
                .await;

                tracing::info!(
                    instance_id = %instance.id,
                    node_id = %node.node_id,
                    approver_id = %approver_id,
                    "Instance suspended awaiting approval"
                );

                Ok(HandlerOutcome::Suspend)
            }

            NodeConfig::Assign { assignee_id } => {
                self.audit_log
                    .append(AuditEntry::for_entity(
                        *assignee_id,
                        "document_assigned",
                        "document",
                        instance.document_id.to_string(),
                    ))
                    .await?;

                self.deliver(
                    *assignee_id,
                    &format!("Document {} assigned to you", instance.document_id),
                    instance,
                )
                .await;

                Ok(HandlerOutcome::Advance)
            }

            NodeConfig::Notify {
                recipients,
                message,
            } => {
                for recipient in recipients {
                    self.deliver(*recipient, message, instance).await;
                }
                Ok(HandlerOutcome::Advance)
            }

            // Branching happens in edge selection; entering the node is a no-op
            NodeConfig::Condition {} => Ok(HandlerOutcome::Advance),

            NodeConfig::End {} => {
                instance.complete()?;
                tracing::info!(
                    instance_id = %instance.id,
                    node_id = %node.node_id,
                    "Instance completed"
                );
                Ok(HandlerOutcome::Finished)
            }
        }
    }

    /// Delivery failure never blocks the workflow; it is logged and the
    /// node still advances.
    async fn deliver(&self, recipient: crate::ActorId, message: &str, instance: &WorkflowInstance) {
        if let Err(e) = self.notifier.notify(recipient, message).await {
            tracing::warn!(
                instance_id = %instance.id,
                recipient = %recipient,
                error = %e,
                "Notification delivery failed"
            );
        }
    }
}
