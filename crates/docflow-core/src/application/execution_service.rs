use crate::{
    application::node_handlers::{HandlerOutcome, NodeHandlers},
    domain::approval::{ApprovalAction, ApprovalRecord},
    domain::audit::AuditEntry,
    domain::condition::{ConditionEvaluator, DefaultConditionEvaluator},
    domain::definition::{NodeDefinition, NodeId, WorkflowDefinition, WorkflowId},
    domain::instance::{InstanceId, WorkflowInstance},
    domain::repository::{ApprovalRepository, AuditLog, DefinitionRepository, InstanceRepository},
    types::{ActorId, DataMap, DocumentId},
    EngineError, Notifier,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// One pending approval joined with the context an approvals list renders:
/// which workflow, which document, and when the run started
#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    /// The open approval record
    pub approval: ApprovalRecord,
    /// Workflow the gated instance runs
    pub workflow_id: WorkflowId,
    /// Document the gated instance is bound to
    pub document_id: DocumentId,
    /// When the gated instance started
    pub started_at: DateTime<Utc>,
}

/// Service running workflow instances
///
/// Execution is a synchronous drive: `start_instance` walks the graph
/// from the start node until it hits an approval gate or a terminal
/// node, and `approve` resumes the walk from the gate. Each node
/// transition is persisted as one compare-and-swap write, so two callers
/// racing on the same instance serialize and the loser sees
/// `ConcurrentModification`.
pub struct ExecutionService {
    definition_repo: Arc<dyn DefinitionRepository>,
    instance_repo: Arc<dyn InstanceRepository>,
    approval_repo: Arc<dyn ApprovalRepository>,
    audit_log: Arc<dyn AuditLog>,
    handlers: NodeHandlers,
    evaluator: Arc<dyn ConditionEvaluator>,
}

impl ExecutionService {
    /// Create an execution service wired to its stores and collaborators
    pub fn new(
        definition_repo: Arc<dyn DefinitionRepository>,
        instance_repo: Arc<dyn InstanceRepository>,
        approval_repo: Arc<dyn ApprovalRepository>,
        audit_log: Arc<dyn AuditLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let handlers = NodeHandlers::new(approval_repo.clone(), audit_log.clone(), notifier);
        Self {
            definition_repo,
            instance_repo,
            approval_repo,
            audit_log,
            handlers,
            evaluator: Arc::new(DefaultConditionEvaluator),
        }
    }

    /// Replace the condition evaluator
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Start an instance of the latest definition version and drive it
    /// until it suspends on an approval or reaches a terminal node
    pub async fn start_instance(
        &self,
        workflow_id: &WorkflowId,
        document_id: DocumentId,
        initiated_by: ActorId,
        initial_data: DataMap,
    ) -> Result<InstanceId, EngineError> {
        let definition = self
            .definition_repo
            .find_latest(workflow_id)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound(workflow_id.to_string()))?;

        let start = definition
            .graph
            .start_node()
            .ok_or_else(|| {
                EngineError::ValidationFailed(vec![format!(
                    "definition {} has no start node",
                    definition.id
                )])
            })?
            .node_id
            .clone();

        let mut instance = WorkflowInstance::new(
            workflow_id.clone(),
            definition.version,
            document_id,
            initiated_by,
            start.clone(),
            initial_data,
        );
        self.instance_repo.insert(&instance).await?;

        self.audit_log
            .append(AuditEntry::for_entity(
                initiated_by,
                "workflow_started",
                "instance",
                instance.id.to_string(),
            ))
            .await?;

        tracing::info!(
            instance_id = %instance.id,
            workflow_id = %workflow_id,
            version = definition.version,
            document_id = %document_id,
            "Workflow instance started"
        );

        self.drive(&mut instance, &definition, start).await?;

        Ok(instance.id)
    }

    /// Grant a pending approval and resume execution
    pub async fn approve(
        &self,
        instance_id: &InstanceId,
        approver_id: ActorId,
        comments: Option<String>,
    ) -> Result<(), EngineError> {
        self.decide(instance_id, approver_id, comments, ApprovalAction::Approved)
            .await
    }

    /// Reject a pending approval; the instance becomes terminal
    pub async fn reject(
        &self,
        instance_id: &InstanceId,
        approver_id: ActorId,
        comments: Option<String>,
    ) -> Result<(), EngineError> {
        self.decide(instance_id, approver_id, comments, ApprovalAction::Rejected)
            .await
    }

    /// Explicitly cancel a running instance
    pub async fn cancel_instance(
        &self,
        instance_id: &InstanceId,
        cancelled_by: ActorId,
    ) -> Result<(), EngineError> {
        let mut instance = self.fetch(instance_id).await?;

        instance.cancel()?;
        self.instance_repo.update(&mut instance).await?;

        self.audit_log
            .append(AuditEntry::for_entity(
                cancelled_by,
                "workflow_cancelled",
                "instance",
                instance.id.to_string(),
            ))
            .await?;

        tracing::info!(
            instance_id = %instance.id,
            cancelled_by = %cancelled_by,
            "Workflow instance cancelled"
        );

        Ok(())
    }

    /// Fetch an instance for UI and reporting reads
    pub async fn get_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<WorkflowInstance, EngineError> {
        self.fetch(instance_id).await
    }

    /// All approvals currently awaiting one approver, joined with their
    /// instance context, most recently started instance first
    pub async fn get_pending_approvals(
        &self,
        approver_id: ActorId,
    ) -> Result<Vec<PendingApproval>, EngineError> {
        let records = self.approval_repo.pending_for_approver(approver_id).await?;

        let mut pending = Vec::with_capacity(records.len());
        for record in records {
            let instance = self.fetch(&record.instance_id).await?;
            pending.push(PendingApproval {
                workflow_id: instance.workflow_id.clone(),
                document_id: instance.document_id,
                started_at: instance.started_at,
                approval: record,
            });
        }
        pending.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(pending)
    }

    async fn fetch(&self, instance_id: &InstanceId) -> Result<WorkflowInstance, EngineError> {
        self.instance_repo
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| EngineError::InstanceNotFound(instance_id.to_string()))
    }

    async fn decide(
        &self,
        instance_id: &InstanceId,
        approver_id: ActorId,
        comments: Option<String>,
        action: ApprovalAction,
    ) -> Result<(), EngineError> {
        let mut instance = self.fetch(instance_id).await?;

        if instance.state.is_terminal() {
            return Err(EngineError::InvalidStateTransition(format!(
                "instance {} is {} and accepts no decisions",
                instance.id, instance.state
            )));
        }

        let record = self
            .approval_repo
            .find_pending(instance_id, approver_id)
            .await?
            .ok_or_else(|| {
                EngineError::ApprovalNotFound(format!(
                    "no pending approval for actor {} on instance {}",
                    approver_id, instance_id
                ))
            })?;

        // Single-shot close; of two racing decisions only one passes here
        self.approval_repo
            .resolve(&record.id, action, comments)
            .await?;

        match action {
            ApprovalAction::Approved => {
                instance.mark_approved()?;
                self.instance_repo.update(&mut instance).await?;

                self.audit_log
                    .append(AuditEntry::for_entity(
                        approver_id,
                        "approval_granted",
                        "instance",
                        instance.id.to_string(),
                    ))
                    .await?;

                tracing::info!(
                    instance_id = %instance.id,
                    approver_id = %approver_id,
                    "Approval granted, resuming execution"
                );

                let definition = self
                    .definition_repo
                    .find_version(&instance.workflow_id, instance.definition_version)
                    .await?
                    .ok_or_else(|| {
                        EngineError::DefinitionNotFound(format!(
                            "{} version {}",
                            instance.workflow_id, instance.definition_version
                        ))
                    })?;

                let gate = definition.graph.node(&instance.current_node).ok_or_else(|| {
                    EngineError::StateStoreError(format!(
                        "instance {} references unknown node {}",
                        instance.id, instance.current_node
                    ))
                })?;

                match self.select_edge(&instance, gate).await? {
                    Some(next) => self.drive(&mut instance, &definition, next).await,
                    None => {
                        self.record_stall(&instance, gate).await?;
                        Ok(())
                    }
                }
            }
            ApprovalAction::Rejected => {
                instance.mark_rejected()?;
                self.instance_repo.update(&mut instance).await?;

                self.audit_log
                    .append(AuditEntry::for_entity(
                        approver_id,
                        "approval_rejected",
                        "instance",
                        instance.id.to_string(),
                    ))
                    .await?;

                tracing::info!(
                    instance_id = %instance.id,
                    approver_id = %approver_id,
                    "Approval rejected, instance terminal"
                );

                Ok(())
            }
            ApprovalAction::Pending => Err(EngineError::InvalidStateTransition(
                "a decision cannot be pending".to_string(),
            )),
        }
    }

    /// Walk the graph from `next` until the instance suspends, finishes,
    /// or stalls. Each iteration enters one node, runs its handler, and
    /// persists the transition as a unit; a failure leaves the store at
    /// the last fully applied node.
    async fn drive(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        mut next: NodeId,
    ) -> Result<(), EngineError> {
        // A loop-free walk enters each node at most once
        let limit = definition.graph.nodes.len();
        let mut entered = 0usize;

        loop {
            if entered >= limit {
                return Err(EngineError::CycleDetected(format!(
                    "instance {} exceeded {} node entries without suspending",
                    instance.id, limit
                )));
            }
            entered += 1;

            let node = definition.graph.node(&next).ok_or_else(|| {
                EngineError::StateStoreError(format!(
                    "definition {} has no node {}",
                    definition.id, next
                ))
            })?;

            // History records the entry before any handler side effect
            instance.enter_node(next.clone())?;
            let outcome = self.handlers.enter(instance, node).await?;
            self.instance_repo.update(instance).await?;

            tracing::debug!(
                instance_id = %instance.id,
                node_id = %node.node_id,
                outcome = ?outcome,
                "Node transition applied"
            );

            match outcome {
                HandlerOutcome::Suspend | HandlerOutcome::Finished => return Ok(()),
                HandlerOutcome::Advance => match self.select_edge(instance, node).await? {
                    Some(target) => next = target,
                    None => {
                        self.record_stall(instance, node).await?;
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Pick the first edge whose condition is absent or true, in list
    /// order. A condition fault makes that edge not match: the engine
    /// fails closed, logs the fault, and keeps scanning.
    async fn select_edge(
        &self,
        instance: &WorkflowInstance,
        node: &NodeDefinition,
    ) -> Result<Option<NodeId>, EngineError> {
        for edge in &node.next_nodes {
            let condition = match &edge.condition {
                None => return Ok(Some(edge.node_id.clone())),
                Some(expr) => expr,
            };

            match self.evaluator.evaluate(condition, &instance.data) {
                Ok(true) => return Ok(Some(edge.node_id.clone())),
                Ok(false) => {}
                Err(fault) => {
                    tracing::warn!(
                        instance_id = %instance.id,
                        node_id = %node.node_id,
                        target = %edge.node_id,
                        error = %fault,
                        "Condition fault, edge treated as not matching"
                    );
                    self.audit_log
                        .append(AuditEntry::for_entity(
                            instance.initiated_by,
                            "condition_fault",
                            "instance",
                            instance.id.to_string(),
                        ))
                        .await?;
                }
            }
        }

        Ok(None)
    }

    /// No edge matched. An authoring bug, not a runtime error: the
    /// instance stays parked where it is and the stall is diagnosable
    /// from the logs and audit trail.
    async fn record_stall(
        &self,
        instance: &WorkflowInstance,
        node: &NodeDefinition,
    ) -> Result<(), EngineError> {
        tracing::warn!(
            instance_id = %instance.id,
            node_id = %node.node_id,
            "No outgoing edge matched, instance stalled"
        );
        self.audit_log
            .append(AuditEntry::for_entity(
                instance.initiated_by,
                "instance_stalled",
                "instance",
                instance.id.to_string(),
            ))
            .await
    }
}
