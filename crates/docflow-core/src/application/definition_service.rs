use crate::{
    domain::audit::AuditEntry,
    domain::definition::{WorkflowDefinition, WorkflowGraph, WorkflowId},
    domain::repository::{AuditLog, DefinitionRepository},
    types::ActorId,
    EngineError,
};
use std::sync::Arc;

/// Service for authoring workflow definitions
///
/// Definitions are immutable once stored. A change to a deployed workflow
/// goes through `revise_definition`, which stores a new version; instances
/// already running stay bound to the version they started with.
pub struct DefinitionService {
    definition_repo: Arc<dyn DefinitionRepository>,
    audit_log: Arc<dyn AuditLog>,
}

impl DefinitionService {
    /// Create a new definition service
    pub fn new(definition_repo: Arc<dyn DefinitionRepository>, audit_log: Arc<dyn AuditLog>) -> Self {
        Self {
            definition_repo,
            audit_log,
        }
    }

    /// Validate and store version 1 of a new workflow definition.
    /// Every graph violation is reported at once, not just the first.
    pub async fn create_definition(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        category: impl Into<String>,
        graph: WorkflowGraph,
        created_by: ActorId,
    ) -> Result<WorkflowDefinition, EngineError> {
        graph.validate()?;

        let definition = WorkflowDefinition::new(name, description, category, graph, created_by);
        self.definition_repo.save(&definition).await?;

        self.audit_log
            .append(AuditEntry::for_entity(
                created_by,
                "workflow_defined",
                "workflow",
                definition.id.to_string(),
            ))
            .await?;

        tracing::info!(
            workflow_id = %definition.id,
            name = %definition.name,
            nodes = definition.graph.nodes.len(),
            "Workflow definition created"
        );

        Ok(definition)
    }

    /// Validate and store the next version of an existing workflow
    pub async fn revise_definition(
        &self,
        id: &WorkflowId,
        graph: WorkflowGraph,
        created_by: ActorId,
    ) -> Result<WorkflowDefinition, EngineError> {
        graph.validate()?;

        let latest = self
            .definition_repo
            .find_latest(id)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound(id.to_string()))?;

        let revised = latest.next_version(graph, created_by);
        self.definition_repo.save(&revised).await?;

        self.audit_log
            .append(AuditEntry::for_entity(
                created_by,
                "workflow_revised",
                "workflow",
                revised.id.to_string(),
            ))
            .await?;

        tracing::info!(
            workflow_id = %revised.id,
            version = revised.version,
            "Workflow definition revised"
        );

        Ok(revised)
    }

    /// Fetch a definition; `version = None` returns the latest
    pub async fn get_definition(
        &self,
        id: &WorkflowId,
        version: Option<u32>,
    ) -> Result<WorkflowDefinition, EngineError> {
        let found = match version {
            Some(v) => self.definition_repo.find_version(id, v).await?,
            None => self.definition_repo.find_latest(id).await?,
        };
        found.ok_or_else(|| EngineError::DefinitionNotFound(id.to_string()))
    }

    /// List every stored workflow id
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowId>, EngineError> {
        self.definition_repo.list_ids().await
    }
}
