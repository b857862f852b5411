//! Repository traits for the workflow engine
//!
//! The engine talks to persistence only through these traits. External
//! crates can implement them over a real database; the in-memory variants
//! below back the test suite and local tooling.
//!
//! Two operations carry the concurrency discipline. `InstanceRepository::
//! update` is a compare-and-swap on the instance revision, so two writers
//! racing on one instance serialize and the loser gets
//! `ConcurrentModification`. `ApprovalRepository::resolve` closes a record
//! only while it is still pending, so a decision can land exactly once.

use async_trait::async_trait;

use super::approval::{ApprovalAction, ApprovalId, ApprovalRecord};
use super::audit::AuditEntry;
use super::definition::{WorkflowDefinition, WorkflowId};
use super::instance::{InstanceId, WorkflowInstance};
use crate::types::ActorId;
use crate::EngineError;

/// Repository for workflow definitions. Definitions are immutable once
/// stored; revisions are separate rows under the same workflow id.
#[async_trait]
pub trait DefinitionRepository: Send + Sync {
    /// Find a specific version of a definition
    async fn find_version(
        &self,
        id: &WorkflowId,
        version: u32,
    ) -> Result<Option<WorkflowDefinition>, EngineError>;

    /// Find the highest stored version of a definition
    async fn find_latest(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, EngineError>;

    /// Store a definition version; fails if that version already exists
    async fn save(&self, definition: &WorkflowDefinition) -> Result<(), EngineError>;

    /// List all workflow ids with at least one stored version
    async fn list_ids(&self) -> Result<Vec<WorkflowId>, EngineError>;
}

/// Repository for workflow instances
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Find an instance by id
    async fn find_by_id(&self, id: &InstanceId) -> Result<Option<WorkflowInstance>, EngineError>;

    /// Store a freshly created instance; fails if the id already exists
    async fn insert(&self, instance: &WorkflowInstance) -> Result<(), EngineError>;

    /// Write back a mutated instance. The write succeeds only if the
    /// stored revision still equals `instance.revision`; on success the
    /// revision is bumped both in the store and on the passed instance.
    async fn update(&self, instance: &mut WorkflowInstance) -> Result<(), EngineError>;

    /// List all instances of a workflow, any version
    async fn list_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<WorkflowInstance>, EngineError>;
}

/// Repository for approval records
#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    /// Store a newly opened record
    async fn insert(&self, record: &ApprovalRecord) -> Result<(), EngineError>;

    /// Find the pending record for an approver on an instance, if any
    async fn find_pending(
        &self,
        instance_id: &InstanceId,
        approver_id: ActorId,
    ) -> Result<Option<ApprovalRecord>, EngineError>;

    /// All pending records awaiting one approver, across instances
    async fn pending_for_approver(
        &self,
        approver_id: ActorId,
    ) -> Result<Vec<ApprovalRecord>, EngineError>;

    /// Close a record with a decision. Succeeds only while the stored
    /// record is still pending; a second decision on the same record
    /// fails with `ConcurrentModification`.
    async fn resolve(
        &self,
        id: &ApprovalId,
        action: ApprovalAction,
        comments: Option<String>,
    ) -> Result<ApprovalRecord, EngineError>;
}

/// Append-only audit log
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one entry
    async fn append(&self, entry: AuditEntry) -> Result<(), EngineError>;

    /// Entries recorded against one entity, oldest first
    async fn entries_for(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditEntry>, EngineError>;
}

/// Memory implementations for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::DashMap;
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// In-memory definition store keyed by workflow id, versions appended
    /// in order
    pub struct MemoryDefinitionRepository {
        definitions: std::sync::Arc<RwLock<HashMap<String, Vec<WorkflowDefinition>>>>,
    }

    impl MemoryDefinitionRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self {
                definitions: std::sync::Arc::new(RwLock::new(HashMap::new())),
            }
        }
    }

    impl Default for MemoryDefinitionRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl DefinitionRepository for MemoryDefinitionRepository {
        async fn find_version(
            &self,
            id: &WorkflowId,
            version: u32,
        ) -> Result<Option<WorkflowDefinition>, EngineError> {
            let definitions = self.definitions.read().map_err(|e| {
                EngineError::StateStoreError(format!("Failed to acquire read lock: {}", e))
            })?;

            Ok(definitions
                .get(&id.0)
                .and_then(|versions| versions.iter().find(|d| d.version == version))
                .cloned())
        }

        async fn find_latest(
            &self,
            id: &WorkflowId,
        ) -> Result<Option<WorkflowDefinition>, EngineError> {
            let definitions = self.definitions.read().map_err(|e| {
                EngineError::StateStoreError(format!("Failed to acquire read lock: {}", e))
            })?;

            Ok(definitions
                .get(&id.0)
                .and_then(|versions| versions.iter().max_by_key(|d| d.version))
                .cloned())
        }

        async fn save(&self, definition: &WorkflowDefinition) -> Result<(), EngineError> {
            let mut definitions = self.definitions.write().map_err(|e| {
                EngineError::StateStoreError(format!("Failed to acquire write lock: {}", e))
            })?;

            let versions = definitions.entry(definition.id.0.clone()).or_default();
            if versions.iter().any(|d| d.version == definition.version) {
                return Err(EngineError::StateStoreError(format!(
                    "definition {} version {} already stored",
                    definition.id, definition.version
                )));
            }
            versions.push(definition.clone());

            Ok(())
        }

        async fn list_ids(&self) -> Result<Vec<WorkflowId>, EngineError> {
            let definitions = self.definitions.read().map_err(|e| {
                EngineError::StateStoreError(format!("Failed to acquire read lock: {}", e))
            })?;

            Ok(definitions.keys().map(|id| WorkflowId(id.clone())).collect())
        }
    }

    /// In-memory instance store; a concurrent map keeps the revision
    /// check-and-bump atomic per instance
    pub struct MemoryInstanceRepository {
        instances: std::sync::Arc<DashMap<String, WorkflowInstance>>,
    }

    impl MemoryInstanceRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self {
                instances: std::sync::Arc::new(DashMap::with_capacity(64)),
            }
        }
    }

    impl Default for MemoryInstanceRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl InstanceRepository for MemoryInstanceRepository {
        async fn find_by_id(
            &self,
            id: &InstanceId,
        ) -> Result<Option<WorkflowInstance>, EngineError> {
            Ok(self.instances.get(&id.0).map(|i| i.clone()))
        }

        async fn insert(&self, instance: &WorkflowInstance) -> Result<(), EngineError> {
            use dashmap::mapref::entry::Entry;

            match self.instances.entry(instance.id.0.clone()) {
                Entry::Occupied(_) => Err(EngineError::StateStoreError(format!(
                    "instance {} already stored",
                    instance.id
                ))),
                Entry::Vacant(slot) => {
                    slot.insert(instance.clone());
                    Ok(())
                }
            }
        }

        async fn update(&self, instance: &mut WorkflowInstance) -> Result<(), EngineError> {
            // The shard lock held by get_mut makes the compare-and-swap
            // atomic with respect to other writers of the same instance.
            let mut stored = self
                .instances
                .get_mut(&instance.id.0)
                .ok_or_else(|| EngineError::InstanceNotFound(instance.id.to_string()))?;

            if stored.revision != instance.revision {
                return Err(EngineError::ConcurrentModification(format!(
                    "instance {} was at revision {}, write expected {}",
                    instance.id, stored.revision, instance.revision
                )));
            }

            instance.revision += 1;
            *stored = instance.clone();
            Ok(())
        }

        async fn list_for_workflow(
            &self,
            workflow_id: &WorkflowId,
        ) -> Result<Vec<WorkflowInstance>, EngineError> {
            Ok(self
                .instances
                .iter()
                .filter(|i| i.workflow_id == *workflow_id)
                .map(|i| i.clone())
                .collect())
        }
    }

    /// In-memory approval record store
    pub struct MemoryApprovalRepository {
        records: std::sync::Arc<DashMap<String, ApprovalRecord>>,
    }

    impl MemoryApprovalRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self {
                records: std::sync::Arc::new(DashMap::with_capacity(32)),
            }
        }
    }

    impl Default for MemoryApprovalRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ApprovalRepository for MemoryApprovalRepository {
        async fn insert(&self, record: &ApprovalRecord) -> Result<(), EngineError> {
            self.records.insert(record.id.0.clone(), record.clone());
            Ok(())
        }

        async fn find_pending(
            &self,
            instance_id: &InstanceId,
            approver_id: ActorId,
        ) -> Result<Option<ApprovalRecord>, EngineError> {
            Ok(self
                .records
                .iter()
                .find(|r| {
                    r.instance_id == *instance_id
                        && r.approver_id == approver_id
                        && r.is_pending()
                })
                .map(|r| r.clone()))
        }

        async fn pending_for_approver(
            &self,
            approver_id: ActorId,
        ) -> Result<Vec<ApprovalRecord>, EngineError> {
            let mut pending: Vec<ApprovalRecord> = self
                .records
                .iter()
                .filter(|r| r.approver_id == approver_id && r.is_pending())
                .map(|r| r.clone())
                .collect();
            pending.sort_by_key(|r| r.created_at);

            Ok(pending)
        }

        async fn resolve(
            &self,
            id: &ApprovalId,
            action: ApprovalAction,
            comments: Option<String>,
        ) -> Result<ApprovalRecord, EngineError> {
            // get_mut keeps the pending check and the write atomic, so of
            // two racing decisions exactly one closes the record.
            let mut stored = self
                .records
                .get_mut(&id.0)
                .ok_or_else(|| EngineError::ApprovalNotFound(id.to_string()))?;

            if !stored.is_pending() {
                return Err(EngineError::ConcurrentModification(format!(
                    "approval {} was already decided",
                    id
                )));
            }

            stored
                .decide(action, comments)
                .map_err(|e| EngineError::ConcurrentModification(e.to_string()))?;
            Ok(stored.clone())
        }
    }

    /// In-memory append-only audit log
    pub struct MemoryAuditLog {
        entries: std::sync::Arc<RwLock<Vec<AuditEntry>>>,
    }

    impl MemoryAuditLog {
        /// Create an empty log
        pub fn new() -> Self {
            Self {
                entries: std::sync::Arc::new(RwLock::new(Vec::new())),
            }
        }
    }

    impl Default for MemoryAuditLog {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl AuditLog for MemoryAuditLog {
        async fn append(&self, entry: AuditEntry) -> Result<(), EngineError> {
            let mut entries = self.entries.write().map_err(|e| {
                EngineError::StateStoreError(format!("Failed to acquire write lock: {}", e))
            })?;

            entries.push(entry);
            Ok(())
        }

        async fn entries_for(
            &self,
            entity_type: &str,
            entity_id: &str,
        ) -> Result<Vec<AuditEntry>, EngineError> {
            let entries = self.entries.read().map_err(|e| {
                EngineError::StateStoreError(format!("Failed to acquire read lock: {}", e))
            })?;

            Ok(entries
                .iter()
                .filter(|e| {
                    e.entity_type.as_deref() == Some(entity_type)
                        && e.entity_id.as_deref() == Some(entity_id)
                })
                .cloned()
                .collect())
        }
    }
}
