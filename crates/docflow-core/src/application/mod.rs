//! Application services orchestrating the domain model
//!
//! `DefinitionService` owns authoring (validate, store, revise),
//! `ExecutionService` owns the run lifecycle (start, approve, reject,
//! cancel), and `NodeHandlers` holds the per-node-type entry logic the
//! execution service drives.

pub mod definition_service;
pub mod execution_service;
pub mod node_handlers;

pub use definition_service::DefinitionService;
pub use execution_service::{ExecutionService, PendingApproval};
pub use node_handlers::{HandlerOutcome, NodeHandlers};
