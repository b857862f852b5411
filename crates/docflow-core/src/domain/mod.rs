//! Domain model for the workflow engine
//!
//! Definitions are immutable graph data, instances are the mutable runs,
//! approvals and audit entries are the append-only records around them.
//! Repositories are the only seam to persistence.

pub mod approval;
pub mod audit;
pub mod condition;
pub mod definition;
pub mod instance;
pub mod repository;
