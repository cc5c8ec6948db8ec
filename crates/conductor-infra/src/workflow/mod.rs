//! Workflow Dao adapters.

pub mod memory_dao;

pub use memory_dao::MemoryWorkflowDao;
