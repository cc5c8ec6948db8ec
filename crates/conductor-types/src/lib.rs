//! Shared domain types for Conductor.
//!
//! Workflow definitions, run envelopes, lifecycle events, engine configuration
//! and repository errors.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
