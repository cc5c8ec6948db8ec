//! Infrastructure layer for Conductor.
//!
//! Adapters for the ports defined in `conductor-core`: TOML engine
//! configuration and workflow Dao implementations.

pub mod config;
pub mod workflow;
