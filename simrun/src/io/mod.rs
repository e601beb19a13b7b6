//! Collaborators and side effects used by the coordinator.

pub mod command;
pub mod config;
pub mod engine;
pub mod model_store;
pub mod process;
pub mod storage;
pub mod summary;
