//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! model trees and return deterministic outputs suitable for tests.

pub mod discovery;
pub mod factorial;
pub mod filter;
pub mod model;
pub mod phase;
pub mod services;
