//! Shared test utilities for Stepwise
//!
//! This module provides common helpers for integration tests:
//! - Canned oracle responses
//! - Session construction with mock collaborators
//! - Temporary data directories for CLI runs

pub mod fixtures;

pub use fixtures::*;
