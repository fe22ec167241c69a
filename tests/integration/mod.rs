//! Integration tests for Stepwise
//!
//! These tests verify that multiple components work together correctly.

#[path = "../common/mod.rs"]
pub mod common;

pub mod cli;
pub mod decoder_properties;
pub mod pipeline_flow;
