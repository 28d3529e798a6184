//! Shared test utilities for fallwatch integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated execution with temp directories and a fresh database
//! - Scripted `/bin/sh` inference stubs and a gated in-process runner

pub mod harness;
pub mod runners;

pub use harness::TestHarness;
pub use runners::{parsed, GatedRunner};
