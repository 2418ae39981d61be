//! Common test utilities for integration tests.
//!
//! This module provides document builders and range helpers shared across
//! integration test files.

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod documents;

// Re-export commonly used items
pub use documents::{at, build_document, line, span, write_locked, DocumentFixture};
