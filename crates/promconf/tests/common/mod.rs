//! Shared utilities for promconf integration tests.
//!
//! - `TestHarness`: temporary config tree, engine wiring and a recording reloader
//! - Builders and fixtures for annotated resources

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
