pub mod config;

/// Common utilities shared across the daily-market workspace
///
/// This crate provides functionality used by both the library crate and the
/// scheduler binary:
///
/// - Configuration file loading
/// - Shared test utilities (database pools, unique id generation)

// Test helpers module - available for both development and test builds
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

#[cfg(any(test, feature = "test-helpers"))]
pub use test_helpers::{generate_unique_id, memory_pool};
