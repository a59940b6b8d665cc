//! Shared utilities for the flowloom engine.
//!
//! - [`collections`]: constructors and aliases for the hash maps used
//!   throughout the crate.
//! - [`value`]: typed access and coercion over `serde_json::Value`.
//! - [`testing`]: fixtures (plugins, providers, log records) shared by
//!   unit and integration tests.

pub mod collections;
pub mod testing;
pub mod value;
