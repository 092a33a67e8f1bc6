//! Test Helper Utilities
//!
//! Shared utilities for testing anirank

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_source;

pub use fixtures::{configured_params, observation, source_set, store_with};
pub use mock_source::{Call, MockSource, Scripted};
