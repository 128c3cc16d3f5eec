//! Provides API for the operator and related tooling.
#![warn(missing_docs)]

/// Labels module for managing resource labels.
#[cfg(feature = "controller")]
pub(crate) mod labels;
/// Locust module for managing distributed load tests.
pub mod locust;
/// Utils module for shared utility functions.
#[cfg(feature = "controller")]
pub mod utils;
