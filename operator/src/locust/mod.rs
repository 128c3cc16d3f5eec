//! Place all Locust related logic under this module.
mod spec;

pub use spec::*;

#[cfg(feature = "controller")]
pub mod children;
#[cfg(feature = "controller")]
pub mod conditions;
/// Operator entry point.
#[cfg(feature = "controller")]
pub mod controller;
/// Deployment manifests of the controller and workers.
#[cfg(feature = "controller")]
pub mod deployment;
#[cfg(feature = "controller")]
pub mod drift;
/// Errors of the event handlers.
#[cfg(feature = "controller")]
pub mod error;
#[cfg(feature = "controller")]
pub mod events;
#[cfg(feature = "controller")]
pub mod orphan;
#[cfg(feature = "controller")]
pub mod owner;
#[cfg(feature = "controller")]
pub mod reconcile;
/// Service exposing the Locust controller.
#[cfg(feature = "controller")]
pub mod service;
#[cfg(feature = "controller")]
pub mod stats;
#[cfg(feature = "controller")]
pub mod utils;
#[cfg(feature = "controller")]
pub mod watch;

#[cfg(test)]
pub mod stub;
