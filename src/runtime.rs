//! Runtime glue: configuration, the external collaborator traits, telemetry,
//! and runner orchestration.

pub mod config;
pub mod protocol;
pub mod runner;
pub mod telemetry;
