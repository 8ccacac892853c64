//! Renderforged - render and encode pipeline supervisor
//!
//! This library crate exposes the job state machine, the artifact scanner,
//! telemetry sinks and the batch runner used by the `renderforged` binary.

pub mod config;
pub mod job;
pub mod order;
pub mod runner;
pub mod scanner;
pub mod telemetry;
