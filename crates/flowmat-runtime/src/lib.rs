//! Workflow composition and execution
//!
//! This crate provides the `Workflow` graph container: registering
//! processes, wiring their ports with one-shot relays, mapping and exposing
//! workflow-level ports, and the run protocol that starts every process,
//! delivers staged inputs and collects outputs.

mod config;
mod connection;
mod executor;
mod workflow;

pub use config::RunConfig;
pub use connection::{Connection, Endpoint};
pub use workflow::Workflow;
