//! Controller side of a file-and-signal protocol with an external compute worker.
//!
//! The worker reads an INI config, waits on a named "start" signal, reports progress
//! through a file, writes its computation time, and raises a named "completion"
//! signal. This crate arms single monitored runs and drives benchmark sweeps.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod inputs;
pub mod metrics;
pub mod model;
mod orchestrator;
pub mod sweep;
mod text_summary;
