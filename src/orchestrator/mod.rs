//! Application-level orchestration utilities.
//!
//! This module owns run lifecycle control (start/cancel) and post-run processing
//! such as summaries and exports. CLI layers call into this module to keep
//! responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::{run_controller, UiCommand};
pub(crate) use post_process::{process_run_completion, utc_timestamp};
