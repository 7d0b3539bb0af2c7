//! Configuration constants for the controller
//!
//! This module centralizes the tunable parameters and the fixed names shared with
//! the worker process.

use std::time::Duration;

// ============================================================================
// Signal Names
// ============================================================================

/// Named signal the worker waits on before reading the configuration file.
pub const START_SIGNAL_NAME: &str = "ComputeEvent";

/// Named signal the worker raises once the completion-time file is written.
pub const COMPLETION_SIGNAL_NAME: &str = "CompletionEvent";

/// Granularity of a bounded signal wait.
///
/// Named signals are polled with a non-blocking consume, so this is the worst-case
/// latency between the worker raising a signal and the controller observing it.
pub const SIGNAL_POLL_GRANULARITY: Duration = Duration::from_millis(5);

// ============================================================================
// Run Monitoring
// ============================================================================

/// Interval between progress-file reads while a single run is being monitored.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on how long any one run may take before it is declared timed out.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(600); // 10 minutes

/// Coarse interval used by the sweep driver while waiting for the time file.
pub const SWEEP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Recorded in place of a measurement when a sweep run times out or its time
/// file cannot be parsed.
pub const TIME_SENTINEL: f64 = -1.0;

// ============================================================================
// Shared Files
// ============================================================================

pub const DEFAULT_CONFIG_FILE: &str = "config.ini";

pub const DEFAULT_TEMP_DIR: &str = "temp";

pub const PROGRESS_FILE_NAME: &str = "progress.tmp";

pub const COMPLETION_TIME_FILE_NAME: &str = "computation.time";

pub const GENERATED_COEFFS_FILE_NAME: &str = "generated.coeffs";

pub const GENERATED_POINTS_FILE_NAME: &str = "generated.points";

pub const DEFAULT_SWEEP_OUTPUT: &str = "experiment_results.csv";

/// Directory name (under the runtime dir) used by the file signal backend.
pub const SIGNAL_DIR_NAME: &str = "compute-bench";
