use crate::config;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Which kernel the worker should run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum Implementation {
    #[serde(rename = "cpp")]
    #[value(name = "cpp")]
    NativeCompiled,
    #[serde(rename = "asm")]
    #[value(name = "asm")]
    Assembly,
}

impl Implementation {
    pub const ALL: [Implementation; 2] = [Implementation::NativeCompiled, Implementation::Assembly];

    /// Token used in the configuration file and the sweep output.
    pub fn as_config_str(self) -> &'static str {
        match self {
            Implementation::NativeCompiled => "cpp",
            Implementation::Assembly => "asm",
        }
    }

    pub fn from_config_str(s: &str) -> Option<Self> {
        match s.trim() {
            "cpp" => Some(Implementation::NativeCompiled),
            "asm" => Some(Implementation::Assembly),
            _ => None,
        }
    }
}

impl fmt::Display for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_config_str())
    }
}

/// Paths and signal names that make up the ad hoc IPC channel with the worker.
///
/// Every component receives one of these instead of reading global paths, so tests
/// can point a whole protocol stack at a throwaway directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedChannelConfig {
    pub config_file: PathBuf,
    pub temp_dir: PathBuf,
    pub progress_file: PathBuf,
    pub completion_time_file: PathBuf,
    pub start_signal: String,
    pub completion_signal: String,
}

impl SharedChannelConfig {
    /// Lay out the shared files inside `temp_dir`; the config file lives wherever the
    /// worker expects it.
    pub fn new(config_file: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        let temp_dir = temp_dir.into();
        Self {
            config_file: config_file.into(),
            progress_file: temp_dir.join(config::PROGRESS_FILE_NAME),
            completion_time_file: temp_dir.join(config::COMPLETION_TIME_FILE_NAME),
            temp_dir,
            start_signal: config::START_SIGNAL_NAME.to_string(),
            completion_signal: config::COMPLETION_SIGNAL_NAME.to_string(),
        }
    }

    /// Default layout rooted at `root` (`root/config.ini`, `root/temp/...`).
    pub fn in_dir(root: &Path) -> Self {
        Self::new(
            root.join(config::DEFAULT_CONFIG_FILE),
            root.join(config::DEFAULT_TEMP_DIR),
        )
    }

    pub fn with_signal_names(mut self, start: impl Into<String>, completion: impl Into<String>) -> Self {
        self.start_signal = start.into();
        self.completion_signal = completion.into();
        self
    }

    pub fn generated_coefficients_file(&self) -> PathBuf {
        self.temp_dir.join(config::GENERATED_COEFFS_FILE_NAME)
    }

    pub fn generated_points_file(&self) -> PathBuf {
        self.temp_dir.join(config::GENERATED_POINTS_FILE_NAME)
    }
}

/// Parameters of one worker run. Written once, then owned by the worker via the
/// shared config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub implementation: Implementation,
    pub multithreading: bool,
    pub thread_count: u32,
    pub use_vectorization: bool,
    pub save_results: bool,
    pub generate_chart: bool,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    pub coefficients_path: PathBuf,
    pub points_path: PathBuf,
    pub progress_path: PathBuf,
    pub completion_time_path: PathBuf,
}

impl RunConfig {
    /// Single-threaded, no flags, progress and timing routed through `channel`.
    pub fn new(
        channel: &SharedChannelConfig,
        implementation: Implementation,
        coefficients_path: impl Into<PathBuf>,
        points_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            implementation,
            multithreading: false,
            thread_count: 1,
            use_vectorization: false,
            save_results: false,
            generate_chart: false,
            output_path: None,
            coefficients_path: coefficients_path.into(),
            points_path: points_path.into(),
            progress_path: channel.progress_file.clone(),
            completion_time_path: channel.completion_time_file.clone(),
        }
    }
}

/// Lifecycle of a single monitored run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Armed,
    Polling,
    Completed,
    TimedOut,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::TimedOut | RunState::Cancelled | RunState::Failed
        )
    }
}

/// Output of a completed run, consumed once by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub elapsed_seconds: f64,
    /// Evaluation points reconstructed from the points spec, truncated to `values`.
    pub points: Vec<f64>,
    /// Present only when the run was configured to save results.
    pub values: Option<Vec<f64>>,
}

/// Events emitted by the run engine and controller, consumed by presentation layers.
#[derive(Debug, Clone)]
pub enum RunEvent {
    StateChanged {
        state: RunState,
    },
    Progress {
        percent: u8,
    },
    Info(String),
    RunCompleted {
        // Boxed: the values vector can be large.
        result: Box<RunResult>,
    },
    /// Terminal state other than `Completed`, with a human-readable reason.
    RunEnded {
        state: RunState,
        message: String,
    },
}

/// One row of the sweep output. Exactly one exists per attempted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRecord {
    pub scenario: String,
    pub implementation: Implementation,
    pub use_vectorization: bool,
    pub thread_count: u32,
    pub run_index: u32,
    /// `None` when the run timed out or its time file was unreadable.
    pub elapsed_seconds: Option<f64>,
}

impl SweepRecord {
    /// Measured time, or the sentinel for a failed attempt.
    pub fn time_seconds(&self) -> f64 {
        self.elapsed_seconds.unwrap_or(config::TIME_SENTINEL)
    }

    /// `time_seconds` as written to the output (`-1` for the sentinel).
    pub fn time_field(&self) -> String {
        self.time_seconds().to_string()
    }
}

/// Events emitted by the sweep driver.
#[derive(Debug, Clone)]
pub enum SweepEvent {
    ScenarioStarted {
        name: String,
        index: usize,
        count: usize,
    },
    RunRecorded {
        record: SweepRecord,
        done: u64,
        total: u64,
    },
    Info(String),
}

/// Sweep-wide completion percentage.
pub fn sweep_percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64) * 100.0
}

/// `start end step` description of the evaluation points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointsSpec {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl PointsSpec {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.start.is_finite() && self.end.is_finite() && self.step.is_finite()) {
            return Err("start, end and step must be finite".into());
        }
        if self.step <= 0.0 {
            return Err(format!("step must be positive, got {}", self.step));
        }
        if self.start > self.end {
            return Err(format!(
                "start ({}) is greater than end ({})",
                self.start, self.end
            ));
        }
        Ok(())
    }

    /// Points generated by repeated addition of `step` while `current <= end`.
    ///
    /// The accumulation drifts exactly like the worker's own generator, which keeps
    /// the point count aligned with the number of values it writes.
    pub fn points(&self) -> Vec<f64> {
        if self.validate().is_err() {
            return Vec::new();
        }
        let estimate = ((self.end - self.start) / self.step) as usize + 1;
        let mut out = Vec::with_capacity(estimate.min(1 << 24));
        let mut current = self.start;
        while current <= self.end {
            out.push(current);
            let next = current + self.step;
            if next == current {
                break;
            }
            current = next;
        }
        out
    }

    /// Single-line file representation.
    pub fn to_line(&self) -> String {
        format!("{} {} {}", self.start, self.end, self.step)
    }
}
