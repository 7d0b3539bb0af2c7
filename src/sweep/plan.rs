use crate::config::{DEFAULT_RUN_TIMEOUT, SWEEP_POLL_INTERVAL};
use crate::inputs::CoefficientSpec;
use crate::model::{Implementation, PointsSpec};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// One family of inputs; the driver regenerates both input files per scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub name: String,
    pub coefficients: CoefficientSpec,
    pub points: PointsSpec,
}

/// Inclusive thread-count range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRange {
    pub min: u32,
    pub max: u32,
}

impl ThreadRange {
    pub fn len(&self) -> u64 {
        if self.max < self.min {
            0
        } else {
            u64::from(self.max - self.min) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The sweep space: scenarios × implementations × vectorization × threads × repetitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    pub scenarios: Vec<ScenarioSpec>,
    pub implementations: Vec<Implementation>,
    pub vectorization: Vec<bool>,
    pub threads: ThreadRange,
    pub repetitions: u32,
    #[serde(with = "humantime_serde", default = "default_run_timeout")]
    pub run_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_run_timeout() -> Duration {
    DEFAULT_RUN_TIMEOUT
}

fn default_poll_interval() -> Duration {
    SWEEP_POLL_INTERVAL
}

impl Default for SweepPlan {
    /// Five polynomial sizes over `[-100, 100]` step 0.001, both kernels, AVX off/on,
    /// 1..=16 threads, five repetitions each.
    fn default() -> Self {
        let scenarios = [10, 100, 1_000, 10_000, 100_000]
            .into_iter()
            .enumerate()
            .map(|(i, count)| ScenarioSpec {
                name: format!("Scenario{}", i + 1),
                coefficients: CoefficientSpec {
                    count,
                    min: -1.0,
                    max: 1.0,
                    seed: None,
                },
                points: PointsSpec {
                    start: -100.0,
                    end: 100.0,
                    step: 0.001,
                },
            })
            .collect();
        Self {
            scenarios,
            implementations: Implementation::ALL.to_vec(),
            vectorization: vec![false, true],
            threads: ThreadRange { min: 1, max: 16 },
            repetitions: 5,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            poll_interval: SWEEP_POLL_INTERVAL,
        }
    }
}

/// One attempted run in the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SweepLeaf {
    pub scenario: usize,
    pub implementation: Implementation,
    pub use_vectorization: bool,
    pub thread_count: u32,
    /// Numbered from 1.
    pub run_index: u32,
}

impl SweepPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sweep plan {}", path.display()))?;
        let plan: SweepPlan = serde_json::from_str(&text)
            .with_context(|| format!("invalid sweep plan {}", path.display()))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scenarios.is_empty() {
            bail!("sweep plan has no scenarios");
        }
        if self.implementations.is_empty() || self.vectorization.is_empty() {
            bail!("sweep plan needs at least one implementation and one vectorization flag");
        }
        if self.threads.min == 0 || self.threads.is_empty() {
            bail!(
                "thread range {}..={} must be non-empty and start at 1 or more",
                self.threads.min,
                self.threads.max
            );
        }
        if self.repetitions == 0 {
            bail!("repetitions must be at least 1");
        }
        // Row keys are (scenario, implementation, avx, threads, run), so every axis
        // must list each value once.
        let mut names = HashSet::new();
        for s in &self.scenarios {
            if !names.insert(s.name.as_str()) {
                bail!("duplicate scenario name {:?}", s.name);
            }
        }
        let mut impls = HashSet::new();
        if let Some(i) = self.implementations.iter().find(|i| !impls.insert(**i)) {
            bail!("implementation {} is listed more than once", i);
        }
        let mut flags = HashSet::new();
        if let Some(f) = self.vectorization.iter().find(|f| !flags.insert(**f)) {
            bail!("vectorization flag {} is listed more than once", f);
        }
        for s in &self.scenarios {
            s.coefficients
                .validate()
                .with_context(|| format!("scenario {}", s.name))?;
            s.points
                .validate()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("scenario {}", s.name))?;
        }
        Ok(())
    }

    /// Number of rows a completed sweep produces.
    pub fn total_attempts(&self) -> u64 {
        self.scenarios.len() as u64
            * self.implementations.len() as u64
            * self.vectorization.len() as u64
            * self.threads.len()
            * u64::from(self.repetitions)
    }

    /// Every leaf in nesting order: scenario → implementation → flag → threads → repetition.
    pub fn leaves(&self) -> impl Iterator<Item = SweepLeaf> + '_ {
        (0..self.scenarios.len()).flat_map(move |scenario| {
            self.implementations.iter().flat_map(move |&implementation| {
                self.vectorization.iter().flat_map(move |&use_vectorization| {
                    (self.threads.min..=self.threads.max).flat_map(move |thread_count| {
                        (1..=self.repetitions).map(move |run_index| SweepLeaf {
                            scenario,
                            implementation,
                            use_vectorization,
                            thread_count,
                            run_index,
                        })
                    })
                })
            })
        })
    }

    /// Human-readable description of the plan.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![format!("Sweep of {} scenario(s):", self.scenarios.len())];
        for s in &self.scenarios {
            lines.push(format!(
                "  {}: coefficients n={} in [{}, {}], points {}..{} step {}",
                s.name,
                s.coefficients.count,
                s.coefficients.min,
                s.coefficients.max,
                s.points.start,
                s.points.end,
                s.points.step
            ));
        }
        let impls: Vec<&str> = self.implementations.iter().map(|i| i.as_config_str()).collect();
        lines.push(format!("Implementations: {}", impls.join(", ")));
        lines.push(format!("AVX: {:?}", self.vectorization));
        lines.push(format!("Threads: {}..={}", self.threads.min, self.threads.max));
        lines.push(format!("Repetitions per configuration: {}", self.repetitions));
        lines.push(format!(
            "Per-run timeout: {}",
            humantime::format_duration(self.run_timeout)
        ));
        lines.push(format!("Total runs: {}", self.total_attempts()));
        lines
    }
}
