//! Benchmark sweep: one bounded run per leaf of the plan, one output row per attempt.

pub mod plan;
pub mod sink;
pub mod summary;

use crate::engine::results::{parse_timing, TimingContent};
use crate::engine::signal::{self, SignalChannel, SignalId};
use crate::engine::{config_writer, remove_stale};
use crate::error::ProtocolError;
use crate::inputs;
use crate::model::{RunConfig, SharedChannelConfig, SweepEvent, SweepRecord};
use anyhow::{Context, Result};
use plan::SweepLeaf;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use plan::{ScenarioSpec, SweepPlan, ThreadRange};
pub use sink::ResultSink;
use summary::{ConfigSummary, SummaryBuilder};

/// What a sweep left behind. The rows themselves live in the sink.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    /// Rows written, one per attempted run.
    pub attempted: u64,
    /// Rows written with the sentinel.
    pub failed: u64,
    pub configs: Vec<ConfigSummary>,
    /// Stopped early on request; the counts cover the attempts made so far.
    pub cancelled: bool,
}

/// Input files shared by every leaf; rewritten when the scenario changes.
struct ScenarioInputs {
    coefficients: PathBuf,
    points: PathBuf,
}

pub struct SweepDriver {
    channel: SharedChannelConfig,
    signals: SignalChannel,
    plan: SweepPlan,
}

impl SweepDriver {
    pub fn new(channel: SharedChannelConfig, signals: SignalChannel, plan: SweepPlan) -> Self {
        Self {
            channel,
            signals,
            plan,
        }
    }

    pub fn plan(&self) -> &SweepPlan {
        &self.plan
    }

    /// Drive every leaf sequentially, appending exactly one record per attempt.
    ///
    /// Per-run failures become sentinel rows; only input generation and sink writes
    /// abort the sweep.
    pub async fn run<W: Write>(
        &self,
        sink: &mut ResultSink<W>,
        event_tx: &UnboundedSender<SweepEvent>,
        cancel: Arc<AtomicBool>,
    ) -> Result<SweepOutcome> {
        self.plan.validate()?;
        fs::create_dir_all(&self.channel.temp_dir).with_context(|| {
            format!("failed to create temp dir {}", self.channel.temp_dir.display())
        })?;

        let total = self.plan.total_attempts();
        let mut done: u64 = 0;
        let mut summary = SummaryBuilder::default();
        let files = ScenarioInputs {
            coefficients: self.channel.generated_coefficients_file(),
            points: self.channel.generated_points_file(),
        };
        let mut prepared: Option<usize> = None;

        info!("starting sweep of {} runs", total);
        for leaf in self.plan.leaves() {
            if cancel.load(Ordering::Relaxed) {
                break;
            }

            if prepared != Some(leaf.scenario) {
                let spec = &self.plan.scenarios[leaf.scenario];
                let _ = event_tx.send(SweepEvent::ScenarioStarted {
                    name: spec.name.clone(),
                    index: leaf.scenario,
                    count: self.plan.scenarios.len(),
                });
                self.prepare_scenario(spec, &files)?;
                prepared = Some(leaf.scenario);
            }

            let attempt = self.attempt(&leaf, &files, &cancel).await;
            let cancelled = matches!(attempt, Err(ref e) if e.is_cancellation());
            let elapsed_seconds = match attempt {
                Ok(secs) => Some(secs),
                Err(e) => {
                    warn!(
                        "run {} of {} recorded as failed: {}",
                        done + 1,
                        total,
                        e
                    );
                    None
                }
            };

            let record = SweepRecord {
                scenario: self.plan.scenarios[leaf.scenario].name.clone(),
                implementation: leaf.implementation,
                use_vectorization: leaf.use_vectorization,
                thread_count: leaf.thread_count,
                run_index: leaf.run_index,
                elapsed_seconds,
            };
            sink.append(&record)?;
            done += 1;
            let _ = event_tx.send(SweepEvent::RunRecorded {
                record: record.clone(),
                done,
                total,
            });
            summary.add(&record);

            if cancelled {
                let _ = event_tx.send(SweepEvent::Info("Sweep cancelled".into()));
                break;
            }
        }

        let cancelled = done < total;
        info!("sweep finished: {}/{} runs recorded", done, total);
        Ok(SweepOutcome {
            attempted: summary.attempts(),
            failed: summary.failed(),
            configs: summary.finish(),
            cancelled,
        })
    }

    /// Regenerate the coefficients and points files for `spec`.
    fn prepare_scenario(&self, spec: &ScenarioSpec, files: &ScenarioInputs) -> Result<()> {
        let values = inputs::generate_coefficients(&spec.coefficients)
            .with_context(|| format!("scenario {}", spec.name))?;
        inputs::write_coefficients(&files.coefficients, &values)?;
        inputs::write_points_spec(&files.points, &spec.points)?;
        debug!("generated inputs for {}", spec.name);
        Ok(())
    }

    /// One armed run: fresh config, drained completion, "start", then wait for the
    /// completion-time file.
    async fn attempt(
        &self,
        leaf: &SweepLeaf,
        files: &ScenarioInputs,
        cancel: &AtomicBool,
    ) -> Result<f64, ProtocolError> {
        let time_path = &self.channel.completion_time_file;
        remove_stale(time_path)?;

        let mut cfg = RunConfig::new(
            &self.channel,
            leaf.implementation,
            &files.coefficients,
            &files.points,
        );
        cfg.multithreading = true;
        cfg.thread_count = leaf.thread_count;
        cfg.use_vectorization = leaf.use_vectorization;
        config_writer::write_config(&self.channel.config_file, &cfg)?;

        // Nothing waits on completion in a sweep, so clear the raises left by
        // earlier leaves before arming this one.
        let completion = self.signals.open(SignalId::Completion)?;
        signal::drain(completion.as_ref())?;
        self.signals.raise(SignalId::Start)?;

        let started = Instant::now();
        let deadline = started + self.plan.run_timeout;
        loop {
            match fs::read_to_string(time_path) {
                Ok(text) => match parse_timing(&text) {
                    TimingContent::Seconds(v) => return Ok(v),
                    TimingContent::Malformed => {
                        return Err(ProtocolError::MalformedTiming {
                            path: time_path.clone(),
                            content: text.trim().to_string(),
                        })
                    }
                    TimingContent::Empty => {}
                },
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(ProtocolError::io(time_path, e)),
            }

            if cancel.load(Ordering::Relaxed) {
                return Err(ProtocolError::RunCancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ProtocolError::RunTimedOut {
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.plan.poll_interval.min(deadline - now)).await;
        }
    }
}

/// `[done/total] scenario=... impl=... avx=... threads=... run=... time=...`
pub fn progress_line(record: &SweepRecord, done: u64, total: u64) -> String {
    format!(
        "[{done}/{total}] scenario={} impl={} avx={} threads={} run={} time={}",
        record.scenario,
        record.implementation,
        record.use_vectorization,
        record.thread_count,
        record.run_index,
        record.time_field()
    )
}
