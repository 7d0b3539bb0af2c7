//! Per-configuration aggregate of a sweep's records.

use crate::metrics::{compute_metrics, Metrics};
use crate::model::{Implementation, SweepRecord};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSummary {
    pub scenario: String,
    pub implementation: Implementation,
    pub avx: bool,
    pub threads: u32,
    pub successful: usize,
    pub failed: usize,
    /// Over successful runs only.
    pub seconds: Option<Metrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub generated_at: String,
    pub attempts: u64,
    pub configs: Vec<ConfigSummary>,
}

/// Running per-configuration aggregate, fed one record at a time while the sweep
/// progresses. Only the successful timings are retained.
#[derive(Debug, Default)]
pub struct SummaryBuilder {
    scenario_order: Vec<String>,
    groups: BTreeMap<(usize, Implementation, bool, u32), Group>,
    attempts: u64,
    failed: u64,
}

#[derive(Debug, Default)]
struct Group {
    ok: Vec<f64>,
    failed: usize,
}

impl SummaryBuilder {
    pub fn add(&mut self, r: &SweepRecord) {
        let idx = match self.scenario_order.iter().position(|s| *s == r.scenario) {
            Some(i) => i,
            None => {
                self.scenario_order.push(r.scenario.clone());
                self.scenario_order.len() - 1
            }
        };
        let group = self
            .groups
            .entry((idx, r.implementation, r.use_vectorization, r.thread_count))
            .or_default();
        match r.elapsed_seconds {
            Some(secs) => group.ok.push(secs),
            None => {
                group.failed += 1;
                self.failed += 1;
            }
        }
        self.attempts += 1;
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Attempts recorded with the sentinel.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Groups ordered by first-seen scenario, then implementation, avx and threads.
    pub fn finish(self) -> Vec<ConfigSummary> {
        let scenario_order = self.scenario_order;
        self.groups
            .into_iter()
            .map(|((idx, implementation, avx, threads), group)| ConfigSummary {
                scenario: scenario_order[idx].clone(),
                implementation,
                avx,
                threads,
                successful: group.ok.len(),
                failed: group.failed,
                seconds: compute_metrics(&group.ok),
            })
            .collect()
    }
}

/// Group records by (scenario, implementation, avx, threads), keeping first-seen scenario order.
pub fn summarize(records: &[SweepRecord]) -> Vec<ConfigSummary> {
    let mut builder = SummaryBuilder::default();
    for r in records {
        builder.add(r);
    }
    builder.finish()
}

pub fn summary_lines(configs: &[ConfigSummary]) -> Vec<String> {
    configs
        .iter()
        .map(|c| {
            let stats = match &c.seconds {
                Some(m) => format!(
                    "avg {:.6} med {:.6} p25 {:.6} p75 {:.6} s",
                    m.mean, m.median, m.p25, m.p75
                ),
                None => "no successful runs".to_string(),
            };
            format!(
                "{} impl={} avx={} threads={}: ok {} failed {} | {stats}",
                c.scenario, c.implementation, c.avx, c.threads, c.successful, c.failed
            )
        })
        .collect()
}

pub fn write_summary_json(path: &Path, summary: &SweepSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}
