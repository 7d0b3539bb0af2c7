//! Append-only CSV output of a sweep, one row per attempted run.

use crate::model::SweepRecord;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub const HEADER: [&str; 6] = [
    "scenario",
    "implementation",
    "avx",
    "threads",
    "run_number",
    "time_seconds",
];

#[derive(Serialize)]
struct Row<'a> {
    scenario: &'a str,
    implementation: &'static str,
    avx: bool,
    threads: u32,
    run_number: u32,
    time_seconds: String,
}

impl<'a> From<&'a SweepRecord> for Row<'a> {
    fn from(r: &'a SweepRecord) -> Self {
        Row {
            scenario: &r.scenario,
            implementation: r.implementation.as_config_str(),
            avx: r.use_vectorization,
            threads: r.thread_count,
            run_number: r.run_index,
            time_seconds: r.time_field(),
        }
    }
}

/// Writes the header once, then flushes every appended row so an interrupted sweep
/// still leaves usable data behind.
pub struct ResultSink<W: Write> {
    writer: csv::Writer<W>,
    rows: u64,
}

impl ResultSink<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create sweep output {}", path.display()))?;
        ResultSink::new(file)
    }
}

impl<W: Write> ResultSink<W> {
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        writer.write_record(HEADER)?;
        writer.flush()?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn append(&mut self, record: &SweepRecord) -> Result<()> {
        self.writer.serialize(Row::from(record))?;
        self.writer.flush().context("failed to flush sweep output")?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to finish sweep output: {}", e.error()))
    }
}
