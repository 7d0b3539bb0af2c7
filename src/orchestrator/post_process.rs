//! Post-run processing utilities.
//!
//! Builds the text summary and handles exports after a run completes.

use crate::model::{RunConfig, RunResult};
use crate::text_summary::build_text_summary;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub summary: Vec<String>,
    /// Warnings and export status lines, routed to stderr.
    pub messages: Vec<String>,
}

#[derive(Serialize)]
struct ExportedRun<'a> {
    timestamp_utc: String,
    config: &'a RunConfig,
    result: &'a RunResult,
}

pub(crate) fn utc_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

/// Write `{timestamp_utc, config, result}` as pretty JSON.
pub(crate) fn export_json(path: &Path, cfg: &RunConfig, result: &RunResult) -> Result<()> {
    let doc = ExportedRun {
        timestamp_utc: utc_timestamp(),
        config: cfg,
        result,
    };
    let json = serde_json::to_string_pretty(&doc)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

/// Process a completed run: summary lines, chart warning and JSON export.
pub(crate) fn process_run_completion(
    cfg: &RunConfig,
    run: &RunResult,
    export_path: Option<&Path>,
) -> ProcessedRun {
    let summary = build_text_summary(cfg, run).lines;

    let mut messages = Vec::new();
    if cfg.generate_chart && run.values.is_none() {
        messages.push("Chart requested but results were not saved; nothing to plot".to_string());
    }
    if let Some(path) = export_path {
        match export_json(path, cfg, run) {
            Ok(_) => messages.push(format!("Exported JSON: {}", path.display())),
            Err(e) => messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    ProcessedRun { summary, messages }
}
