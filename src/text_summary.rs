//! Text summary builder for CLI output.
//!
//! This module computes metrics and formats human-readable lines for text mode.

use crate::metrics;
use crate::model::{RunConfig, RunResult};

/// Number of (x, y) pairs shown in the preview.
const PREVIEW_LEN: usize = 5;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary for a completed run.
pub(crate) fn build_text_summary(cfg: &RunConfig, result: &RunResult) -> TextSummary {
    let mut lines = Vec::new();

    let threads = if cfg.multithreading {
        format!("{} threads", cfg.thread_count)
    } else {
        "single-threaded".to_string()
    };
    lines.push(format!(
        "Implementation: {} ({threads}, avx {})",
        cfg.implementation,
        if cfg.use_vectorization { "on" } else { "off" }
    ));
    lines.push(format!("Computation time: {:.6} s", result.elapsed_seconds));
    lines.push(format!("Points: {}", result.points.len()));

    let Some(values) = result.values.as_deref() else {
        return TextSummary { lines };
    };

    lines.push(format!("Values: {}", values.len()));
    if let Some((lo, hi)) = metrics::min_max(values) {
        lines.push(format!("Range: min {lo:.6} max {hi:.6}"));
    }
    if let Some(m) = metrics::compute_metrics(values) {
        lines.push(format!(
            "Values: avg {:.6} med {:.6} p25 {:.6} p75 {:.6}",
            m.mean, m.median, m.p25, m.p75
        ));
    }

    let preview: Vec<String> = result
        .points
        .iter()
        .zip(values)
        .take(PREVIEW_LEN)
        .map(|(x, y)| format!("({x:.3}, {y:.6})"))
        .collect();
    if !preview.is_empty() {
        let more = if values.len() > PREVIEW_LEN { " ..." } else { "" };
        lines.push(format!("Preview: {}{more}", preview.join(" ")));
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Implementation, SharedChannelConfig};
    use std::path::Path;

    fn cfg() -> RunConfig {
        let channel = SharedChannelConfig::in_dir(Path::new("/work"));
        let mut cfg = RunConfig::new(&channel, Implementation::Assembly, "c", "p");
        cfg.multithreading = true;
        cfg.thread_count = 8;
        cfg
    }

    #[test]
    fn time_only_summary() {
        let result = RunResult {
            elapsed_seconds: 0.1234,
            points: vec![0.0, 1.0],
            values: None,
        };
        let summary = build_text_summary(&cfg(), &result);
        assert_eq!(summary.lines[0], "Implementation: asm (8 threads, avx off)");
        assert_eq!(summary.lines[1], "Computation time: 0.123400 s");
        assert_eq!(summary.lines.len(), 3);
    }

    #[test]
    fn values_add_metrics_and_preview() {
        let result = RunResult {
            elapsed_seconds: 1.0,
            points: (0..10).map(f64::from).collect(),
            values: Some((0..10).map(|i| f64::from(i) * 2.0).collect()),
        };
        let summary = build_text_summary(&cfg(), &result);
        assert!(summary.lines.iter().any(|l| l == "Range: min 0.000000 max 18.000000"));
        let preview = summary.lines.last().unwrap();
        assert!(preview.starts_with("Preview: (0.000, 0.000000) (1.000, 2.000000)"));
        assert!(preview.ends_with(" ..."));
    }
}
