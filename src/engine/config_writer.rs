//! Serialization of a `RunConfig` into the worker's INI configuration file.
//!
//! The file is single-slot: every run overwrites it. It is written to a sibling
//! temp file, synced and renamed into place, so the worker can never observe a
//! half-written config once "start" has been raised.

use crate::error::ProtocolError;
use crate::model::{Implementation, RunConfig};
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const SECTION: &str = "Settings";

fn flag(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

/// Render the INI text handed to the worker.
pub fn render_config(cfg: &RunConfig) -> String {
    let output = cfg
        .output_path
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let entries: [(&str, String); 11] = [
        ("implementation", cfg.implementation.as_config_str().to_string()),
        ("multithreading", flag(cfg.multithreading).to_string()),
        ("threads_number", cfg.thread_count.to_string()),
        ("avx", flag(cfg.use_vectorization).to_string()),
        ("save_results", flag(cfg.save_results).to_string()),
        ("generate_chart", flag(cfg.generate_chart).to_string()),
        ("output_file", output),
        ("input_coeffs_file", cfg.coefficients_path.display().to_string()),
        ("input_points_file", cfg.points_path.display().to_string()),
        ("progress_file", cfg.progress_path.display().to_string()),
        (
            "computation_time_file",
            cfg.completion_time_path.display().to_string(),
        ),
    ];

    let mut out = format!("[{SECTION}]\n");
    for (key, value) in entries {
        let _ = writeln!(out, "{key} = {value}");
    }
    out.push('\n');
    out
}

/// Persist `cfg` at `path`. Returns only after the file is complete and closed.
pub fn write_config(path: &Path, cfg: &RunConfig) -> Result<(), ProtocolError> {
    let fail = |source: std::io::Error| ProtocolError::ConfigWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(fail)?;
    }

    let tmp = staging_path(path);
    {
        let mut file = fs::File::create(&tmp).map_err(fail)?;
        file.write_all(render_config(cfg).as_bytes()).map_err(fail)?;
        file.sync_all().map_err(fail)?;
    }
    fs::rename(&tmp, path).map_err(fail)?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "config.ini".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Parse the INI text the way the worker does.
///
/// Blank lines and `;`/`#` comments are skipped, keys inside a section are
/// qualified as `Section.key`, and an unparsable thread count falls back to 1.
pub fn parse_config(text: &str) -> Result<RunConfig> {
    let mut section = String::new();
    let mut map: HashMap<String, String> = HashMap::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].to_string();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let key = if section.is_empty() {
                key.to_string()
            } else {
                format!("{section}.{key}")
            };
            map.insert(key, value.trim().to_string());
        }
    }

    let get = |key: &str| setting(&map, key).to_string();
    let path = |key: &str| PathBuf::from(setting(&map, key));

    let implementation = Implementation::from_config_str(&get("implementation"))
        .ok_or_else(|| anyhow!("unknown implementation {:?}", get("implementation")))?;
    let output = get("output_file");

    Ok(RunConfig {
        implementation,
        multithreading: get("multithreading") == "1",
        thread_count: get("threads_number").parse().unwrap_or(1),
        use_vectorization: get("avx") == "1",
        save_results: get("save_results") == "1",
        generate_chart: get("generate_chart") == "1",
        output_path: (!output.is_empty()).then(|| PathBuf::from(&output)),
        coefficients_path: path("input_coeffs_file"),
        points_path: path("input_points_file"),
        progress_path: path("progress_file"),
        completion_time_path: path("computation_time_file"),
    })
}

fn setting<'a>(map: &'a HashMap<String, String>, key: &str) -> &'a str {
    map.get(&format!("{SECTION}.{key}"))
        .map(String::as_str)
        .unwrap_or("")
}

pub fn read_config(path: &Path) -> Result<RunConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_config(&text).with_context(|| format!("invalid config {}", path.display()))
}
