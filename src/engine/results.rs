//! Parsing of the files the worker leaves behind after a completed run.

use crate::error::ProtocolError;
use crate::model::{PointsSpec, RunConfig, RunResult};
use std::fs;
use std::io;
use std::path::Path;

/// Content of a completion-time file at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum TimingContent {
    /// Missing token; the worker may still be writing.
    Empty,
    Seconds(f64),
    Malformed,
}

pub(crate) fn parse_timing(text: &str) -> TimingContent {
    let mut tokens = text.split_whitespace();
    let Some(token) = tokens.next() else {
        return TimingContent::Empty;
    };
    if tokens.next().is_some() {
        return TimingContent::Malformed;
    }
    match token.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => TimingContent::Seconds(v),
        _ => TimingContent::Malformed,
    }
}

/// Read the elapsed seconds reported by the worker.
pub fn read_completion_time(path: &Path) -> Result<f64, ProtocolError> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ProtocolError::TimingDataMissing {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(ProtocolError::io(path, e)),
    };
    match parse_timing(&text) {
        TimingContent::Seconds(v) => Ok(v),
        TimingContent::Empty => Err(ProtocolError::TimingDataMissing {
            path: path.to_path_buf(),
        }),
        TimingContent::Malformed => Err(ProtocolError::MalformedTiming {
            path: path.to_path_buf(),
            content: text.trim().to_string(),
        }),
    }
}

/// Read a newline-delimited list of values. Any non-numeric line rejects the whole file.
pub fn read_values(path: &Path) -> Result<Vec<f64>, ProtocolError> {
    let malformed = |line: usize, reason: String| ProtocolError::MalformedResults {
        path: path.to_path_buf(),
        line,
        reason,
    };
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(malformed(0, "results file is missing".into()))
        }
        Err(e) => return Err(ProtocolError::io(path, e)),
    };

    let mut values = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let token = line.trim();
        let value = token
            .parse::<f64>()
            .map_err(|_| malformed(idx + 1, format!("not a number: {token:?}")))?;
        values.push(value);
    }
    if values.is_empty() {
        return Err(malformed(0, "results file is empty".into()));
    }
    Ok(values)
}

pub fn parse_points_spec(text: &str) -> Result<PointsSpec, String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return Err("points file is empty".into());
    }
    if tokens.len() != 3 {
        return Err(format!(
            "expected exactly three values (start end step), found {}",
            tokens.len()
        ));
    }
    let mut nums = [0.0f64; 3];
    for (slot, token) in nums.iter_mut().zip(&tokens) {
        *slot = token
            .parse()
            .map_err(|_| format!("not a number: {token:?}"))?;
    }
    let spec = PointsSpec {
        start: nums[0],
        end: nums[1],
        step: nums[2],
    };
    spec.validate()?;
    Ok(spec)
}

pub fn read_points_spec(path: &Path) -> Result<PointsSpec, ProtocolError> {
    let text = fs::read_to_string(path).map_err(|e| ProtocolError::io(path, e))?;
    parse_points_spec(&text).map_err(|reason| ProtocolError::MalformedPointsSpec {
        path: path.to_path_buf(),
        reason,
    })
}

/// Collect the outcome of a completed run.
///
/// Values are read only when the run saved results; the point sequence is
/// truncated to the number of values when the reconstruction overshoots.
pub fn read_result(cfg: &RunConfig) -> Result<RunResult, ProtocolError> {
    let elapsed_seconds = read_completion_time(&cfg.completion_time_path)?;

    let values = if cfg.save_results {
        let path = cfg
            .output_path
            .as_deref()
            .ok_or_else(|| ProtocolError::MalformedResults {
                path: Default::default(),
                line: 0,
                reason: "results were requested but no output file was configured".into(),
            })?;
        Some(read_values(path)?)
    } else {
        None
    };

    let spec = read_points_spec(&cfg.points_path)?;
    let mut points = spec.points();
    if let Some(values) = values.as_ref() {
        if points.len() > values.len() {
            points.truncate(values.len());
        }
    }

    Ok(RunResult {
        elapsed_seconds,
        points,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Implementation, SharedChannelConfig};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        cfg: RunConfig,
    }

    fn fixture(points: &str, time: Option<&str>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let channel = SharedChannelConfig::in_dir(dir.path());
        fs::create_dir_all(&channel.temp_dir).unwrap();
        let points_path = dir.path().join("range.points");
        fs::write(&points_path, points).unwrap();
        if let Some(t) = time {
            fs::write(&channel.completion_time_file, t).unwrap();
        }
        let cfg = RunConfig::new(
            &channel,
            Implementation::NativeCompiled,
            dir.path().join("poly.coeffs"),
            points_path,
        );
        Fixture { _dir: dir, cfg }
    }

    #[test]
    fn reads_time_and_points_without_values() {
        let fx = fixture("0 1 0.25\n", Some("0.1234\n"));
        let result = read_result(&fx.cfg).unwrap();
        assert_eq!(result.elapsed_seconds, 0.1234);
        assert_eq!(result.points, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(result.values, None);
    }

    #[test]
    fn empty_time_file_is_missing_timing_data() {
        let fx = fixture("0 1 0.5", Some(""));
        let err = read_result(&fx.cfg).unwrap_err();
        assert!(matches!(err, ProtocolError::TimingDataMissing { .. }), "{err}");
    }

    #[test]
    fn absent_time_file_is_missing_timing_data() {
        let fx = fixture("0 1 0.5", None);
        let err = read_result(&fx.cfg).unwrap_err();
        assert!(matches!(err, ProtocolError::TimingDataMissing { .. }), "{err}");
    }

    #[test]
    fn garbage_time_is_malformed() {
        let fx = fixture("0 1 0.5", Some("fast"));
        let err = read_result(&fx.cfg).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedTiming { .. }), "{err}");
    }

    #[test]
    fn values_truncate_excess_points() {
        let mut fx = fixture("0 10 1", Some("2.5"));
        let out = fx.cfg.points_path.with_file_name("values.out");
        fs::write(&out, "1\n2\n3\n").unwrap();
        fx.cfg.save_results = true;
        fx.cfg.output_path = Some(out);

        let result = read_result(&fx.cfg).unwrap();
        assert_eq!(result.values, Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(result.points, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn non_numeric_result_line_rejects_the_whole_file() {
        let mut fx = fixture("0 10 1", Some("2.5"));
        let out = fx.cfg.points_path.with_file_name("values.out");
        fs::write(&out, "1\n2\noops\n4\n").unwrap();
        fx.cfg.save_results = true;
        fx.cfg.output_path = Some(out);

        match read_result(&fx.cfg).unwrap_err() {
            ProtocolError::MalformedResults { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_results_file_is_malformed_results() {
        let mut fx = fixture("0 10 1", Some("2.5"));
        fx.cfg.save_results = true;
        fx.cfg.output_path = Some(fx.cfg.points_path.with_file_name("nope.out"));
        let err = read_result(&fx.cfg).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedResults { .. }), "{err}");
    }

    #[test]
    fn points_spec_must_have_three_tokens_and_positive_step() {
        assert!(parse_points_spec("").is_err());
        assert!(parse_points_spec("0 1").is_err());
        assert!(parse_points_spec("0 1 0.1 7").is_err());
        assert!(parse_points_spec("0 1 0").is_err());
        assert!(parse_points_spec("0 1 -0.5").is_err());
        assert!(parse_points_spec("2 1 0.5").is_err());
        assert!(parse_points_spec("a 1 0.5").is_err());
        assert_eq!(
            parse_points_spec("-100 100 0.001\n").unwrap(),
            PointsSpec {
                start: -100.0,
                end: 100.0,
                step: 0.001
            }
        );

        let fx = fixture("0 1", Some("1.0"));
        let err = read_result(&fx.cfg).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPointsSpec { .. }), "{err}");
    }

    #[test]
    fn reconstructed_points_match_expected_length() {
        let cases = [
            (0.0, 1.0, 0.1),
            (-100.0, 100.0, 0.5),
            (-1.0, 1.0, 0.3),
            (5.0, 5.0, 1.0),
            (0.0, 10.0, 3.0),
            (-3.5, 2.25, 0.125),
        ];
        for (start, end, step) in cases {
            let spec = PointsSpec { start, end, step };
            let points = spec.points();
            assert!(!points.is_empty());
            assert_eq!(points[0], start);
            for pair in points.windows(2) {
                assert!(pair[1] > pair[0]);
                assert!((pair[1] - pair[0] - step).abs() < 1e-9);
            }
            let expected = ((end - start) / step).floor() as i64 + 1;
            let diff = (points.len() as i64 - expected).abs();
            assert!(diff <= 1, "{start} {end} {step}: {} vs {expected}", points.len());
        }
    }

    #[test]
    fn timing_tokens() {
        assert_eq!(parse_timing(""), TimingContent::Empty);
        assert_eq!(parse_timing("  \n"), TimingContent::Empty);
        assert_eq!(parse_timing("0.5\n"), TimingContent::Seconds(0.5));
        assert_eq!(parse_timing("0.5 0.6"), TimingContent::Malformed);
        assert_eq!(parse_timing("-1"), TimingContent::Malformed);
        assert_eq!(parse_timing("abc"), TimingContent::Malformed);
    }
}
