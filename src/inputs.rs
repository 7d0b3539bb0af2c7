//! Generation of the worker's input files (coefficients and points spec).

use crate::model::PointsSpec;
use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// How to draw polynomial coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoefficientSpec {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    /// Fixed seed for reproducible inputs; fresh entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl CoefficientSpec {
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            bail!("coefficient count must be at least 1");
        }
        if !(self.min.is_finite() && self.max.is_finite()) {
            bail!("coefficient bounds must be finite");
        }
        if self.min > self.max {
            bail!("coefficient min ({}) is greater than max ({})", self.min, self.max);
        }
        Ok(())
    }
}

/// Draw `spec.count` uniform values in `[min, max]`.
pub fn generate_coefficients(spec: &CoefficientSpec) -> Result<Vec<f64>> {
    spec.validate()?;
    let mut rng = match spec.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Ok((0..spec.count)
        .map(|_| rng.gen_range(spec.min..=spec.max))
        .collect())
}

/// Write one coefficient per line.
pub fn write_coefficients(path: &Path, values: &[f64]) -> Result<()> {
    let mut out = String::with_capacity(values.len() * 20);
    for v in values {
        let _ = writeln!(out, "{v}");
    }
    create_parent(path)?;
    fs::write(path, out).with_context(|| format!("failed to write coefficients {}", path.display()))
}

/// Write the single-line `start end step` points spec.
pub fn write_points_spec(path: &Path, spec: &PointsSpec) -> Result<()> {
    spec.validate().map_err(anyhow::Error::msg)?;
    create_parent(path)?;
    fs::write(path, format!("{}\n", spec.to_line()))
        .with_context(|| format!("failed to write points spec {}", path.display()))
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::results::read_points_spec;
    use tempfile::TempDir;

    #[test]
    fn seeded_generation_is_reproducible_and_bounded() {
        let spec = CoefficientSpec {
            count: 1000,
            min: -1.0,
            max: 1.0,
            seed: Some(7),
        };
        let a = generate_coefficients(&spec).unwrap();
        let b = generate_coefficients(&spec).unwrap();
        assert_eq!(a.len(), 1000);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn rejects_empty_and_inverted_ranges() {
        let mut spec = CoefficientSpec {
            count: 0,
            min: 0.0,
            max: 1.0,
            seed: None,
        };
        assert!(generate_coefficients(&spec).is_err());
        spec.count = 3;
        spec.min = 2.0;
        assert!(generate_coefficients(&spec).is_err());
    }

    #[test]
    fn written_files_are_readable_by_the_protocol() {
        let dir = TempDir::new().unwrap();
        let coeffs = dir.path().join("nested/poly.coeffs");
        write_coefficients(&coeffs, &[0.5, -0.25, 1.0]).unwrap();
        assert_eq!(fs::read_to_string(&coeffs).unwrap(), "0.5\n-0.25\n1\n");

        let points = dir.path().join("range.points");
        let spec = PointsSpec {
            start: -100.0,
            end: 100.0,
            step: 0.001,
        };
        write_points_spec(&points, &spec).unwrap();
        assert_eq!(read_points_spec(&points).unwrap(), spec);

        let bad = PointsSpec {
            start: 1.0,
            end: 0.0,
            step: 0.1,
        };
        assert!(write_points_spec(&points, &bad).is_err());
    }
}
