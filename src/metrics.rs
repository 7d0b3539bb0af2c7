use serde::Serialize;

/// Mean, median, 25th and 75th percentile of a sample set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub mean: f64,
    pub median: f64,
    pub p25: f64,
    pub p75: f64,
}

/// Compute metrics (mean, median, 25th percentile, 75th percentile) from samples.
/// NaN samples are ignored; returns `None` when nothing is left.
pub fn compute_metrics(samples: &[f64]) -> Option<Metrics> {
    let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    Some(Metrics {
        mean,
        median: sorted[n / 2],
        p25: sorted[n / 4],
        p75: sorted[3 * n / 4],
    })
}

/// Smallest and largest sample, ignoring NaN.
pub fn min_max(samples: &[f64]) -> Option<(f64, f64)> {
    samples
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quartiles_of_small_sets() {
        let m = compute_metrics(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(m.mean, 2.5);
        assert_eq!(m.median, 3.0);
        assert_eq!(m.p25, 2.0);
        assert_eq!(m.p75, 4.0);

        let single = compute_metrics(&[0.5]).unwrap();
        assert_eq!((single.mean, single.median, single.p25, single.p75), (0.5, 0.5, 0.5, 0.5));
    }

    #[test]
    fn empty_and_nan_only_inputs() {
        assert_eq!(compute_metrics(&[]), None);
        assert_eq!(compute_metrics(&[f64::NAN]), None);
        assert_eq!(min_max(&[]), None);
        assert_eq!(min_max(&[2.0, f64::NAN, -1.0]), Some((-1.0, 2.0)));
    }
}
