//! Empirical complexity estimation
//!
//! Fits `metric = a + b * ln(n)` by ordinary least squares over the accepted
//! cases and buckets the slope `b` into a coarse Big-O label. The label is a
//! heuristic for display only, not a proof of complexity: input sizes are
//! guessed from the payload and the bands are uncalibrated.

use std::fmt;

/// Fits with a coefficient of determination below this are rejected
pub const MIN_R_SQUARED: f64 = 0.75;
/// Minimum number of valid points for a fit
pub const MIN_POINTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexityLabel {
    Constant,
    Logarithmic,
    Linear,
    Linearithmic,
    /// Quadratic or worse
    Polynomial,
    /// Linear or worse (space only)
    LinearOrWorse,
    Unknown,
}

impl fmt::Display for ComplexityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ComplexityLabel::Constant => "O(1)",
            ComplexityLabel::Logarithmic => "O(log n)",
            ComplexityLabel::Linear => "O(n)",
            ComplexityLabel::Linearithmic => "O(n log n)",
            ComplexityLabel::Polynomial => "O(n²+)",
            ComplexityLabel::LinearOrWorse => "O(n+)",
            ComplexityLabel::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// Strategy mapping a fitted slope to a label
pub trait ComplexityBands: Send + Sync {
    /// Convert a raw metric (seconds, KB) into the unit the slope is read in
    fn scale(&self, metric: f64) -> f64 {
        metric
    }

    fn label(&self, slope: f64) -> ComplexityLabel;
}

/// Default bands for execution time in seconds
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeBands;

impl ComplexityBands for TimeBands {
    fn label(&self, slope: f64) -> ComplexityLabel {
        match slope {
            s if s < 0.2 => ComplexityLabel::Constant,
            s if s < 0.8 => ComplexityLabel::Logarithmic,
            s if s < 1.5 => ComplexityLabel::Linear,
            s if s < 2.5 => ComplexityLabel::Linearithmic,
            _ => ComplexityLabel::Polynomial,
        }
    }
}

/// Default bands for peak memory, read in MB
#[derive(Debug, Default, Clone, Copy)]
pub struct SpaceBands;

impl ComplexityBands for SpaceBands {
    fn scale(&self, memory_kb: f64) -> f64 {
        memory_kb / 1024.0
    }

    fn label(&self, slope: f64) -> ComplexityLabel {
        match slope {
            s if s < 0.1 => ComplexityLabel::Constant,
            s if s < 0.7 => ComplexityLabel::Logarithmic,
            _ => ComplexityLabel::LinearOrWorse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// Ordinary least squares over (x, y). `None` when x has no variance.
pub fn linear_fit(points: &[(f64, f64)]) -> Option<Fit> {
    let n = points.len() as f64;
    if points.len() < 2 {
        return None;
    }

    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let ss_xx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    let ss_xy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    if ss_xx <= f64::EPSILON {
        return None;
    }

    let slope = ss_xy / ss_xx;
    let intercept = mean_y - slope * mean_x;

    let ss_tot: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    // A flat metric is explained perfectly by a flat line
    let r_squared = if ss_tot <= f64::EPSILON {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    };

    Some(Fit {
        slope,
        intercept,
        r_squared,
    })
}

/// Whether an (input size, metric) sample can take part in a fit
pub fn is_valid_point(size: u64, metric: f64) -> bool {
    size > 0 && metric.is_finite() && metric >= 0.0
}

/// Estimate a complexity label from (input size, metric) samples
pub fn estimate(points: &[(u64, f64)], bands: &dyn ComplexityBands) -> ComplexityLabel {
    let transformed: Vec<(f64, f64)> = points
        .iter()
        .filter(|(size, metric)| is_valid_point(*size, *metric))
        .map(|(size, metric)| ((*size as f64).ln(), bands.scale(*metric)))
        .collect();

    if transformed.len() < MIN_POINTS {
        return ComplexityLabel::Unknown;
    }

    match linear_fit(&transformed) {
        Some(fit) if fit.r_squared >= MIN_R_SQUARED => bands.label(fit.slope),
        _ => ComplexityLabel::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_few_points() {
        assert_eq!(
            estimate(&[(10, 0.1), (100, 0.2)], &TimeBands),
            ComplexityLabel::Unknown
        );
        // Invalid points do not count
        assert_eq!(
            estimate(&[(0, 0.1), (10, 0.1), (100, -1.0), (1000, 0.3)], &TimeBands),
            ComplexityLabel::Unknown
        );
    }

    #[test]
    fn test_flat_time_is_constant() {
        let points = [(10, 0.05), (100, 0.05), (1000, 0.05), (10000, 0.05)];
        assert_eq!(estimate(&points, &TimeBands), ComplexityLabel::Constant);
    }

    #[test]
    fn test_slope_bands() {
        // metric = 1.0 * ln(n) exactly
        let points: Vec<(u64, f64)> = [10u64, 100, 1000, 10000]
            .iter()
            .map(|&n| (n, (n as f64).ln()))
            .collect();
        assert_eq!(estimate(&points, &TimeBands), ComplexityLabel::Linear);

        let steep: Vec<(u64, f64)> = points.iter().map(|&(n, t)| (n, 3.0 * t)).collect();
        assert_eq!(estimate(&steep, &TimeBands), ComplexityLabel::Polynomial);
    }

    #[test]
    fn test_poor_fit_is_unknown() {
        // x = ln(n) ≈ [2.3, 4.6, 6.9, 9.2]; y zig-zags so the line explains little
        let points = [(10, 5.0), (100, 0.0), (1000, 8.0), (10000, 2.0)];
        let transformed: Vec<(f64, f64)> =
            points.iter().map(|&(n, y)| ((n as f64).ln(), y)).collect();
        let fit = linear_fit(&transformed).unwrap();
        assert!(fit.r_squared < MIN_R_SQUARED);
        assert_eq!(estimate(&points, &TimeBands), ComplexityLabel::Unknown);
    }

    #[test]
    fn test_same_size_everywhere_is_unknown() {
        let points = [(50, 0.1), (50, 0.2), (50, 0.3)];
        assert_eq!(estimate(&points, &TimeBands), ComplexityLabel::Unknown);
    }

    #[test]
    fn test_space_reads_megabytes() {
        // 2048 KB per ln-unit = 2 MB slope
        let points: Vec<(u64, f64)> = [10u64, 100, 1000]
            .iter()
            .map(|&n| (n, 2048.0 * (n as f64).ln()))
            .collect();
        assert_eq!(estimate(&points, &SpaceBands), ComplexityLabel::LinearOrWorse);

        let flat = [(10, 4096.0), (100, 4096.0), (1000, 4096.0)];
        assert_eq!(estimate(&flat, &SpaceBands), ComplexityLabel::Constant);
    }

    #[test]
    fn test_deterministic() {
        let points = [(10, 0.01), (200, 0.03), (3000, 0.07), (40000, 0.12)];
        let first = estimate(&points, &TimeBands);
        for _ in 0..10 {
            assert_eq!(estimate(&points, &TimeBands), first);
        }
        assert_eq!(ComplexityLabel::Unknown.to_string(), "Unknown");
    }
}
