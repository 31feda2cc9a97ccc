//! Straight-line fits between per-shot intensity and beam intensity.
//!
//! Two flavours are provided: a RANSAC fit that keeps the largest consensus set, and an
//! ordinary least squares fit whose parameter errors define a confidence band.

use nalgebra::{Matrix2, Vector2};
use rand::prelude::*;

/// Smallest residual tolerance RANSAC will use, relative to the data scale
const MIN_THRESHOLD_SCALE: f64 = 1e-12;

/// y = slope * x + intercept
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub slope: f64,
    pub intercept: f64,
}

impl Line {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// Least squares line through the points, None if every x is the same
    pub fn fit(x: &[f64], y: &[f64]) -> Option<Self> {
        let n = x.len().min(y.len());
        if n < 2 {
            return None;
        }
        let x_mean = x[..n].iter().sum::<f64>() / n as f64;
        let y_mean = y[..n].iter().sum::<f64>() / n as f64;
        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (xi, yi) in x.iter().zip(y.iter()) {
            sxx += (xi - x_mean) * (xi - x_mean);
            sxy += (xi - x_mean) * (yi - y_mean);
        }
        if sxx <= f64::EPSILON * x_mean.abs().max(1.0) {
            return None;
        }
        let slope = sxy / sxx;
        Some(Self {
            slope,
            intercept: y_mean - slope * x_mean,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RansacParams {
    /// None means the median absolute deviation of y
    pub residual_threshold: Option<f64>,
    pub min_samples: usize,
    pub max_trials: usize,
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            residual_threshold: None,
            min_samples: 2,
            max_trials: 100,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RansacFit {
    pub line: Line,
    pub inliers: Vec<bool>,
}

impl RansacFit {
    pub fn n_inliers(&self) -> usize {
        self.inliers.iter().filter(|&&m| m).count()
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Median absolute deviation
pub fn median_absolute_deviation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    let center = median(&mut sorted);
    let mut deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&mut deviations)
}

/// Sample `k` distinct indices from `0..n` using Fisher-Yates partial shuffle.
fn sample_indices(rng: &mut impl Rng, n: usize, k: usize) -> Vec<usize> {
    debug_assert!(k <= n);
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }
    indices.truncate(k);
    indices
}

/// Fit y against x with RANSAC.
///
/// Each trial fits a line to `min_samples` random points and counts the points whose
/// absolute residual is within the threshold. The trial with the most inliers wins; ties go
/// to the smaller inlier residual sum. The winning line is refit on its inliers, but the
/// inlier mask is the one of the winning trial.
///
/// Returns None when there are fewer points than `min_samples` or every sampled subset was
/// degenerate.
pub fn fit_line_ransac(x: &[f64], y: &[f64], params: &RansacParams) -> Option<RansacFit> {
    let n = x.len().min(y.len());
    let min_samples = params.min_samples.max(2);
    if n < min_samples {
        return None;
    }

    let threshold = params.residual_threshold.unwrap_or_else(|| {
        let scale = y[..n].iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        median_absolute_deviation(&y[..n]).max(scale * MIN_THRESHOLD_SCALE)
    });

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Line, Vec<bool>, usize, f64)> = None;

    for _ in 0..params.max_trials {
        let sample = sample_indices(&mut rng, n, min_samples);
        let sample_x: Vec<f64> = sample.iter().map(|&i| x[i]).collect();
        let sample_y: Vec<f64> = sample.iter().map(|&i| y[i]).collect();
        let Some(line) = Line::fit(&sample_x, &sample_y) else {
            continue;
        };

        let mut mask = vec![false; n];
        let mut count = 0;
        let mut residual_sum = 0.0;
        for i in 0..n {
            let residual = (y[i] - line.predict(x[i])).abs();
            if residual <= threshold {
                mask[i] = true;
                count += 1;
                residual_sum += residual;
            }
        }

        let better = match &best {
            None => true,
            Some((_, _, best_count, best_sum)) => {
                count > *best_count || (count == *best_count && residual_sum < *best_sum)
            }
        };
        if better {
            best = Some((line, mask, count, residual_sum));
            if count == n {
                break;
            }
        }
    }

    let (line, inliers, _, _) = best?;
    let inlier_x: Vec<f64> = (0..n).filter(|&i| inliers[i]).map(|i| x[i]).collect();
    let inlier_y: Vec<f64> = (0..n).filter(|&i| inliers[i]).map(|i| y[i]).collect();
    let line = Line::fit(&inlier_x, &inlier_y).unwrap_or(line);
    Some(RansacFit { line, inliers })
}

/// Least squares line with the standard errors of its parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub line: Line,
    pub slope_err: f64,
    pub intercept_err: f64,
}

impl LinearFit {
    /// Ordinary least squares on y = m x + b.
    ///
    /// The parameter covariance is `s² (XᵀX)⁻¹` with `s² = RSS / (n - 2)`. Needs at least
    /// three points and two distinct x values.
    pub fn fit(x: &[f64], y: &[f64]) -> Option<Self> {
        let n = x.len().min(y.len());
        if n < 3 {
            return None;
        }
        let line = Line::fit(&x[..n], &y[..n])?;

        let (mut sx, mut sxx) = (0.0, 0.0);
        let mut rss = 0.0;
        for i in 0..n {
            sx += x[i];
            sxx += x[i] * x[i];
            let r = y[i] - line.predict(x[i]);
            rss += r * r;
        }
        let xtx = Matrix2::new(sxx, sx, sx, n as f64);
        let cov = xtx.try_inverse()? * (rss / (n - 2) as f64);
        let variances = Vector2::new(cov[(0, 0)], cov[(1, 1)]);

        Some(Self {
            line,
            slope_err: variances[0].max(0.0).sqrt(),
            intercept_err: variances[1].max(0.0).sqrt(),
        })
    }

    /// Lower and upper bound of the `sigma` band at x
    pub fn bounds(&self, x: f64, sigma: f64) -> (f64, f64) {
        let fitted = self.line.predict(x);
        let error = ((self.slope_err * x).powi(2) + self.intercept_err.powi(2)).sqrt();
        (fitted - sigma * error, fitted + sigma * error)
    }

    /// Which points fall inside the `sigma` band, bounds included
    pub fn within_band(&self, x: &[f64], y: &[f64], sigma: f64) -> Vec<bool> {
        x.iter()
            .zip(y.iter())
            .map(|(&xi, &yi)| {
                let (lower, upper) = self.bounds(xi, sigma);
                lower <= yi && yi <= upper
            })
            .collect()
    }
}
