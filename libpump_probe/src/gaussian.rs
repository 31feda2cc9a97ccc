use nalgebra::{Matrix3, Vector3};

const MAX_ITERS: usize = 200;
const COST_TOLERANCE: f64 = 1e-12;
const STEP_TOLERANCE: f64 = 1e-10;
const INITIAL_DAMPING: f64 = 1e-3;
const MAX_DAMPING: f64 = 1e10;

/// a * exp(-(x - center)^2 / (2 sigma^2))
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFit {
    pub amplitude: f64,
    pub center: f64,
    pub sigma: f64,
}

impl GaussianFit {
    pub fn evaluate(&self, x: f64) -> f64 {
        let d = x - self.center;
        self.amplitude * (-d * d / (2.0 * self.sigma * self.sigma)).exp()
    }

    /// Value and partial derivatives wrt (amplitude, center, sigma)
    fn value_and_gradient(&self, x: f64) -> (f64, Vector3<f64>) {
        let d = x - self.center;
        let s2 = self.sigma * self.sigma;
        let e = (-d * d / (2.0 * s2)).exp();
        let value = self.amplitude * e;
        let gradient = Vector3::new(
            e,
            value * d / s2,
            value * d * d / (s2 * self.sigma),
        );
        (value, gradient)
    }

    fn cost(&self, y: &[f64]) -> f64 {
        y.iter()
            .enumerate()
            .map(|(i, v)| (v - self.evaluate(i as f64)).powi(2))
            .sum()
    }

    fn is_valid(&self, n: usize) -> bool {
        self.amplitude.is_finite()
            && self.center.is_finite()
            && self.sigma.is_finite()
            && self.sigma > 0.0
            && self.sigma < 10.0 * n as f64
    }
}

/// Starting point: peak height and position, width from the second moment around the peak
fn initial_guess(y: &[f64]) -> GaussianFit {
    let (peak, amplitude) = y
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        });
    let center = peak as f64;
    let mut mass = 0.0;
    let mut moment = 0.0;
    for (i, v) in y.iter().enumerate() {
        let w = v.max(0.0);
        mass += w;
        moment += w * (i as f64 - center).powi(2);
    }
    let sigma = if mass > 0.0 && moment > 0.0 {
        (moment / mass).sqrt()
    } else {
        y.len() as f64 / 4.0
    };
    GaussianFit {
        amplitude,
        center,
        sigma: sigma.max(0.5),
    }
}

/// Fit a Gaussian to a profile sampled at x = 0, 1, ..., n - 1 with Levenberg-Marquardt.
///
/// Returns None when the profile has no peak, or the fit diverges or fails to converge.
pub fn fit_gaussian(y: &[f64]) -> Option<GaussianFit> {
    let n = y.len();
    if n < 3 || y.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = y.iter().copied().fold(f64::INFINITY, f64::min);
    if max - min <= f64::EPSILON * max.abs().max(1.0) {
        return None;
    }

    let mut fit = initial_guess(y);
    let mut cost = fit.cost(y);
    let mut damping = INITIAL_DAMPING;

    for _ in 0..MAX_ITERS {
        let mut jtj = Matrix3::<f64>::zeros();
        let mut jtr = Vector3::<f64>::zeros();
        for (i, v) in y.iter().enumerate() {
            let (value, gradient) = fit.value_and_gradient(i as f64);
            jtj += gradient * gradient.transpose();
            jtr += gradient * (v - value);
        }

        loop {
            let mut lhs = jtj;
            for k in 0..3 {
                lhs[(k, k)] += damping * jtj[(k, k)].max(1e-12);
            }
            let step = lhs.lu().solve(&jtr)?;
            let candidate = GaussianFit {
                amplitude: fit.amplitude + step[0],
                center: fit.center + step[1],
                sigma: (fit.sigma + step[2]).abs(),
            };
            let candidate_cost = if candidate.is_valid(n) {
                candidate.cost(y)
            } else {
                f64::INFINITY
            };

            if candidate_cost <= cost {
                let improvement = cost - candidate_cost;
                fit = candidate;
                cost = candidate_cost;
                damping = (damping / 10.0).max(1e-12);
                if improvement <= COST_TOLERANCE * cost.max(1e-300) || step.norm() < STEP_TOLERANCE
                {
                    return Some(fit);
                }
                break;
            }

            damping *= 10.0;
            if damping > MAX_DAMPING {
                // No step lowers the cost any more; we are at a minimum if the model is sane
                return fit.is_valid(n).then_some(fit);
            }
        }
    }
    None
}
