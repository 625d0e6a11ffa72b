extern crate statrs;

use statrs::distribution::{ContinuousCDF, Discrete, LogNormal, Normal, Poisson};

use crate::algorithm::stats::variance;
use crate::error::{SpError, SpResult};

/// default log-sigma of the single-ion detector response
pub const SINGLE_ION_SIGMA: f64 = 0.47;

/// Poisson mass covered by the mixture components
const POISSON_COVERAGE: f64 = 1.0 - 1e-12;
/// components lighter than this are not worth evaluating
const MIN_COMPONENT_WEIGHT: f64 = 1e-16;
const BISECTION_STEPS: usize = 100;

/// one-sided standard-normal critical value for false-positive rate `alpha`
///
/// Arguments:
///
/// * `alpha` - false-positive rate in (0, 1)
///
/// Returns:
///
/// * `f64` - z such that P(Z > z) = alpha
///
/// Computed from the lower tail so that alphas below the f64 resolution of
/// `1 - alpha` still give finite, increasing values.
///
/// # Examples
///
/// ```
/// use spcore::algorithm::distributions::z_score;
///
/// assert!((z_score(0.05) - 1.6449).abs() < 1e-3);
/// assert!(z_score(1e-20) > z_score(1e-12));
/// ```
pub fn z_score(alpha: f64) -> f64 {
    -Normal::standard().inverse_cdf(alpha)
}

/// Currie decision threshold `λ + z·sqrt(2(λ + ε))` with a continuity term for low backgrounds
pub fn currie_threshold(lambda: f64, z: f64) -> f64 {
    if lambda <= 0.0 {
        return 0.0;
    }
    let epsilon = if lambda < 10.0 { 0.5 } else { 0.0 };
    lambda + z * ((lambda + epsilon) * 2.0).sqrt()
}

/// Formula C critical value for paired counting with equal count times
pub fn formula_c_threshold(lambda: f64, z: f64) -> f64 {
    if lambda <= 0.0 {
        return 0.0;
    }
    // count-time ratio of sample to blank
    let tr = 1.0;
    lambda + z * z / 2.0 * tr + z * (z * z / 4.0 * tr * tr + lambda * tr * (1.0 + tr)).sqrt()
}

/// Fenton-Wilkinson log-normal approximation of the sum of `k` iid log-normals
///
/// Arguments:
///
/// * `k` - number of summed variables, at least 1
/// * `mu` - log-mean of one variable
/// * `sigma` - log-sigma of one variable
///
/// Returns:
///
/// * `(f64, f64)` - log-mean and log-sigma of the sum
pub fn fenton_wilkinson(k: f64, mu: f64, sigma: f64) -> (f64, f64) {
    let sigma2 = sigma * sigma;
    let sigma2_k = ((sigma2.exp() - 1.0) / k + 1.0).ln();
    let mu_k = k.ln() + mu + 0.5 * (sigma2 - sigma2_k);
    (mu_k, sigma2_k.sqrt())
}

/// Background model of a ToF detector: `X = Y_1 + ... + Y_N` with
/// `N ~ Poisson(λ)` ion arrivals and unit-mean log-normal single-ion responses `Y_i`.
///
/// The `N = k` slices are approximated by Fenton-Wilkinson log-normals and
/// the distribution is kept zero-truncated, the `N = 0` atom being handled by
/// [`CompoundPoissonLognormal::quantile`].
#[derive(Clone, Debug)]
pub struct CompoundPoissonLognormal {
    pub lambda: f64,
    pub sigma: f64,
    weights: Vec<f64>,
    components: Vec<LogNormal>,
    upper: f64,
}

impl CompoundPoissonLognormal {
    pub fn new(lambda: f64, sigma: f64) -> SpResult<Self> {
        if !(sigma > 0.0) || !sigma.is_finite() {
            return Err(SpError::configuration(format!("single-ion sigma must be positive, got {}", sigma)));
        }
        if !lambda.is_finite() {
            return Err(SpError::data(format!("background mean must be finite, got {}", lambda)));
        }
        if lambda <= 0.0 {
            return Ok(CompoundPoissonLognormal { lambda, sigma, weights: Vec::new(), components: Vec::new(), upper: 0.0 });
        }

        let poisson = Poisson::new(lambda).map_err(|e| SpError::data(e.to_string()))?;
        let mu = -0.5 * sigma * sigma;
        // hard stop far beyond the 1e-12 Poisson tail, guards rounding in the running sum
        let k_limit = (lambda + 12.0 * lambda.sqrt() + 30.0).ceil() as u64;

        let mut cumulative = poisson.pmf(0);
        let mut weights = Vec::new();
        let mut params = Vec::new();
        let mut k = 1u64;
        while cumulative < POISSON_COVERAGE && k <= k_limit {
            let p = poisson.pmf(k);
            cumulative += p;
            if p.is_finite() && p > MIN_COMPONENT_WEIGHT {
                weights.push(p);
                params.push(fenton_wilkinson(k as f64, mu, sigma));
            }
            k += 1;
        }
        if weights.is_empty() {
            let mode = lambda.floor().max(1.0);
            weights.push(1.0);
            params.push(fenton_wilkinson(mode, mu, sigma));
        }

        let total: f64 = weights.iter().sum();
        weights.iter_mut().for_each(|w| *w /= total);

        let components = params
            .iter()
            .map(|(m, s)| LogNormal::new(*m, *s).map_err(|e| SpError::data(e.to_string())))
            .collect::<SpResult<Vec<_>>>()?;

        // independent of the requested probability, keeps quantiles monotone in alpha
        let z_tail = Normal::standard().inverse_cdf(POISSON_COVERAGE);
        let upper = params
            .iter()
            .map(|(m, s)| (m + s * z_tail).exp())
            .fold(0.0, f64::max);

        Ok(CompoundPoissonLognormal { lambda, sigma, weights, components, upper })
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// CDF of the zero-truncated compound distribution
    pub fn cdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        self.weights
            .iter()
            .zip(self.components.iter())
            .map(|(w, c)| w * c.cdf(x))
            .sum()
    }

    /// survival function `P(X > x)` of the zero-truncated compound distribution
    pub fn sf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 1.0;
        }
        self.weights
            .iter()
            .zip(self.components.iter())
            .map(|(w, c)| w * c.sf(x))
            .sum()
    }

    /// quantile of the full compound distribution at probability `q`
    ///
    /// Same as `upper_quantile(1 - q)`.
    pub fn quantile(&self, q: f64) -> f64 {
        self.upper_quantile(1.0 - q)
    }

    /// smallest x with `P(X > x) <= tail` for the full compound distribution
    ///
    /// Only `N >= 1` puts mass above zero, so the zero-truncated survival
    /// function is inverted at `tail / (1 - e^-λ)`; a target of 1 or more means
    /// a zero count already satisfies `tail` and 0 is returned. Working on the
    /// upper tail keeps tiny `tail` values resolvable. The bisection bracket
    /// starts from a bound that only depends on λ and σ.
    ///
    /// Arguments:
    ///
    /// * `tail` - exceedance probability in (0, 1)
    ///
    /// Returns:
    ///
    /// * `f64` - the smallest bracketed x with sf(x) <= the truncated target
    pub fn upper_quantile(&self, tail: f64) -> f64 {
        if self.lambda <= 0.0 || self.components.is_empty() {
            return 0.0;
        }
        // 1 - e^-λ without cancellation for small λ
        let nonzero = -(-self.lambda).exp_m1();
        let target = tail / nonzero;
        if target >= 1.0 {
            return 0.0;
        }

        let mut hi = self.upper;
        let mut doublings = 0;
        while self.sf(hi) > target && doublings < 64 {
            hi *= 2.0;
            doublings += 1;
        }

        let mut lo = 0.0;
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            if mid <= lo || mid >= hi {
                break;
            }
            if self.sf(mid) > target {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        hi
    }

    /// detection threshold for false-positive rate `alpha`
    pub fn threshold(&self, alpha: f64) -> f64 {
        self.upper_quantile(alpha)
    }
}

/// estimate the single-ion log-sigma from background-only bins
///
/// Uses the compound Poisson moment relation `Var = λ·e^{σ²}` for a unit-mean
/// log-normal response. `None` when the bins are not over-dispersed.
pub fn estimate_single_ion_sigma(background: &[f64], lambda: f64) -> Option<f64> {
    if background.len() < 2 || lambda <= 0.0 {
        return None;
    }
    let var = variance(background);
    if !(var > lambda) {
        return None;
    }
    Some((var / lambda).ln().sqrt().clamp(0.01, 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_z_score() {
        assert_relative_eq!(z_score(1e-6), 4.753424, epsilon = 1e-4);
        assert_relative_eq!(z_score(0.001), 3.090232, epsilon = 1e-4);
    }

    #[test]
    fn test_currie_and_formula_c() {
        let z = 1.6448536;
        // low background gets the continuity term
        assert_relative_eq!(currie_threshold(4.0, z), 4.0 + z * 9.0f64.sqrt(), epsilon = 1e-9);
        assert_relative_eq!(currie_threshold(50.0, z), 50.0 + z * 100.0f64.sqrt(), epsilon = 1e-9);
        assert_relative_eq!(
            formula_c_threshold(4.0, z),
            4.0 + z * z / 2.0 + z * (z * z / 4.0 + 8.0).sqrt(),
            epsilon = 1e-9
        );
        assert_eq!(currie_threshold(0.0, z), 0.0);
        assert_eq!(formula_c_threshold(-1.0, z), 0.0);
        assert!(formula_c_threshold(4.0, z) != currie_threshold(4.0, z));
    }

    #[test]
    fn test_fenton_wilkinson_preserves_mean() {
        let sigma = SINGLE_ION_SIGMA;
        let mu = -0.5 * sigma * sigma;
        for k in [1.0, 2.0, 7.0, 40.0] {
            let (mu_k, sigma_k) = fenton_wilkinson(k, mu, sigma);
            let mean = (mu_k + 0.5 * sigma_k * sigma_k).exp();
            assert_relative_eq!(mean, k, epsilon = 1e-9);
        }
        let (mu_1, sigma_1) = fenton_wilkinson(1.0, mu, sigma);
        assert_relative_eq!(mu_1, mu, epsilon = 1e-12);
        assert_relative_eq!(sigma_1, sigma, epsilon = 1e-12);
    }

    #[test]
    fn test_compound_cdf_is_a_distribution() {
        let model = CompoundPoissonLognormal::new(3.0, SINGLE_ION_SIGMA).unwrap();
        assert!(model.component_count() > 5);
        assert_eq!(model.cdf(0.0), 0.0);
        let mut last = 0.0;
        for x in [0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 64.0] {
            let c = model.cdf(x);
            assert!(c >= last);
            last = c;
        }
        assert!(last > 0.999999);
    }

    #[test]
    fn test_quantile_inverts_cdf() {
        let model = CompoundPoissonLognormal::new(5.0, SINGLE_ION_SIGMA).unwrap();
        let q = 0.999;
        let x = model.quantile(q);
        let p0 = (-5.0f64).exp();
        let q0 = (q - p0) / (1.0 - p0);
        assert!((model.cdf(x) - q0).abs() < 1e-9);
        assert!(x > 5.0);
    }

    #[test]
    fn test_quantile_monotone_in_alpha() {
        let model = CompoundPoissonLognormal::new(0.8, SINGLE_ION_SIGMA).unwrap();
        let mut last = 0.0;
        for alpha in [0.1, 0.05, 1e-2, 1e-3, 1e-4, 1e-6, 1e-8] {
            let t = model.threshold(alpha);
            assert!(t >= last, "alpha {} gave {} below {}", alpha, t, last);
            last = t;
        }
    }

    #[test]
    fn test_tiny_alpha_stays_finite_and_monotone() {
        let model = CompoundPoissonLognormal::new(4.0, SINGLE_ION_SIGMA).unwrap();
        let mut last_z = 0.0;
        let mut last_t = 0.0;
        for alpha in [1e-6, 1e-9, 1e-12, 1e-15, 1e-16, 1e-17, 1e-20, 1e-30, 1e-100] {
            let z = z_score(alpha);
            let t = model.threshold(alpha);
            assert!(z.is_finite() && z > last_z, "alpha {} gave z {}", alpha, z);
            assert!(t.is_finite() && t >= last_t, "alpha {} gave {} below {}", alpha, t, last_t);
            assert!(t < 1e6);
            last_z = z;
            last_t = t;
        }
        assert!(model.sf(model.threshold(1e-17)) <= 1e-17 / (1.0 - (-4.0f64).exp()));
    }

    #[test]
    fn test_zero_truncation() {
        // P(N = 0) = e^-0.01 > 0.9, so a 0.9 quantile is zero
        let model = CompoundPoissonLognormal::new(0.01, SINGLE_ION_SIGMA).unwrap();
        assert_eq!(model.quantile(0.9), 0.0);
        let empty = CompoundPoissonLognormal::new(0.0, SINGLE_ION_SIGMA).unwrap();
        assert_eq!(empty.threshold(1e-6), 0.0);
        assert!(CompoundPoissonLognormal::new(1.0, 0.0).unwrap_err().is_configuration());
    }

    #[test]
    fn test_estimate_sigma() {
        assert_eq!(estimate_single_ion_sigma(&[2.0, 2.0, 2.0], 2.0), None);
        let bins = [0.0, 4.0, 0.0, 4.0];
        // variance 4 over mean 2
        let sigma = estimate_single_ion_sigma(&bins, 2.0).unwrap();
        assert_relative_eq!(sigma, 2.0f64.ln().sqrt(), epsilon = 1e-12);
    }
}
