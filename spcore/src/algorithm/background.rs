use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::algorithm::distributions::{
    currie_threshold, estimate_single_ion_sigma, formula_c_threshold, z_score, CompoundPoissonLognormal,
};
use crate::algorithm::smoothing::smooth;
use crate::algorithm::stats::{mean, mean_below, mean_positive, min};
use crate::data::params::{DetectionMethod, DetectionParameters};
use crate::error::SpResult;

/// How the background fit ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Convergence {
    /// the background bins stopped changing
    Converged,
    MaxIterations,
    /// one threshold from the overall mean, no refit
    Single,
    Manual,
    /// empty, all-zero or too short signal
    Degenerate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdMetadata {
    pub method: DetectionMethod,
    pub iterations: usize,
    pub convergence: Convergence,
    pub lod_counts: f64,
    pub lod_mdl: f64,
    pub window_applied: bool,
    pub window_size: Option<usize>,
    pub overall_mean: f64,
    /// single-ion log-sigma used by the compound Poisson model
    pub sigma: Option<f64>,
}

/// Outcome of background estimation for one signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    /// signal the threshold was computed on, the raw counts when smoothing is off
    pub smoothed_signal: Vec<f64>,
    pub lambda_background: f64,
    pub threshold: f64,
    pub mean_signal: f64,
    pub metadata: ThresholdMetadata,
}

/// centred window of `window_size` bins, the whole signal when it is not shorter
pub fn apply_background_window(signal: &[f64], use_window: bool, window_size: usize) -> &[f64] {
    if !use_window || window_size == 0 || window_size >= signal.len() {
        return signal;
    }
    let start = (signal.len() - window_size) / 2;
    &signal[start..start + window_size]
}

/// one threshold from a background mean, with the low-background fallback and `threshold >= λ`
///
/// Arguments:
///
/// * `lambda` - background mean in counts
/// * `method` - statistical method, [`DetectionMethod::Manual`] is not handled here
/// * `alpha` - false-positive rate
/// * `sigma` - single-ion log-sigma for the compound Poisson model
///
/// Returns:
///
/// * `f64` - the detection threshold in counts
pub fn threshold_for_background(lambda: f64, method: DetectionMethod, alpha: f64, sigma: f64) -> f64 {
    let fallback = lambda + 3.0 * lambda.max(1.0).sqrt();
    let raw = match method {
        DetectionMethod::Currie | DetectionMethod::FormulaC => {
            let z = z_score(alpha);
            let t = if method == DetectionMethod::Currie {
                currie_threshold(lambda, z)
            } else {
                formula_c_threshold(lambda, z)
            };
            if t > 0.0 && t.is_finite() {
                t
            } else {
                fallback
            }
        }
        DetectionMethod::CompoundPoissonLogNormal => match CompoundPoissonLognormal::new(lambda, sigma) {
            Ok(model) => {
                let t = model.threshold(alpha);
                if t.is_finite() {
                    t
                } else {
                    warn!(lambda, "compound Poisson quantile not finite, using simple approximation");
                    fallback
                }
            }
            Err(e) => {
                warn!(lambda, error = %e, "compound Poisson model unavailable, using simple approximation");
                fallback
            }
        },
        DetectionMethod::Manual => fallback,
    };
    raw.max(lambda)
}

/// estimate the background mean and the detection threshold of a signal
///
/// The signal is optionally smoothed first; the threshold is computed on the
/// smoothed copy, which is returned so that detection can run against it.
/// Statistical methods refit the background on the bins strictly below the
/// current threshold until that set of bins stops changing or
/// `max_iterations` is reached.
///
/// Arguments:
///
/// * `signal` - raw counts per bin
/// * `params` - detection parameters, validated here
///
/// Returns:
///
/// * `SpResult<ThresholdResult>` - a configuration error for invalid parameters;
///   degenerate signals give λ = 0 and threshold 0 (the manual threshold for Manual)
///
/// # Examples
///
/// ```
/// use spcore::algorithm::background::detect_threshold;
/// use spcore::data::params::{DetectionMethod, DetectionParameters};
///
/// let mut params = DetectionParameters::with_method(DetectionMethod::Manual);
/// params.manual_threshold = 5.0;
/// let result = detect_threshold(&[1.0, 3.0, 20.0, 2.0], &params).unwrap();
/// assert_eq!(result.threshold, 5.0);
/// assert_eq!(result.lambda_background, 2.0);
/// ```
pub fn detect_threshold(signal: &[f64], params: &DetectionParameters) -> SpResult<ThresholdResult> {
    params.validate()?;

    let too_short = params.apply_smoothing && signal.len() < params.smoothing_window;
    let smoothed = if params.apply_smoothing && !too_short {
        smooth(signal, params.smoothing_window, params.smoothing_iterations)?
    } else {
        signal.to_vec()
    };

    let window_size = if params.use_background_window { Some(params.background_window_size) } else { None };
    let working = apply_background_window(&smoothed, params.use_background_window, params.background_window_size);
    let overall_mean = mean(working);
    let mean_signal = mean_positive(&smoothed);

    let metadata = |iterations: usize, convergence: Convergence, threshold: f64, lambda: f64, sigma: Option<f64>| ThresholdMetadata {
        method: params.method,
        iterations,
        convergence,
        lod_counts: threshold,
        lod_mdl: (threshold - lambda).max(0.0),
        window_applied: params.use_background_window,
        window_size,
        overall_mean,
        sigma,
    };

    if working.is_empty() || too_short || working.iter().all(|v| *v <= 0.0) {
        let threshold = if params.method == DetectionMethod::Manual { params.manual_threshold } else { 0.0 };
        debug!(bins = signal.len(), "degenerate signal, background set to zero");
        return Ok(ThresholdResult {
            smoothed_signal: smoothed,
            lambda_background: 0.0,
            threshold,
            mean_signal,
            metadata: metadata(0, Convergence::Degenerate, threshold, 0.0, None),
        });
    }

    if params.method == DetectionMethod::Manual {
        let threshold = params.manual_threshold;
        let lambda = mean_below(working, threshold).unwrap_or_else(|| min(working)).min(threshold);
        return Ok(ThresholdResult {
            smoothed_signal: smoothed,
            lambda_background: lambda,
            threshold,
            mean_signal,
            metadata: metadata(1, Convergence::Manual, threshold, lambda, None),
        });
    }

    let uses_sigma = params.method == DetectionMethod::CompoundPoissonLogNormal;
    let sigma_for = |background: &[f64], lambda: f64| {
        if params.estimate_sigma {
            estimate_single_ion_sigma(background, lambda).unwrap_or(params.single_ion_sigma)
        } else {
            params.single_ion_sigma
        }
    };

    let mut lambda = overall_mean;
    let mut sigma = sigma_for(working, lambda);
    let mut threshold;
    let iterations;
    let convergence;

    if !params.iterative || params.max_iterations == 0 {
        threshold = threshold_for_background(lambda, params.method, params.alpha, sigma);
        iterations = 0;
        convergence = Convergence::Single;
    } else {
        let mut below_prev: Option<usize> = None;
        let mut done = 0;
        let mut status = Convergence::MaxIterations;
        threshold = lambda;
        for iteration in 1..=params.max_iterations {
            threshold = threshold_for_background(lambda, params.method, params.alpha, sigma);
            done = iteration;
            // lower sets are nested, so an equal count means the same background bins
            let below = working.iter().filter(|v| **v < threshold).count();
            debug!(iteration, lambda, threshold, background_bins = below, "background refit");
            if below_prev == Some(below) {
                status = Convergence::Converged;
                break;
            }
            below_prev = Some(below);
            lambda = mean_below(working, threshold).unwrap_or_else(|| min(working));
            if params.estimate_sigma {
                let background: Vec<f64> = working.iter().copied().filter(|v| *v < threshold).collect();
                sigma = sigma_for(&background, lambda);
            }
        }
        iterations = done;
        convergence = status;
    }

    lambda = mean_below(working, threshold).unwrap_or_else(|| min(working));
    threshold = threshold.max(lambda);

    Ok(ThresholdResult {
        smoothed_signal: smoothed,
        lambda_background: lambda,
        threshold,
        mean_signal,
        metadata: metadata(iterations, convergence, threshold, lambda, if uses_sigma { Some(sigma) } else { None }),
    })
}
