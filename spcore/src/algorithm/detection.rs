use crate::data::params::IntegrationMethod;
use crate::data::particle::Particle;
use crate::error::{SpError, SpResult};

/// maximal runs of indices where `signal[i] > level`, as inclusive `(left, right)` pairs
pub fn runs_above(signal: &[f64], level: f64) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;
    for (i, v) in signal.iter().enumerate() {
        match (start, *v > level) {
            (None, true) => start = Some(i),
            (Some(s), false) => {
                runs.push((s, i - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, signal.len() - 1));
    }
    runs
}

/// find particle events in a signal
///
/// Runs are identified on the smoothed signal when `apply_smoothing` is set and on
/// the raw signal otherwise. Heights and integrated counts are always taken from
/// the raw signal. Rejected candidates are left out of the result.
///
/// Arguments:
///
/// * `time` - time of each bin
/// * `smoothed_signal` - smoothed counts, same length as the raw signal
/// * `raw_signal` - raw counts
/// * `lambda_background` - background mean per bin, subtracted from the integrated counts
/// * `threshold` - a bin belongs to a run when it strictly exceeds this value
/// * `min_continuous_points` - shortest run accepted as a particle
/// * `apply_smoothing` - detect on the smoothed signal
/// * `integration_method` - bounds used for integration
///
/// Returns:
///
/// * `SpResult<Vec<Particle>>` - particles in ascending signal order, or a data error
///   when the arrays differ in length
///
/// # Examples
///
/// ```
/// use spcore::algorithm::detection::find_particles;
/// use spcore::data::params::IntegrationMethod;
///
/// let raw = vec![0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 0.0, 0.0, 10.0, 0.0];
/// let time: Vec<f64> = (0..10).map(|i| i as f64).collect();
/// let particles = find_particles(&time, &raw, &raw, 0.0, 5.0, 1, false, IntegrationMethod::Background).unwrap();
/// assert_eq!(particles.len(), 2);
/// assert_eq!((particles[0].left_idx, particles[0].right_idx), (3, 5));
/// ```
#[allow(clippy::too_many_arguments)]
pub fn find_particles(
    time: &[f64],
    smoothed_signal: &[f64],
    raw_signal: &[f64],
    lambda_background: f64,
    threshold: f64,
    min_continuous_points: usize,
    apply_smoothing: bool,
    integration_method: IntegrationMethod,
) -> SpResult<Vec<Particle>> {
    if time.len() != raw_signal.len() || smoothed_signal.len() != raw_signal.len() {
        return Err(SpError::data(format!(
            "signal arrays differ in length: time {}, smoothed {}, raw {}",
            time.len(),
            smoothed_signal.len(),
            raw_signal.len()
        )));
    }

    let detection_signal = if apply_smoothing { smoothed_signal } else { raw_signal };
    let min_points = min_continuous_points.max(1);

    let runs: Vec<(usize, usize)> = runs_above(detection_signal, threshold)
        .into_iter()
        .filter(|(left, right)| right - left + 1 >= min_points)
        .collect();

    let bounds = match integration_method {
        IntegrationMethod::Background => runs,
        IntegrationMethod::Extended => extend_to_background(detection_signal, &runs, lambda_background),
    };

    Ok(bounds
        .into_iter()
        .map(|(left, right)| integrate(raw_signal, left, right, lambda_background, threshold))
        .collect())
}

/// widen runs while the signal stays above the background, merging overlaps
fn extend_to_background(signal: &[f64], runs: &[(usize, usize)], lambda: f64) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(runs.len());
    for &(left, right) in runs {
        let mut l = left;
        while l > 0 && signal[l - 1] > lambda {
            l -= 1;
        }
        let mut r = right;
        while r + 1 < signal.len() && signal[r + 1] > lambda {
            r += 1;
        }
        match merged.last_mut() {
            Some(last) if l <= last.1 + 1 => last.1 = last.1.max(r),
            _ => merged.push((l, r)),
        }
    }
    merged
}

fn integrate(raw_signal: &[f64], left: usize, right: usize, lambda: f64, threshold: f64) -> Particle {
    let region = &raw_signal[left..=right];
    let mut peak_idx = left;
    let mut max_height = region[0];
    for (offset, v) in region.iter().enumerate() {
        if *v > max_height {
            max_height = *v;
            peak_idx = left + offset;
        }
    }
    // no clamping, a negative total is a valid noisy event
    let total_counts = region.iter().sum::<f64>() - region.len() as f64 * lambda;
    let snr = if threshold > 0.0 { max_height / threshold } else { 0.0 };

    Particle { left_idx: left, right_idx: right, peak_idx, total_counts, max_height, snr }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::smoothing::smooth;
    use crate::data::signal::time_array;

    fn detect(raw: &[f64], lambda: f64, threshold: f64, min_points: usize) -> Vec<Particle> {
        let time = time_array(raw.len(), 1e-4);
        find_particles(&time, raw, raw, lambda, threshold, min_points, false, IntegrationMethod::Background).unwrap()
    }

    #[test]
    fn test_run_detection() {
        let raw = [0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 0.0, 0.0, 10.0, 0.0];
        let particles = detect(&raw, 0.0, 5.0, 1);
        let bounds: Vec<(usize, usize)> = particles.iter().map(|p| (p.left_idx, p.right_idx)).collect();
        assert_eq!(bounds, vec![(3, 5), (8, 8)]);

        let particles = detect(&raw, 0.0, 5.0, 2);
        let bounds: Vec<(usize, usize)> = particles.iter().map(|p| (p.left_idx, p.right_idx)).collect();
        assert_eq!(bounds, vec![(3, 5)]);
    }

    #[test]
    fn test_height_uses_raw_signal() {
        let raw = vec![0.0, 0.0, 12.0, 0.0, 0.0];
        let smoothed = smooth(&raw, 3, 1).unwrap();
        let time = time_array(raw.len(), 1.0);
        let particles =
            find_particles(&time, &smoothed, &raw, 0.0, 3.0, 1, true, IntegrationMethod::Background).unwrap();
        assert_eq!(particles.len(), 1);
        assert_eq!((particles[0].left_idx, particles[0].right_idx), (1, 3));
        assert_eq!(particles[0].max_height, 12.0);
        assert_eq!(particles[0].peak_idx, 2);
        assert!(smoothed[2] < 12.0);
    }

    #[test]
    fn test_background_subtraction() {
        let (h, n, lambda) = (7.0, 4usize, 1.5);
        let mut raw = vec![1.0; 3];
        raw.extend(std::iter::repeat(h).take(n));
        raw.extend([1.0; 3]);
        let particles = detect(&raw, lambda, 5.0, 1);
        assert_eq!(particles.len(), 1);
        assert_eq!(particles[0].total_counts, n as f64 * (h - lambda));
    }

    #[test]
    fn test_negative_counts_preserved() {
        let raw = [0.0, 6.0, 0.0];
        let particles = detect(&raw, 8.0, 5.0, 1);
        assert_eq!(particles.len(), 1);
        assert_eq!(particles[0].total_counts, -2.0);
    }

    #[test]
    fn test_runs_touching_edges() {
        let raw = [9.0, 9.0, 0.0, 0.0, 9.0];
        let particles = detect(&raw, 0.0, 5.0, 1);
        assert_eq!(particles.len(), 2);
        assert_eq!(particles[0].left_idx, 0);
        assert_eq!(particles[1].right_idx, 4);

        let all_above = detect(&[9.0; 4], 0.0, 5.0, 1);
        assert_eq!((all_above[0].left_idx, all_above[0].right_idx), (0, 3));
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(detect(&[5.0, 5.0, 5.0], 0.0, 5.0, 1).is_empty());
        assert!(detect(&[], 0.0, 5.0, 1).is_empty());
    }

    #[test]
    fn test_snr() {
        let particles = detect(&[0.0, 30.0, 0.0], 0.0, 5.0, 1);
        assert_eq!(particles[0].snr, 6.0);
        assert!(particles[0].peak_valid());
        let zero_threshold = detect(&[0.0, 1.0, 0.0], 0.0, 0.0, 1);
        assert_eq!(zero_threshold[0].snr, 0.0);
    }

    #[test]
    fn test_extended_integration() {
        // two threshold runs inside one above-background region merge into one particle
        let raw = vec![0.0, 2.0, 8.0, 3.0, 9.0, 2.0, 0.0, 0.0, 8.0, 0.0];
        let time = time_array(raw.len(), 1.0);
        let particles =
            find_particles(&time, &raw, &raw, 1.0, 5.0, 1, false, IntegrationMethod::Extended).unwrap();
        let bounds: Vec<(usize, usize)> = particles.iter().map(|p| (p.left_idx, p.right_idx)).collect();
        assert_eq!(bounds, vec![(1, 5), (8, 8)]);
        assert_eq!(particles[0].total_counts, 24.0 - 5.0);
        assert_eq!(particles[0].max_height, 9.0);
        assert_eq!(particles[0].peak_idx, 4);
    }

    #[test]
    fn test_length_mismatch_is_data_error() {
        let err = find_particles(&[0.0], &[1.0, 2.0], &[1.0, 2.0], 0.0, 1.0, 1, false, IntegrationMethod::Background)
            .unwrap_err();
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_runs_above() {
        assert_eq!(runs_above(&[1.0, 0.0, 1.0, 1.0], 0.5), vec![(0, 0), (2, 3)]);
        assert!(runs_above(&[0.0, 0.0], 0.5).is_empty());
    }
}
