use crate::data::params::validate_window;
use crate::error::SpResult;

/// iterative moving-average smoothing
///
/// Each pass replaces a bin by the mean of the `window_length` bins centred on it.
/// The signal is extended by repeating its first and last bin, so the output
/// always has the input's length.
///
/// Arguments:
///
/// * `signal` - counts per bin
/// * `window_length` - odd window width, at least 3
/// * `iterations` - number of passes, each consuming the previous output
///
/// Returns:
///
/// * `SpResult<Vec<f64>>` - smoothed copy; a configuration error for an even or
///   too small window (only checked when at least one pass runs)
///
/// # Examples
///
/// ```
/// use spcore::algorithm::smoothing::smooth;
///
/// let smoothed = smooth(&[0.0, 3.0, 0.0, 3.0, 0.0], 3, 1).unwrap();
/// assert_eq!(smoothed, vec![1.0, 1.0, 2.0, 1.0, 1.0]);
/// assert_eq!(smooth(&[1.0, 2.0], 4, 0).unwrap(), vec![1.0, 2.0]);
/// ```
pub fn smooth(signal: &[f64], window_length: usize, iterations: usize) -> SpResult<Vec<f64>> {
    if iterations == 0 {
        return Ok(signal.to_vec());
    }
    validate_window(window_length)?;

    let mut current = signal.to_vec();
    for _ in 0..iterations {
        current = moving_average(&current, window_length / 2);
    }
    Ok(current)
}

fn moving_average(signal: &[f64], half: usize) -> Vec<f64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let width = 2 * half + 1;
    let first = signal[0];
    let last = signal[n - 1];

    // prefix sums over the edge-padded signal keep each pass linear
    let mut prefix = Vec::with_capacity(n + 2 * half + 1);
    prefix.push(0.0);
    let padded = std::iter::repeat(first)
        .take(half)
        .chain(signal.iter().copied())
        .chain(std::iter::repeat(last).take(half));
    for v in padded {
        let acc = prefix[prefix.len() - 1] + v;
        prefix.push(acc);
    }

    (0..n).map(|i| (prefix[i + width] - prefix[i]) / width as f64).collect()
}
