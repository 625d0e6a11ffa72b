use serde::{Deserialize, Serialize};

use crate::error::{SpError, SpResult};

/// A single mass channel recorded over time, one count value per dwell-time bin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub counts: Vec<f64>,
    pub time: Vec<f64>,
    pub dwell_time: f64,
}

impl Signal {
    /// create a signal with a regular time axis `time[i] = i * dwell_time`
    ///
    /// Arguments:
    ///
    /// * `counts` - non-negative counts per bin
    /// * `dwell_time` - integration time per bin in seconds
    ///
    /// Returns:
    ///
    /// * `SpResult<Signal>` - the signal, or a data error for a non-positive dwell time
    ///   or negative / non-finite counts
    ///
    /// # Examples
    ///
    /// ```
    /// use spcore::data::signal::Signal;
    ///
    /// let signal = Signal::new(vec![0.0, 2.0, 1.0], 0.5).unwrap();
    /// assert_eq!(signal.time, vec![0.0, 0.5, 1.0]);
    /// ```
    pub fn new(counts: Vec<f64>, dwell_time: f64) -> SpResult<Self> {
        if !(dwell_time > 0.0) || !dwell_time.is_finite() {
            return Err(SpError::data(format!("dwell time must be positive, got {}", dwell_time)));
        }
        check_counts(&counts)?;
        let time = time_array(counts.len(), dwell_time);
        Ok(Signal { counts, time, dwell_time })
    }

    /// create a signal with an explicit time axis, e.g. read from a time column
    pub fn with_time(counts: Vec<f64>, time: Vec<f64>, dwell_time: f64) -> SpResult<Self> {
        if counts.len() != time.len() {
            return Err(SpError::data(format!(
                "signal has {} bins but time axis has {}",
                counts.len(),
                time.len()
            )));
        }
        if !(dwell_time > 0.0) || !dwell_time.is_finite() {
            return Err(SpError::data(format!("dwell time must be positive, got {}", dwell_time)));
        }
        check_counts(&counts)?;
        Ok(Signal { counts, time, dwell_time })
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// total acquisition time covered by the signal in seconds
    pub fn duration(&self) -> f64 {
        self.counts.len() as f64 * self.dwell_time
    }

    /// counts converted to counts per second
    pub fn cps(&self) -> Vec<f64> {
        self.counts.iter().map(|c| c / self.dwell_time).collect()
    }

    /// the leading part of the signal with `time <= seconds`
    pub fn head_seconds(&self, seconds: f64) -> &[f64] {
        let n = self.time.iter().take_while(|&&t| t <= seconds).count();
        &self.counts[..n]
    }
}

/// regular time axis for `n` bins of width `dwell_time`
pub fn time_array(n: usize, dwell_time: f64) -> Vec<f64> {
    (0..n).map(|i| i as f64 * dwell_time).collect()
}

fn check_counts(counts: &[f64]) -> SpResult<()> {
    if let Some((i, c)) = counts.iter().enumerate().find(|(_, c)| !c.is_finite() || **c < 0.0) {
        return Err(SpError::data(format!("invalid count {} at bin {}", c, i)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_axis_matches_length() {
        let signal = Signal::new(vec![1.0; 10], 1e-4).unwrap();
        assert_eq!(signal.time.len(), signal.counts.len());
        assert!((signal.time[9] - 9e-4).abs() < 1e-15);
        assert!((signal.duration() - 1e-3).abs() < 1e-15);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(Signal::new(vec![1.0], 0.0).is_err());
        assert!(Signal::new(vec![1.0, -1.0], 1.0).is_err());
        assert!(Signal::new(vec![f64::NAN], 1.0).is_err());
        assert!(Signal::with_time(vec![1.0, 2.0], vec![0.0], 1.0).is_err());
    }

    #[test]
    fn test_head_seconds() {
        let signal = Signal::new(vec![1.0, 2.0, 3.0, 4.0], 2.0).unwrap();
        // times 0, 2, 4, 6
        assert_eq!(signal.head_seconds(5.0), &[1.0, 2.0, 3.0]);
        assert_eq!(signal.cps(), vec![0.5, 1.0, 1.5, 2.0]);
    }
}
