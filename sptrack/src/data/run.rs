use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use spcore::data::signal::{time_array, Signal};
use spcore::SpError;

use crate::error::TrackResult;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SegmentInfo {
    pub acquisition_period_ns: f64,
}

/// Acquisition metadata of one run as written by the instrument software.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunInfo {
    pub sample_name: String,
    pub segment_info: Vec<SegmentInfo>,
    #[serde(default = "one")]
    pub num_accumulations1: u32,
    #[serde(default = "one")]
    pub num_accumulations2: u32,
    /// keys this crate does not interpret, kept for round-tripping
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn one() -> u32 {
    1
}

impl RunInfo {
    /// run info for data that only carries a dwell time, e.g. text exports
    pub fn from_dwell_time(sample_name: &str, dwell_time_s: f64) -> Self {
        RunInfo {
            sample_name: sample_name.to_string(),
            segment_info: vec![SegmentInfo { acquisition_period_ns: dwell_time_s * 1e9 }],
            num_accumulations1: 1,
            num_accumulations2: 1,
            extra: BTreeMap::new(),
        }
    }

    /// dwell time per bin in seconds
    ///
    /// Arguments:
    ///
    /// * `self` - run info with at least one segment
    ///
    /// Returns:
    ///
    /// * `TrackResult<f64>` - acquisition period of the first segment times both
    ///   accumulation counts, a data error when it is missing or not positive
    pub fn dwell_time_s(&self) -> TrackResult<f64> {
        let segment = self
            .segment_info
            .first()
            .ok_or_else(|| SpError::data(format!("run '{}' has no segment info", self.sample_name)))?;
        let dwell = segment.acquisition_period_ns
            * 1e-9
            * f64::from(self.num_accumulations1)
            * f64::from(self.num_accumulations2);
        if dwell > 0.0 && dwell.is_finite() {
            Ok(dwell)
        } else {
            Err(SpError::data(format!("run '{}' has non-positive dwell time {}", self.sample_name, dwell)).into())
        }
    }
}

/// Counts of all mass channels of one run, `signals[bin][channel]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawRun {
    pub masses: Vec<f64>,
    pub signals: Vec<Vec<f64>>,
    pub run_info: RunInfo,
    /// measured time axis in seconds, regular bins when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Vec<f64>>,
}

impl RawRun {
    pub fn new(masses: Vec<f64>, signals: Vec<Vec<f64>>, run_info: RunInfo) -> TrackResult<Self> {
        let run = RawRun { masses, signals, run_info, time: None };
        run.check_shape()?;
        Ok(run)
    }

    pub fn check_shape(&self) -> TrackResult<()> {
        if let Some((i, row)) = self.signals.iter().enumerate().find(|(_, row)| row.len() != self.masses.len()) {
            return Err(SpError::data(format!(
                "bin {} of '{}' has {} values for {} masses",
                i,
                self.run_info.sample_name,
                row.len(),
                self.masses.len()
            ))
            .into());
        }
        if let Some(time) = &self.time {
            if time.len() != self.signals.len() {
                return Err(SpError::data(format!(
                    "time axis of '{}' has {} values for {} bins",
                    self.run_info.sample_name,
                    time.len(),
                    self.signals.len()
                ))
                .into());
            }
        }
        Ok(())
    }

    pub fn sample_name(&self) -> &str {
        &self.run_info.sample_name
    }

    pub fn bin_count(&self) -> usize {
        self.signals.len()
    }

    /// index of the channel whose mass is closest to `mass`
    pub fn channel_for_mass(&self, mass: f64) -> Option<usize> {
        self.masses
            .iter()
            .enumerate()
            .min_by(|a, b| (a.1 - mass).abs().total_cmp(&(b.1 - mass).abs()))
            .map(|(i, _)| i)
    }

    /// counts of one channel over time
    pub fn channel(&self, index: usize) -> TrackResult<Vec<f64>> {
        if index >= self.masses.len() {
            return Err(SpError::data(format!(
                "channel {} out of range for '{}' with {} masses",
                index,
                self.run_info.sample_name,
                self.masses.len()
            ))
            .into());
        }
        Ok(self.signals.iter().map(|row| row[index]).collect())
    }

    pub fn time_array(&self) -> TrackResult<Vec<f64>> {
        match &self.time {
            Some(time) => Ok(time.clone()),
            None => Ok(time_array(self.bin_count(), self.run_info.dwell_time_s()?)),
        }
    }

    /// one channel as a core signal with its time axis
    pub fn signal(&self, index: usize) -> TrackResult<Signal> {
        let counts = self.channel(index)?;
        let dwell = self.run_info.dwell_time_s()?;
        let signal = match &self.time {
            Some(time) => Signal::with_time(counts, time.clone(), dwell)?,
            None => Signal::new(counts, dwell)?,
        };
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const RUN_INFO: &str = r#"{
        "SampleName": "Au 60nm",
        "SegmentInfo": [{"AcquisitionPeriodNs": 48000.0}],
        "NumAccumulations1": 1,
        "NumAccumulations2": 2,
        "AnalysisDateTime": "2024-03-01T10:00:00"
    }"#;

    #[test]
    fn test_dwell_time() {
        let info: RunInfo = serde_json::from_str(RUN_INFO).unwrap();
        assert_relative_eq!(info.dwell_time_s().unwrap(), 9.6e-5, epsilon = 1e-15);
        assert!(info.extra.contains_key("AnalysisDateTime"));

        let zero = RunInfo { num_accumulations1: 0, ..info.clone() };
        assert!(zero.dwell_time_s().is_err());
        let empty = RunInfo { segment_info: vec![], ..info };
        assert!(empty.dwell_time_s().is_err());
    }

    #[test]
    fn test_channels() {
        let info = RunInfo::from_dwell_time("s", 1e-3);
        let run = RawRun::new(vec![106.9, 196.97], vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]], info).unwrap();
        assert_eq!(run.channel_for_mass(197.0), Some(1));
        assert_eq!(run.channel_for_mass(107.0), Some(0));
        assert_eq!(run.channel(1).unwrap(), vec![2.0, 4.0, 6.0]);
        assert!(run.channel(2).is_err());
        assert_eq!(run.time_array().unwrap().len(), 3);
        assert_eq!(run.signal(0).unwrap().counts, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let info = RunInfo::from_dwell_time("s", 1e-3);
        assert!(RawRun::new(vec![1.0, 2.0], vec![vec![1.0]], info).is_err());
    }
}
