use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use spcore::calibration::units::ConcentrationUnit;
use spcore::data::params::DetectionParameters;
use spcore::SpError;

use crate::data::loader::DelimitedTextLoader;
use crate::error::TrackResult;
use crate::logging::LogConfig;

/// label used for a mass channel in configuration and output, e.g. "107" or "196.97"
pub fn channel_label(mass: f64) -> String {
    format!("{}", mass)
}

/// Density and sensitivity needed to size the particles of one channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelSizing {
    pub density_g_cm3: f64,
    /// counts per fg of analyte
    pub counts_per_fg: f64,
}

/// Settings of a detection batch, read from a JSON document.
///
/// Parameter lookup goes from the most to the least specific entry: the
/// sample's override, then the channel's override, then `detection`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    pub detection: DetectionParameters,
    /// keyed by sample name
    pub samples: BTreeMap<String, DetectionParameters>,
    /// keyed by channel label
    pub channels: BTreeMap<String, DetectionParameters>,
    /// masses to analyse, all channels when empty
    pub masses: Vec<f64>,
    /// worker threads for batches, 0 lets rayon decide
    pub workers: usize,
    pub concentration_unit: ConcentrationUnit,
    /// keyed by channel label
    pub sizing: BTreeMap<String, ChannelSizing>,
    pub loader: DelimitedTextLoader,
    pub log: LogConfig,
}

impl Default for TrackConfig {
    fn default() -> Self {
        TrackConfig {
            detection: DetectionParameters::default(),
            samples: BTreeMap::new(),
            channels: BTreeMap::new(),
            masses: Vec::new(),
            workers: 0,
            concentration_unit: ConcentrationUnit::default(),
            sizing: BTreeMap::new(),
            loader: DelimitedTextLoader::default(),
            log: LogConfig::default(),
        }
    }
}

impl TrackConfig {
    /// read and validate a configuration file
    pub fn from_path(path: &Path) -> TrackResult<Self> {
        let config: TrackConfig = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> TrackResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// check every parameter set before any sample is touched
    pub fn validate(&self) -> TrackResult<()> {
        self.detection.validate()?;
        for (name, params) in self.samples.iter().chain(self.channels.iter()) {
            params
                .validate()
                .map_err(|e| SpError::configuration(format!("override '{}': {}", name, e)))?;
        }
        for (label, sizing) in &self.sizing {
            if !(sizing.counts_per_fg > 0.0) {
                return Err(SpError::configuration(format!("channel {}: counts per fg must be positive", label)).into());
            }
        }
        Ok(())
    }

    pub fn parameters_for(&self, sample: &str, channel: &str) -> &DetectionParameters {
        self.samples
            .get(sample)
            .or_else(|| self.channels.get(channel))
            .unwrap_or(&self.detection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spcore::data::params::DetectionMethod;

    #[test]
    fn test_partial_document_uses_defaults() {
        let json = r#"{
            "detection": {"method": "Currie", "alpha": 0.001},
            "channels": {"107": {"method": "Manual", "manual_threshold": 12.0}},
            "workers": 2
        }"#;
        let config: TrackConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.detection.method, DetectionMethod::Currie);
        assert_eq!(config.detection.max_iterations, 4);
        assert_eq!(config.parameters_for("any", "107").method, DetectionMethod::Manual);
        assert_eq!(config.parameters_for("any", "197").method, DetectionMethod::Currie);
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn test_sample_override_wins() {
        let mut config = TrackConfig::default();
        config.channels.insert("107".to_string(), DetectionParameters::with_method(DetectionMethod::Manual));
        config.samples.insert("blank".to_string(), DetectionParameters::with_method(DetectionMethod::FormulaC));
        assert_eq!(config.parameters_for("blank", "107").method, DetectionMethod::FormulaC);
        assert_eq!(config.parameters_for("std", "107").method, DetectionMethod::Manual);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = TrackConfig::default();
        config.samples.insert("s".to_string(), DetectionParameters::default().with_alpha(0.5));
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = TrackConfig::default();
        config.masses = vec![107.0, 197.0];
        config.sizing.insert("197".to_string(), ChannelSizing { density_g_cm3: 19.32, counts_per_fg: 25.0 });
        config.save(&path).unwrap();
        assert_eq!(TrackConfig::from_path(&path).unwrap(), config);
    }

    #[test]
    fn test_channel_label() {
        assert_eq!(channel_label(107.0), "107");
        assert_eq!(channel_label(196.97), "196.97");
    }
}
