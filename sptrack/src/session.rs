use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use spcore::algorithm::background::{detect_threshold, ThresholdMetadata};
use spcore::algorithm::detection::find_particles;
use spcore::algorithm::multi_element::{group_multi_element, ElementEvent, MultiElementParticle, MIN_OVERLAP_FRACTION};
use spcore::calibration::ionic::{IsotopeCalibration, StandardResponse};
use spcore::calibration::transport::{calculate_mass_limits, size_distribution, MassLimits};
use spcore::calibration::units::concentration_from_sample_name;
use spcore::data::params::DetectionParameters;
use spcore::data::particle::Particle;
use tracing::warn;

use crate::config::{channel_label, TrackConfig};
use crate::data::run::RawRun;
use crate::error::TrackResult;

/// channels further than this from a requested mass are not matched
const MASS_TOLERANCE: f64 = 0.5;

/// A particle together with its position on the run's time axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedParticle {
    #[serde(flatten)]
    pub particle: Particle,
    pub start_time: f64,
    pub end_time: f64,
}

/// Detection outcome of one channel of one sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelResult {
    pub mass: f64,
    pub lambda_background: f64,
    pub threshold: f64,
    pub mean_signal: f64,
    pub metadata: ThresholdMetadata,
    pub particles: Vec<DetectedParticle>,
    /// parameters the result was computed with
    pub fingerprint: String,
}

/// stable text form of a parameter set, used to spot channels that need a rerun
pub fn fingerprint(params: &DetectionParameters) -> String {
    serde_json::to_string(params).unwrap_or_else(|_| format!("{:?}", params))
}

/// run background estimation and particle detection on one channel
///
/// Arguments:
///
/// * `run` - the sample's raw data
/// * `channel` - channel index into `run.masses`
/// * `params` - detection parameters
///
/// Returns:
///
/// * `TrackResult<ChannelResult>` - the threshold and the particles found
pub fn detect_channel(run: &RawRun, channel: usize, params: &DetectionParameters) -> TrackResult<ChannelResult> {
    let signal = run.signal(channel)?;
    let threshold = detect_threshold(&signal.counts, params)?;
    let particles = find_particles(
        &signal.time,
        &threshold.smoothed_signal,
        &signal.counts,
        threshold.lambda_background,
        threshold.threshold,
        params.min_continuous_points,
        params.apply_smoothing,
        params.integration_method,
    )?;
    let particles = particles
        .into_iter()
        .map(|p| DetectedParticle { start_time: p.start_time(&signal.time), end_time: p.end_time(&signal.time), particle: p })
        .collect();

    Ok(ChannelResult {
        mass: run.masses[channel],
        lambda_background: threshold.lambda_background,
        threshold: threshold.threshold,
        mean_signal: threshold.mean_signal,
        metadata: threshold.metadata,
        particles,
        fingerprint: fingerprint(params),
    })
}

/// Loaded samples, their parameters and their latest detection results.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub config: TrackConfig,
    pub samples: BTreeMap<String, RawRun>,
    /// sample name -> channel label -> result
    pub results: BTreeMap<String, BTreeMap<String, ChannelResult>>,
}

impl AnalysisSession {
    pub fn new(config: TrackConfig) -> Self {
        AnalysisSession { config, samples: BTreeMap::new(), results: BTreeMap::new() }
    }

    /// add or replace a sample, dropping results computed on different data
    pub fn add_run(&mut self, run: RawRun) {
        let name = run.sample_name().to_string();
        if self.samples.get(&name) != Some(&run) {
            self.results.remove(&name);
        }
        self.samples.insert(name, run);
    }

    /// channels of a sample selected for analysis as `(index, mass)`
    pub fn selected_channels(&self, sample: &str) -> Vec<(usize, f64)> {
        let Some(run) = self.samples.get(sample) else {
            return Vec::new();
        };
        if self.config.masses.is_empty() {
            return run.masses.iter().copied().enumerate().collect();
        }
        let mut channels: Vec<(usize, f64)> = self
            .config
            .masses
            .iter()
            .filter_map(|m| run.channel_for_mass(*m).filter(|i| (run.masses[*i] - m).abs() <= MASS_TOLERANCE))
            .map(|i| (i, run.masses[i]))
            .collect();
        channels.sort_by_key(|c| c.0);
        channels.dedup_by_key(|c| c.0);
        channels
    }

    pub fn parameters_for(&self, sample: &str, mass: f64) -> &DetectionParameters {
        self.config.parameters_for(sample, &channel_label(mass))
    }

    /// selected channels with no result or a result from other parameters
    pub fn changed_channels(&self) -> Vec<(String, usize, f64)> {
        let mut changed = Vec::new();
        for sample in self.samples.keys() {
            for (index, mass) in self.selected_channels(sample) {
                let current = fingerprint(self.parameters_for(sample, mass));
                let stored = self
                    .results
                    .get(sample)
                    .and_then(|r| r.get(&channel_label(mass)))
                    .map(|r| r.fingerprint.as_str());
                if stored != Some(current.as_str()) {
                    changed.push((sample.clone(), index, mass));
                }
            }
        }
        changed
    }

    pub fn record(&mut self, sample: &str, result: ChannelResult) {
        self.results
            .entry(sample.to_string())
            .or_default()
            .insert(channel_label(result.mass), result);
    }

    /// events of all channels of a sample grouped into multi-element particles
    pub fn multi_element_particles(&self, sample: &str) -> Vec<MultiElementParticle> {
        let events: Vec<ElementEvent> = self
            .results
            .get(sample)
            .into_iter()
            .flat_map(|channels| channels.iter())
            .flat_map(|(label, result)| {
                result.particles.iter().map(move |p| ElementEvent {
                    label: label.clone(),
                    start_time: p.start_time,
                    end_time: p.end_time,
                    counts: p.particle.total_counts,
                })
            })
            .collect();
        group_multi_element(&events, MIN_OVERLAP_FRACTION)
    }

    /// particle diameters in nm of one channel, `None` when the channel has no usable sizing
    pub fn size_distribution(&self, sample: &str, mass: f64) -> Option<Vec<f64>> {
        let label = channel_label(mass);
        let result = self.results.get(sample)?.get(&label)?;
        let sizing = match self.config.sizing.get(&label) {
            Some(s) if s.density_g_cm3 > 0.0 => s,
            _ => {
                warn!(sample, channel = %label, "no valid density, skipping size distribution");
                return None;
            }
        };
        let particles: Vec<Particle> = result.particles.iter().map(|p| p.particle.clone()).collect();
        Some(size_distribution(&particles, sizing.counts_per_fg, sizing.density_g_cm3))
    }

    /// mass and size detection limits of one detected channel
    ///
    /// Uses the channel's detection limit above background, the run's dwell
    /// time, the configured concentration unit and the sizing density when set.
    pub fn mass_limits(&self, sample: &str, mass: f64, ionic_slope: f64, transport_rate_ul_s: f64) -> Option<MassLimits> {
        let label = channel_label(mass);
        let result = self.results.get(sample)?.get(&label)?;
        let dwell = self.samples.get(sample).and_then(|run| run.run_info.dwell_time_s().ok()).unwrap_or(0.0);
        let density = self.config.sizing.get(&label).map(|s| s.density_g_cm3).filter(|d| *d > 0.0);
        calculate_mass_limits(
            result.metadata.lod_mdl,
            result.lambda_background,
            dwell,
            ionic_slope,
            self.config.concentration_unit,
            transport_rate_ul_s,
            density,
        )
    }

    /// ionic calibration of every selected channel from the loaded standards
    ///
    /// Concentrations come from the sample names in the configured unit; samples
    /// whose name carries none are not used. Channels with fewer than two usable
    /// standards get no calibration.
    pub fn ionic_calibration(&self) -> BTreeMap<String, IsotopeCalibration> {
        let unit = self.config.concentration_unit;
        let mut responses: BTreeMap<String, Vec<StandardResponse>> = BTreeMap::new();
        for (sample, run) in &self.samples {
            let Some(concentration) = concentration_from_sample_name(sample, unit) else {
                warn!(sample = %sample, "no concentration in sample name, not used as standard");
                continue;
            };
            for (index, mass) in self.selected_channels(sample) {
                match run.signal(index) {
                    Ok(signal) => responses
                        .entry(channel_label(mass))
                        .or_default()
                        .push(StandardResponse::from_cps(concentration, &signal.cps())),
                    Err(e) => warn!(sample = %sample, mass, error = %e, "standard skipped"),
                }
            }
        }
        responses
            .into_iter()
            .filter_map(|(label, standards)| IsotopeCalibration::fit(&standards).map(|c| (label, c)))
            .collect()
    }

    pub fn save(&self, path: &Path) -> TrackResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> TrackResult<Self> {
        let session: AnalysisSession = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        session.config.validate()?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::config::ChannelSizing;
    use crate::data::run::RunInfo;
    use spcore::data::params::DetectionMethod;

    fn run(name: &str) -> RawRun {
        let mut signals = vec![vec![1.0, 0.0]; 40];
        for row in signals.iter_mut().skip(10).take(3) {
            row[0] = 50.0;
        }
        signals[10][1] = 80.0;
        signals[11][1] = 80.0;
        RawRun::new(vec![107.0, 197.0], signals, RunInfo::from_dwell_time(name, 1e-4)).unwrap()
    }

    fn manual_session() -> AnalysisSession {
        let mut config = TrackConfig::default();
        config.detection = DetectionParameters::with_method(DetectionMethod::Manual);
        let mut session = AnalysisSession::new(config);
        session.add_run(run("a"));
        session.add_run(run("b"));
        session
    }

    #[test]
    fn test_detect_channel() {
        let session = manual_session();
        let result = detect_channel(&session.samples["a"], 0, session.parameters_for("a", 107.0)).unwrap();
        assert_eq!(result.particles.len(), 1);
        assert_eq!(result.particles[0].particle.left_idx, 10);
        assert_relative_eq!(result.particles[0].start_time, 1e-3, epsilon = 1e-12);
        assert_eq!(result.lambda_background, 1.0);
    }

    #[test]
    fn test_changed_channels_tracks_parameters() {
        let mut session = manual_session();
        assert_eq!(session.changed_channels().len(), 4);

        for (sample, index, mass) in session.changed_channels() {
            let result = detect_channel(&session.samples[&sample], index, session.parameters_for(&sample, mass)).unwrap();
            session.record(&sample, result);
        }
        assert!(session.changed_channels().is_empty());

        session
            .config
            .channels
            .insert("197".to_string(), DetectionParameters::with_method(DetectionMethod::Currie));
        let changed = session.changed_channels();
        assert_eq!(changed, vec![("a".to_string(), 1, 197.0), ("b".to_string(), 1, 197.0)]);
    }

    #[test]
    fn test_selected_channels() {
        let mut session = manual_session();
        session.config.masses = vec![196.97, 56.0];
        assert_eq!(session.selected_channels("a"), vec![(1, 197.0)]);
        assert!(session.selected_channels("missing").is_empty());
    }

    #[test]
    fn test_multi_element_and_sizing() {
        let mut session = manual_session();
        for (index, mass) in session.selected_channels("a") {
            let result = detect_channel(&session.samples["a"], index, session.parameters_for("a", mass)).unwrap();
            session.record("a", result);
        }
        let groups = session.multi_element_particles("a");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].element_count(), 2);

        assert_eq!(session.size_distribution("a", 197.0), None);
        session.config.sizing.insert("197".to_string(), ChannelSizing { density_g_cm3: 19.32, counts_per_fg: 10.0 });
        assert_eq!(session.size_distribution("a", 197.0).map(|d| d.len()), Some(1));
    }

    #[test]
    fn test_ionic_calibration_from_names() {
        let mut session = AnalysisSession::new(TrackConfig::default());
        for (name, level) in [("blank", 0.0), ("Ag 1 ppb", 1.0), ("Ag 2 ppb", 2.0), ("rinse", 9.0)] {
            let signals = vec![vec![level * 10.0 + 1.0]; 20];
            session.add_run(RawRun::new(vec![107.0], signals, RunInfo::from_dwell_time(name, 0.01)).unwrap());
        }
        let calibrations = session.ionic_calibration();
        let ag = &calibrations["107"];
        assert_eq!(ag.x, vec![1.0, 2.0, 0.0]);
        let simple = ag.result(spcore::calibration::ionic::CalibrationMethod::SimpleLinear);
        assert_relative_eq!(simple.slope, 1000.0, epsilon = 1e-6);
        assert_relative_eq!(simple.intercept, 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_mass_limits_of_detected_channel() {
        let mut session = manual_session();
        assert_eq!(session.mass_limits("a", 107.0, 1000.0, 1.0), None);
        let result = detect_channel(&session.samples["a"], 0, session.parameters_for("a", 107.0)).unwrap();
        let lod = result.metadata.lod_mdl;
        session.record("a", result);

        let limits = session.mass_limits("a", 107.0, 1000.0, 1.0).unwrap();
        // 1000 cps per ppb at 1 µL/s is one count per fg
        assert_relative_eq!(limits.mdl_fg, lod, epsilon = 1e-9);
        assert_eq!(limits.sdl_nm, None);
        assert_relative_eq!(limits.background_cps, 1.0 / 1e-4, epsilon = 1e-6);

        session.config.sizing.insert("107".to_string(), ChannelSizing { density_g_cm3: 10.49, counts_per_fg: 1.0 });
        assert!(session.mass_limits("a", 107.0, 1000.0, 1.0).unwrap().sdl_nm.is_some());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut session = manual_session();
        let result = detect_channel(&session.samples["b"], 0, session.parameters_for("b", 107.0)).unwrap();
        session.record("b", result);
        session.save(&path).unwrap();
        let loaded = AnalysisSession::load(&path).unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_reload_keeps_cached_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut session = manual_session();
        for (index, mass) in session.selected_channels("b") {
            let result = detect_channel(&session.samples["b"], index, session.parameters_for("b", mass)).unwrap();
            session.record("b", result);
        }
        // end times that are not exactly representable in short decimal form
        let end = session.results["b"]["107"].particles[0].end_time;
        session.save(&path).unwrap();

        let mut loaded = AnalysisSession::load(&path).unwrap();
        assert_eq!(loaded.results["b"]["107"].particles[0].end_time.to_bits(), end.to_bits());
        assert_eq!(loaded.samples["b"], run("b"));

        loaded.add_run(run("b"));
        assert_eq!(loaded.results["b"].len(), 2);
        let changed: Vec<String> = loaded.changed_channels().into_iter().map(|c| c.0).collect();
        assert_eq!(changed, vec!["a".to_string(), "a".to_string()]);
    }
}
