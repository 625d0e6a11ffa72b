use serde::{Deserialize, Serialize};

use crate::algorithm::stats::{mean, median};

/// One detected event, bounds inclusive on both ends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub left_idx: usize,
    pub right_idx: usize,
    pub peak_idx: usize,
    /// background-subtracted integrated counts, may be negative
    pub total_counts: f64,
    /// raw-signal maximum over the event
    pub max_height: f64,
    pub snr: f64,
}

impl Particle {
    pub fn width(&self) -> usize {
        self.right_idx - self.left_idx + 1
    }

    /// time of the first bin of the event
    pub fn start_time(&self, time: &[f64]) -> f64 {
        time[self.left_idx]
    }

    /// time of the last bin of the event
    pub fn end_time(&self, time: &[f64]) -> f64 {
        time[self.right_idx]
    }

    pub fn peak_time(&self, time: &[f64]) -> f64 {
        time[self.peak_idx]
    }

    pub fn peak_valid(&self) -> bool {
        self.snr >= 3.0
    }
}

/// Aggregate of a sample's particle list, counting only particles with positive counts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleSummary {
    pub particle_count: usize,
    pub mean_counts: f64,
    pub median_counts: f64,
    pub mean_height: f64,
}

/// summarize a particle list
///
/// Arguments:
///
/// * `particles` - particles of one sample and channel
///
/// Returns:
///
/// * `ParticleSummary` - count and mean/median of the positive total counts
///
/// # Examples
///
/// ```
/// use spcore::data::particle::{particle_summary, Particle};
///
/// let p = |c: f64| Particle { left_idx: 0, right_idx: 0, peak_idx: 0, total_counts: c, max_height: c, snr: 1.0 };
/// let summary = particle_summary(&[p(2.0), p(4.0), p(-1.0)]);
/// assert_eq!(summary.particle_count, 2);
/// assert_eq!(summary.mean_counts, 3.0);
/// ```
pub fn particle_summary(particles: &[Particle]) -> ParticleSummary {
    let positive: Vec<&Particle> = particles.iter().filter(|p| p.total_counts > 0.0).collect();
    if positive.is_empty() {
        return ParticleSummary::default();
    }
    let counts: Vec<f64> = positive.iter().map(|p| p.total_counts).collect();
    let heights: Vec<f64> = positive.iter().map(|p| p.max_height).collect();

    ParticleSummary {
        particle_count: positive.len(),
        mean_counts: mean(&counts),
        median_counts: median(&counts),
        mean_height: mean(&heights),
    }
}
