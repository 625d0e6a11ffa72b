use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use spcore::SpError;
use tracing::{info, warn};

use crate::config::channel_label;
use crate::session::{detect_channel, AnalysisSession, ChannelResult};
use crate::error::{TrackError, TrackResult};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// worker threads, 0 lets rayon decide and 1 runs sequentially
    pub workers: usize,
    /// rerun every selected channel instead of only those with changed parameters
    pub force: bool,
}

/// One detected particle in the combined results table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleRow {
    pub sample_name: String,
    pub mass: f64,
    pub peak_start_s: f64,
    pub peak_end_s: f64,
    pub total_counts: f64,
    pub peak_height_counts: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub sample_name: String,
    pub mass: f64,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// all particles of the session, by sample name then start time
    pub rows: Vec<ParticleRow>,
    pub failures: Vec<BatchFailure>,
    /// channels detected in this run, cached results excluded
    pub channels_processed: usize,
}

struct SampleOutcome {
    sample: String,
    results: Vec<ChannelResult>,
    failures: Vec<BatchFailure>,
}

/// run detection over the samples of a session
///
/// Samples are independent and processed in parallel; a failing channel is
/// logged and reported without stopping the others. The cancel flag is
/// checked before each sample. Results of finished samples are kept in the
/// session even when the batch is cancelled.
///
/// Arguments:
///
/// * `session` - samples and parameters, receives the new results
/// * `options` - worker count and rerun policy
/// * `progress` - called with `(done, total)` samples after each sample
/// * `cancel` - set to stop before the next sample
///
/// Returns:
///
/// * `TrackResult<BatchReport>` - the combined table and the failures; a
///   configuration error before any work, or `Cancelled`
pub fn run_batch<F>(
    session: &mut AnalysisSession,
    options: &BatchOptions,
    progress: F,
    cancel: &AtomicBool,
) -> TrackResult<BatchReport>
where
    F: Fn(usize, usize) + Sync,
{
    session.config.validate()?;

    let work: Vec<(String, Vec<(usize, f64)>)> = if options.force {
        session.samples.keys().map(|s| (s.clone(), session.selected_channels(s))).collect()
    } else {
        let mut grouped: Vec<(String, Vec<(usize, f64)>)> = Vec::new();
        for (sample, index, mass) in session.changed_channels() {
            match grouped.last_mut() {
                Some((name, channels)) if *name == sample => channels.push((index, mass)),
                _ => grouped.push((sample, vec![(index, mass)])),
            }
        }
        grouped
    };

    let total = work.len();
    info!(samples = total, workers = options.workers, "starting detection batch");

    let pool = ThreadPoolBuilder::new()
        .num_threads(options.workers)
        .build()
        .map_err(|e| SpError::configuration(format!("cannot start worker pool: {}", e)))?;
    let done = AtomicUsize::new(0);
    let shared: &AnalysisSession = session;

    let outcomes: Vec<SampleOutcome> = pool.install(|| {
        work.par_iter()
            .filter_map(|(sample, channels)| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                let run = shared.samples.get(sample)?;
                let mut outcome = SampleOutcome { sample: sample.clone(), results: Vec::new(), failures: Vec::new() };
                for &(index, mass) in channels {
                    match detect_channel(run, index, shared.parameters_for(sample, mass)) {
                        Ok(result) => outcome.results.push(result),
                        Err(e) => {
                            warn!(sample = %sample, mass, error = %e, "detection failed, channel skipped");
                            outcome.failures.push(BatchFailure { sample_name: sample.clone(), mass, message: e.to_string() });
                        }
                    }
                }
                progress(done.fetch_add(1, Ordering::Relaxed) + 1, total);
                Some(outcome)
            })
            .collect()
    });

    let mut report = BatchReport::default();
    for outcome in outcomes {
        report.channels_processed += outcome.results.len();
        for result in outcome.results {
            session.record(&outcome.sample, result);
        }
        report.failures.extend(outcome.failures);
    }

    if cancel.load(Ordering::Relaxed) {
        warn!(finished = done.load(Ordering::Relaxed), total, "batch cancelled");
        return Err(TrackError::Cancelled);
    }

    report.failures.sort_by(|a, b| a.sample_name.cmp(&b.sample_name).then(a.mass.total_cmp(&b.mass)));
    report.rows = particle_rows(session);
    info!(particles = report.rows.len(), failures = report.failures.len(), "detection batch finished");
    Ok(report)
}

/// stored particles of the currently selected channels as table rows,
/// sorted by sample, start time and mass
///
/// Cached results of channels no longer selected are left out.
pub fn particle_rows(session: &AnalysisSession) -> Vec<ParticleRow> {
    let mut rows: Vec<ParticleRow> = session
        .results
        .iter()
        .flat_map(|(sample, channels)| {
            let selected: BTreeSet<String> =
                session.selected_channels(sample).into_iter().map(|(_, mass)| channel_label(mass)).collect();
            channels
                .iter()
                .filter(move |(label, _)| selected.contains(*label))
                .flat_map(move |(_, result)| {
                    result.particles.iter().map(move |p| ParticleRow {
                        sample_name: sample.clone(),
                        mass: result.mass,
                        peak_start_s: p.start_time,
                        peak_end_s: p.end_time,
                        total_counts: p.particle.total_counts,
                        peak_height_counts: p.particle.max_height,
                    })
                })
        })
        .collect();
    rows.sort_by(|a, b| {
        a.sample_name
            .cmp(&b.sample_name)
            .then(a.peak_start_s.total_cmp(&b.peak_start_s))
            .then(a.mass.total_cmp(&b.mass))
    });
    rows
}
