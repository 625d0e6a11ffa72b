use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spcore::data::params::{DetectionMethod, DetectionParameters};
use spcore::data::synthetic::{generate_signal, SyntheticSignalConfig};
use sptrack::batch::{run_batch, BatchOptions};
use sptrack::config::TrackConfig;
use sptrack::data::loader::{AnyRunLoader, RunLoader};
use sptrack::data::run::{RawRun, RunInfo};
use sptrack::export::{export_particles, export_run_text, PARTICLE_HEADER};
use sptrack::session::AnalysisSession;

const SAMPLES: usize = 50;

fn write_runs(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    (0..SAMPLES)
        .map(|s| {
            let simulated = generate_signal(&SyntheticSignalConfig {
                n_bins: 5_000,
                n_particles: 10,
                particle_mean_counts: 300.0,
                background_lambda: 0.5,
                seed: s as u64,
                ..Default::default()
            })
            .unwrap();
            let name = format!("sample_{:02}", SAMPLES - 1 - s);
            let signals = simulated.signal.counts.iter().map(|c| vec![*c]).collect();
            let run = RawRun::new(vec![197.0], signals, RunInfo::from_dwell_time(&name, 1e-4)).unwrap();
            let path = dir.join(format!("{}.csv", name));
            export_run_text(&path, &run).unwrap();
            path
        })
        .collect()
}

#[test]
fn compound_poisson_batch_over_fifty_samples() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_runs(dir.path());

    let mut config = TrackConfig::default();
    config.detection = DetectionParameters::with_method(DetectionMethod::CompoundPoissonLogNormal).with_alpha(1e-6);
    config.detection.min_continuous_points = 3;
    config.loader.time_column = Some(0);
    config.workers = 4;

    let mut session = AnalysisSession::new(config.clone());
    for path in &paths {
        let run = AnyRunLoader::for_path(path, &config.loader).load(path).unwrap();
        session.add_run(run);
    }
    assert_eq!(session.samples.len(), SAMPLES);

    let calls = AtomicUsize::new(0);
    let report = run_batch(
        &mut session,
        &BatchOptions { workers: config.workers, force: false },
        |_, total| {
            assert_eq!(total, SAMPLES);
            calls.fetch_add(1, Ordering::Relaxed);
        },
        &AtomicBool::new(false),
    )
    .unwrap();

    assert_eq!(calls.load(Ordering::Relaxed), SAMPLES);
    assert!(report.failures.is_empty());
    assert_eq!(report.channels_processed, SAMPLES);
    assert_eq!(session.results.len(), SAMPLES);

    let stored: usize = session.results.values().flat_map(|c| c.values()).map(|r| r.particles.len()).sum();
    assert_eq!(report.rows.len(), stored);
    assert!(report.rows.len() >= SAMPLES * 5);

    for pair in report.rows.windows(2) {
        let ordered = pair[0].sample_name < pair[1].sample_name
            || (pair[0].sample_name == pair[1].sample_name && pair[0].peak_start_s <= pair[1].peak_start_s);
        assert!(ordered, "{:?} before {:?}", pair[0], pair[1]);
    }
    assert_eq!(report.rows[0].sample_name, "sample_00");

    let csv = dir.path().join("particles.csv");
    export_particles(&csv, &report.rows).unwrap();
    let text = std::fs::read_to_string(&csv).unwrap();
    assert_eq!(text.lines().next(), Some(PARTICLE_HEADER));
    assert_eq!(text.lines().count(), report.rows.len() + 1);
}
