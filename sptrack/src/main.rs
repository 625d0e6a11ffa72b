use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};
use spcore::calibration::transport::{
    calibrate_particle_mass, summarize_transport_rates, transport_rate_mass_method, transport_rate_number_method,
    transport_rate_weight_method, MassUnit, NumberMethodSample, TimeUnit, TransportMethod, TransportRates,
    WeightMethodInput,
};
use spcore::calibration::units::ConcentrationUnit;
use spcore::data::params::DetectionMethod;
use spcore::data::synthetic::{generate_signal, SyntheticSignalConfig};
use tracing::{info, warn};

use sptrack::batch::{run_batch, BatchOptions};
use sptrack::config::{channel_label, TrackConfig};
use sptrack::data::loader::{AnyRunLoader, RunLoader};
use sptrack::data::run::{RawRun, RunInfo};
use sptrack::export::{
    export_calibration, export_particles, export_run_text, export_size_distribution, export_summary, signal_summary,
    SUMMARY_SECONDS,
};
use sptrack::logging::init_logging;
use sptrack::session::AnalysisSession;
use sptrack::TrackResult;

#[derive(Parser)]
#[command(name = "sptrack", version, about = "Single-particle ICP-MS detection and calibration")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// detect particles in every input run
    Detect {
        inputs: Vec<PathBuf>,
        #[arg(short, long, default_value = "sptrack_out")]
        output: PathBuf,
        /// Currie, Formula_C, "Compound Poisson LogNormal" or Manual
        #[arg(long)]
        method: Option<String>,
        #[arg(long)]
        alpha: Option<f64>,
        #[arg(long)]
        min_points: Option<usize>,
        #[arg(long)]
        workers: Option<usize>,
        /// column index holding the time axis of text inputs
        #[arg(long)]
        time_column: Option<usize>,
        /// reuse results of a previous session and save the updated one
        #[arg(long)]
        session: Option<PathBuf>,
    },
    /// ionic calibration from standards whose names carry their concentration
    Calibrate {
        inputs: Vec<PathBuf>,
        #[arg(short, long, default_value = "calibration.csv")]
        output: PathBuf,
        #[arg(long)]
        unit: Option<String>,
    },
    /// transport rate of the sample introduction system
    Transport {
        #[command(subcommand)]
        method: TransportCommand,
    },
    /// statistics of the first seconds of every run
    Summary {
        inputs: Vec<PathBuf>,
        #[arg(short, long, default_value = "summary.csv")]
        output: PathBuf,
        #[arg(long, default_value_t = SUMMARY_SECONDS)]
        seconds: f64,
    },
    /// write synthetic runs as delimited text
    Simulate {
        #[arg(short, long, default_value = "simulated")]
        output: PathBuf,
        #[arg(long, default_value_t = 3)]
        samples: usize,
        #[arg(long, default_value_t = 100_000)]
        bins: usize,
        #[arg(long, default_value_t = 1e-4)]
        dwell: f64,
        #[arg(long, default_value_t = 1.0)]
        lambda: f64,
        #[arg(long, default_value_t = 100)]
        particles: usize,
        #[arg(long, default_value_t = 200.0)]
        mean_counts: f64,
        #[arg(long, default_value_t = 197.0)]
        mass: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Subcommand)]
enum TransportCommand {
    /// ionic slope against a particle mass calibration
    Mass {
        #[arg(long)]
        ionic_slope: f64,
        #[arg(long, default_value = "ppb")]
        unit: String,
        /// particle masses of the standards in fg
        #[arg(long, value_delimiter = ',', required = true)]
        masses_fg: Vec<f64>,
        /// mean integrated counts per particle of each standard
        #[arg(long, value_delimiter = ',', required = true)]
        counts: Vec<f64>,
    },
    /// detected particle number of a suspension of known concentration
    Number {
        #[arg(long)]
        detected: usize,
        #[arg(long)]
        diameter_nm: f64,
        #[arg(long)]
        concentration_ng_l: f64,
        #[arg(long)]
        time_s: f64,
        #[arg(long)]
        density: f64,
    },
    /// mean of the rates found by several methods
    Average {
        #[arg(long)]
        mass: Option<f64>,
        #[arg(long)]
        number: Option<f64>,
        #[arg(long)]
        weight: Option<f64>,
    },
    /// gravimetric uptake
    Weight {
        #[arg(long)]
        initial: f64,
        #[arg(long = "final")]
        final_mass: f64,
        #[arg(long)]
        waste: f64,
        #[arg(long)]
        time: f64,
        #[arg(long)]
        milligrams: bool,
        #[arg(long)]
        minutes: bool,
    },
}

fn load_runs(inputs: &[PathBuf], config: &TrackConfig) -> Vec<RawRun> {
    inputs
        .iter()
        .filter_map(|path| match AnyRunLoader::for_path(path, &config.loader).load(path) {
            Ok(run) => Some(run),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "input skipped");
                None
            }
        })
        .collect()
}

fn session_with(config: TrackConfig, runs: Vec<RawRun>) -> AnalysisSession {
    let mut session = AnalysisSession::new(config);
    for run in runs {
        session.add_run(run);
    }
    session
}

#[allow(clippy::too_many_arguments)]
fn detect(
    mut config: TrackConfig,
    inputs: &[PathBuf],
    output: &Path,
    method: Option<String>,
    alpha: Option<f64>,
    min_points: Option<usize>,
    workers: Option<usize>,
    time_column: Option<usize>,
    session_path: Option<PathBuf>,
) -> TrackResult<()> {
    if let Some(method) = method {
        config.detection.method = method.parse::<DetectionMethod>()?;
    }
    if let Some(alpha) = alpha {
        config.detection.alpha = alpha;
    }
    if let Some(points) = min_points {
        config.detection.min_continuous_points = points;
    }
    if let Some(workers) = workers {
        config.workers = workers;
    }
    if time_column.is_some() {
        config.loader.time_column = time_column;
    }
    config.validate()?;

    let mut session = match &session_path {
        Some(path) if path.exists() => {
            let mut previous = AnalysisSession::load(path)?;
            previous.config = config.clone();
            previous
        }
        _ => AnalysisSession::new(config.clone()),
    };
    for run in load_runs(inputs, &config) {
        session.add_run(run);
    }

    let options = BatchOptions { workers: config.workers, force: false };
    let cancel = AtomicBool::new(false);
    let report = run_batch(&mut session, &options, |done, total| info!(done, total, "sample finished"), &cancel)?;

    std::fs::create_dir_all(output)?;
    let masses: BTreeSet<String> = session
        .results
        .values()
        .flat_map(|channels| channels.keys().cloned())
        .collect();
    for label in &masses {
        let rows: Vec<_> = report.rows.iter().filter(|r| channel_label(r.mass) == *label).cloned().collect();
        export_particles(&output.join(format!("particles_{}.csv", label)), &rows)?;
    }
    export_summary(&output.join("summary.csv"), &signal_summary(&session, SUMMARY_SECONDS))?;
    if !session.config.sizing.is_empty() {
        export_size_distribution(&output.join("sizes.csv"), &session)?;
    }
    if let Some(path) = &session_path {
        session.save(path)?;
    }

    println!(
        "{} particles in {} samples, {} channels detected, {} failures",
        report.rows.len(),
        session.samples.len(),
        report.channels_processed,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  {} (m/z {}): {}", failure.sample_name, failure.mass, failure.message);
    }
    Ok(())
}

fn calibrate(mut config: TrackConfig, inputs: &[PathBuf], output: &Path, unit: Option<String>) -> TrackResult<()> {
    if let Some(unit) = unit {
        config.concentration_unit = unit.parse::<ConcentrationUnit>()?;
    }
    let runs = load_runs(inputs, &config);
    let session = session_with(config, runs);
    let calibrations = session.ionic_calibration();

    let mut records = Vec::new();
    for (label, calibration) in &calibrations {
        let preferred = calibration.preferred();
        println!(
            "m/z {}: {} slope {:.4} intercept {:.4} R² {:.5}",
            label, preferred.method, preferred.slope, preferred.intercept, preferred.r_squared
        );
        records.extend(calibration.records(label));
    }
    export_calibration(output, &records)
}

fn transport(method: TransportCommand) -> TrackResult<()> {
    match method {
        TransportCommand::Mass { ionic_slope, unit, masses_fg, counts } => {
            let unit = unit.parse::<ConcentrationUnit>()?;
            let particle = calibrate_particle_mass(&masses_fg, &counts)?;
            let result = transport_rate_mass_method(ionic_slope, unit, particle.slope)?;
            println!(
                "transport rate {:.5} µL/s, {:.4} counts/fg (particle R² {:.5})",
                result.transport_rate_ul_s, result.conversion_factor, particle.r_squared
            );
        }
        TransportCommand::Number { detected, diameter_nm, concentration_ng_l, time_s, density } => {
            let sample = NumberMethodSample {
                sample_name: "reference".to_string(),
                particles_detected: detected,
                diameter_nm,
                concentration_ng_l,
                acquisition_time_s: time_s,
                density_g_cm3: density,
            };
            let result = transport_rate_number_method(&sample);
            match summarize_transport_rates(std::slice::from_ref(&result)) {
                Some((rate, _)) => println!("transport rate {:.5} µL/s ({:.4e} particles/mL)", rate, result.particles_per_ml),
                None => println!("no valid transport rate: {:?}", result.status),
            }
        }
        TransportCommand::Average { mass, number, weight } => {
            let rates = TransportRates { mass, number, weight };
            let selected = [TransportMethod::Mass, TransportMethod::Number, TransportMethod::Weight];
            match rates.average(&selected) {
                Some(rate) => println!("average transport rate {:.5} µL/s", rate),
                None => println!("no positive transport rate given"),
            }
        }
        TransportCommand::Weight { initial, final_mass, waste, time, milligrams, minutes } => {
            let input = WeightMethodInput {
                initial_mass: initial,
                final_mass,
                waste_mass: waste,
                mass_unit: if milligrams { MassUnit::Milligram } else { MassUnit::Gram },
                time,
                time_unit: if minutes { TimeUnit::Minutes } else { TimeUnit::Seconds },
            };
            println!("transport rate {:.5} µL/s", transport_rate_weight_method(&input)?);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn simulate(
    output: &Path,
    samples: usize,
    bins: usize,
    dwell: f64,
    lambda: f64,
    particles: usize,
    mean_counts: f64,
    mass: f64,
    seed: u64,
) -> TrackResult<()> {
    std::fs::create_dir_all(output)?;
    for s in 0..samples {
        let config = SyntheticSignalConfig {
            n_bins: bins,
            dwell_time: dwell,
            background_lambda: lambda,
            n_particles: particles,
            particle_mean_counts: mean_counts,
            seed: seed + s as u64,
            ..Default::default()
        };
        let simulated = generate_signal(&config)?;
        let name = format!("sim_{:03}", s);
        let signals = simulated.signal.counts.iter().map(|c| vec![*c]).collect();
        let run = RawRun::new(vec![mass], signals, RunInfo::from_dwell_time(&name, dwell))?;
        export_run_text(&output.join(format!("{}.csv", name)), &run)?;
    }
    println!("{} runs written to {} (time in column 0)", samples, output.display());
    Ok(())
}

fn main() -> TrackResult<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => TrackConfig::from_path(path)?,
        None => TrackConfig::default(),
    };
    config.log = config.log.clone().with_verbose(cli.verbose);
    init_logging(&config.log)?;

    match cli.cmd {
        Commands::Detect { inputs, output, method, alpha, min_points, workers, time_column, session } => {
            detect(config, &inputs, &output, method, alpha, min_points, workers, time_column, session)
        }
        Commands::Calibrate { inputs, output, unit } => calibrate(config, &inputs, &output, unit),
        Commands::Transport { method } => transport(method),
        Commands::Summary { inputs, output, seconds } => {
            let runs = load_runs(&inputs, &config);
            let session = session_with(config, runs);
            export_summary(&output, &signal_summary(&session, seconds))
        }
        Commands::Simulate { output, samples, bins, dwell, lambda, particles, mean_counts, mass, seed } => {
            simulate(&output, samples, bins, dwell, lambda, particles, mean_counts, mass, seed)
        }
    }
}
