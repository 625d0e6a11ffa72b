//! CSV views of session results.
//!
//! Column order is fixed; downstream tooling reads these files by position.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use spcore::algorithm::stats::SummaryStats;
use spcore::calibration::ionic::CalibrationRecord;

use crate::batch::ParticleRow;
use crate::config::channel_label;
use crate::data::run::RawRun;
use crate::error::TrackResult;
use crate::session::AnalysisSession;

/// seconds at the start of each run used for the signal summary
pub const SUMMARY_SECONDS: f64 = 5.0;

pub const PARTICLE_HEADER: &str = "sample_name,peak_start_s,peak_end_s,total_counts,peak_height_counts";
pub const CALIBRATION_HEADER: &str = "isotope,method,slope,intercept,r_squared,lod,loq,bec,preferred";
pub const SUMMARY_HEADER: &str = "sample_name,isotope,points,total_counts,mean_counts,std_counts,min_counts,max_counts,\
mean_cps,std_cps,min_cps,max_cps,median_cps,rsd_percent";
pub const SIZE_HEADER: &str = "sample_name,isotope,diameter_nm";

fn field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn create(path: &Path) -> TrackResult<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

pub fn write_particles<W: Write>(writer: &mut W, rows: &[ParticleRow]) -> TrackResult<()> {
    writeln!(writer, "{}", PARTICLE_HEADER)?;
    for row in rows {
        writeln!(
            writer,
            "{},{},{},{},{}",
            field(&row.sample_name),
            row.peak_start_s,
            row.peak_end_s,
            row.total_counts,
            row.peak_height_counts
        )?;
    }
    Ok(())
}

pub fn export_particles(path: &Path, rows: &[ParticleRow]) -> TrackResult<()> {
    let mut writer = create(path)?;
    write_particles(&mut writer, rows)?;
    writer.flush()?;
    Ok(())
}

pub fn write_calibration<W: Write>(writer: &mut W, records: &[CalibrationRecord]) -> TrackResult<()> {
    writeln!(writer, "{}", CALIBRATION_HEADER)?;
    for r in records {
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{}",
            field(&r.isotope),
            field(&r.method),
            r.slope,
            r.intercept,
            r.r_squared,
            r.lod,
            r.loq,
            r.bec,
            r.preferred
        )?;
    }
    Ok(())
}

pub fn export_calibration(path: &Path, records: &[CalibrationRecord]) -> TrackResult<()> {
    let mut writer = create(path)?;
    write_calibration(&mut writer, records)?;
    writer.flush()?;
    Ok(())
}

/// Statistics of the leading seconds of one sample and isotope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub sample_name: String,
    pub isotope: String,
    pub stats: SummaryStats,
}

/// summary of the first `seconds` of every selected channel of every sample
///
/// Samples whose dwell time cannot be determined are left out.
pub fn signal_summary(session: &AnalysisSession, seconds: f64) -> Vec<SummaryRow> {
    let mut rows = Vec::new();
    for (sample, run) in &session.samples {
        for (index, mass) in session.selected_channels(sample) {
            let Ok(signal) = run.signal(index) else {
                continue;
            };
            rows.push(SummaryRow {
                sample_name: sample.clone(),
                isotope: channel_label(mass),
                stats: SummaryStats::from_counts(signal.head_seconds(seconds), signal.dwell_time),
            });
        }
    }
    rows
}

pub fn write_summary<W: Write>(writer: &mut W, rows: &[SummaryRow]) -> TrackResult<()> {
    writeln!(writer, "{}", SUMMARY_HEADER)?;
    for row in rows {
        let s = &row.stats;
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            field(&row.sample_name),
            field(&row.isotope),
            s.points,
            s.total_counts,
            s.mean_counts,
            s.std_counts,
            s.min_counts,
            s.max_counts,
            s.mean_cps,
            s.std_cps,
            s.min_cps,
            s.max_cps,
            s.median_cps,
            s.rsd_percent
        )?;
    }
    Ok(())
}

pub fn export_summary(path: &Path, rows: &[SummaryRow]) -> TrackResult<()> {
    let mut writer = create(path)?;
    write_summary(&mut writer, rows)?;
    writer.flush()?;
    Ok(())
}

/// diameters of every sized channel of every sample, one row per particle
pub fn write_size_distribution<W: Write>(writer: &mut W, session: &AnalysisSession) -> TrackResult<usize> {
    writeln!(writer, "{}", SIZE_HEADER)?;
    let mut written = 0;
    for (sample, channels) in &session.results {
        for (label, result) in channels {
            let Some(diameters) = session.size_distribution(sample, result.mass) else {
                continue;
            };
            for d in diameters {
                writeln!(writer, "{},{},{}", field(sample), field(label), d)?;
                written += 1;
            }
        }
    }
    Ok(written)
}

pub fn export_size_distribution(path: &Path, session: &AnalysisSession) -> TrackResult<usize> {
    let mut writer = create(path)?;
    let written = write_size_distribution(&mut writer, session)?;
    writer.flush()?;
    Ok(written)
}

/// write a run as delimited text with a seconds time column, readable by the text loader
pub fn write_run_text<W: Write>(writer: &mut W, run: &RawRun) -> TrackResult<()> {
    let labels: Vec<String> = run.masses.iter().map(|m| channel_label(*m)).collect();
    writeln!(writer, "time_s,{}", labels.join(","))?;
    let time = run.time_array()?;
    for (t, row) in time.iter().zip(run.signals.iter()) {
        let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(writer, "{},{}", t, values.join(","))?;
    }
    Ok(())
}

pub fn export_run_text(path: &Path, run: &RawRun) -> TrackResult<()> {
    let mut writer = create(path)?;
    write_run_text(&mut writer, run)?;
    writer.flush()?;
    Ok(())
}
