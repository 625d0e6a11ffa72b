use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use spcore::algorithm::stats::median;
use spcore::SpError;

use crate::data::run::{RawRun, RunInfo};
use crate::error::{TrackError, TrackResult};

/// Source of raw runs; proprietary instrument formats plug in here.
pub trait RunLoader: Send + Sync {
    fn load(&self, path: &Path) -> TrackResult<RawRun>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimeUnit {
    pub fn to_seconds(&self, value: f64) -> f64 {
        match self {
            TimeUnit::Seconds => value,
            TimeUnit::Milliseconds => value / 1e3,
            TimeUnit::Microseconds => value / 1e6,
            TimeUnit::Nanoseconds => value / 1e9,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntensityUnit {
    #[default]
    Counts,
    /// counts per second, multiplied by the dwell time on load
    Cps,
}

/// Reader for delimited text exports, one row per time bin.
///
/// The first row is a header; every column except the time column names a
/// channel and must contain its mass, e.g. `107Ag` or `Au197`. Reading stops
/// at the first empty row or the first row containing a word.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelimitedTextLoader {
    pub delimiter: char,
    pub time_column: Option<usize>,
    pub time_unit: TimeUnit,
    pub dwell_time_ms: f64,
    /// take the dwell time from the median positive step of the time column
    pub dwell_from_time: bool,
    pub intensity: IntensityUnit,
}

impl Default for DelimitedTextLoader {
    fn default() -> Self {
        DelimitedTextLoader {
            delimiter: ',',
            time_column: None,
            time_unit: TimeUnit::Seconds,
            dwell_time_ms: 0.1,
            dwell_from_time: false,
            intensity: IntensityUnit::Counts,
        }
    }
}

/// mass embedded in a column label such as "107Ag", "Au-197" or "m/z 56.93"
pub fn mass_from_label(label: &str) -> Option<f64> {
    let mut digits = String::new();
    for c in label.chars() {
        if c.is_ascii_digit() || (c == '.' && !digits.is_empty() && !digits.contains('.')) {
            digits.push(c);
        } else if !digits.is_empty() {
            break;
        }
    }
    digits.trim_end_matches('.').parse().ok()
}

fn is_text(token: &str) -> bool {
    let mut run = 0;
    for c in token.chars() {
        if c.is_alphabetic() {
            run += 1;
            if run >= 2 {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

impl DelimitedTextLoader {
    fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        line.split(self.delimiter).map(|t| t.trim().trim_matches('"')).collect()
    }

    fn dwell_time_s(&self, time: Option<&[f64]>) -> f64 {
        let manual = self.dwell_time_ms / 1e3;
        match time {
            Some(time) if self.dwell_from_time && time.len() > 1 => {
                let steps: Vec<f64> = time.windows(2).map(|w| w[1] - w[0]).filter(|d| *d > 0.0).collect();
                if steps.is_empty() {
                    manual
                } else {
                    median(&steps)
                }
            }
            _ => manual,
        }
    }

    /// parse delimited text already in memory, `sample_name` labels the run
    pub fn parse<R: BufRead>(&self, reader: R, sample_name: &str) -> TrackResult<RawRun> {
        let mut lines = reader.lines();
        let header = match lines.next() {
            Some(line) => line?,
            None => return Err(SpError::data(format!("'{}' is empty", sample_name)).into()),
        };
        let labels = self.split(&header);

        let mut channel_columns = Vec::new();
        let mut masses = Vec::new();
        for (col, label) in labels.iter().enumerate() {
            if Some(col) == self.time_column {
                continue;
            }
            let mass = mass_from_label(label)
                .ok_or_else(|| TrackError::parse(1, format!("column '{}' carries no mass", label)))?;
            channel_columns.push(col);
            masses.push(mass);
        }
        if masses.is_empty() {
            return Err(TrackError::parse(1, "no signal columns"));
        }

        let mut signals = Vec::new();
        let mut time = Vec::new();
        for (i, line) in lines.enumerate() {
            let line = line?;
            let line_no = i + 2;
            let tokens = self.split(&line);
            if tokens.iter().all(|t| t.is_empty()) || tokens.iter().any(|t| is_text(t)) {
                break;
            }
            let value = |col: usize| -> TrackResult<f64> {
                let token = tokens.get(col).copied().unwrap_or("");
                token
                    .parse::<f64>()
                    .map_err(|_| TrackError::parse(line_no, format!("'{}' in column {} is not a number", token, col + 1)))
            };
            if let Some(col) = self.time_column {
                time.push(self.time_unit.to_seconds(value(col)?));
            }
            signals.push(channel_columns.iter().map(|&col| value(col)).collect::<TrackResult<Vec<f64>>>()?);
        }

        let time = self.time_column.map(|_| time);
        let dwell = self.dwell_time_s(time.as_deref());
        if !(dwell > 0.0) {
            return Err(SpError::data(format!("dwell time of '{}' must be positive", sample_name)).into());
        }
        if self.intensity == IntensityUnit::Cps {
            signals.iter_mut().flatten().for_each(|v| *v *= dwell);
        }

        let mut run = RawRun::new(masses, signals, RunInfo::from_dwell_time(sample_name, dwell))?;
        run.time = time;
        Ok(run)
    }
}

impl RunLoader for DelimitedTextLoader {
    fn load(&self, path: &Path) -> TrackResult<RawRun> {
        let sample_name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let reader = BufReader::new(File::open(path)?);
        self.parse(reader, &sample_name)
    }
}

/// Reader for runs stored as a JSON document of [`RawRun`].
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRunLoader;

impl RunLoader for JsonRunLoader {
    fn load(&self, path: &Path) -> TrackResult<RawRun> {
        let run: RawRun = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        run.check_shape()?;
        run.run_info.dwell_time_s()?;
        Ok(run)
    }
}

/// Picks a loader by file extension.
#[derive(Clone, Debug)]
pub enum AnyRunLoader {
    Delimited(DelimitedTextLoader),
    Json(JsonRunLoader),
}

impl AnyRunLoader {
    pub fn for_path(path: &Path, text: &DelimitedTextLoader) -> Self {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()) {
            Some(ext) if ext == "json" => AnyRunLoader::Json(JsonRunLoader),
            Some(ext) if ext == "tsv" => AnyRunLoader::Delimited(DelimitedTextLoader { delimiter: '\t', ..text.clone() }),
            _ => AnyRunLoader::Delimited(text.clone()),
        }
    }
}

impl RunLoader for AnyRunLoader {
    fn load(&self, path: &Path) -> TrackResult<RawRun> {
        match self {
            AnyRunLoader::Delimited(loader) => loader.load(path),
            AnyRunLoader::Json(loader) => loader.load(path),
        }
    }
}
