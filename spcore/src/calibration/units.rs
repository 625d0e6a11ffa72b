use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SpError;

/// Mass concentration unit of a dissolved standard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConcentrationUnit {
    /// ng/L
    Ppt,
    /// µg/L
    Ppb,
    /// mg/L
    Ppm,
}

impl ConcentrationUnit {
    /// size of the unit in ng/L, which is the same as fg/µL
    pub fn ng_per_l(&self) -> f64 {
        match self {
            ConcentrationUnit::Ppt => 1.0,
            ConcentrationUnit::Ppb => 1e3,
            ConcentrationUnit::Ppm => 1e6,
        }
    }

    /// express `value` given in `self` in `target`
    ///
    /// # Examples
    ///
    /// ```
    /// use spcore::calibration::units::ConcentrationUnit;
    ///
    /// assert_eq!(ConcentrationUnit::Ppm.convert(2.0, ConcentrationUnit::Ppb), 2000.0);
    /// ```
    pub fn convert(&self, value: f64, target: ConcentrationUnit) -> f64 {
        value * self.ng_per_l() / target.ng_per_l()
    }
}

impl Default for ConcentrationUnit {
    fn default() -> Self {
        ConcentrationUnit::Ppb
    }
}

impl fmt::Display for ConcentrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConcentrationUnit::Ppt => "ppt",
            ConcentrationUnit::Ppb => "ppb",
            ConcentrationUnit::Ppm => "ppm",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ConcentrationUnit {
    type Err = SpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ppt" | "ng/l" => Ok(ConcentrationUnit::Ppt),
            "ppb" | "µg/l" | "μg/l" | "ug/l" => Ok(ConcentrationUnit::Ppb),
            "ppm" | "mg/l" => Ok(ConcentrationUnit::Ppm),
            other => Err(SpError::configuration(format!("unrecognized concentration unit '{}'", other))),
        }
    }
}

const BLANK_PATTERNS: [&str; 6] = ["blank", "blanc", "blk", "background", "bkg", "zero"];

/// ordered name patterns, `None` meaning the caller's unit
fn name_patterns() -> &'static [(Regex, Option<ConcentrationUnit>)] {
    static PATTERNS: OnceLock<Vec<(Regex, Option<ConcentrationUnit>)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let number = r"(\d+(?:\.\d+)?)\s*";
        let with_unit = [
            ("ppb", ConcentrationUnit::Ppb),
            ("[µμu]g/l", ConcentrationUnit::Ppb),
            (r"[µμu]g\s*l[-/]1", ConcentrationUnit::Ppb),
            ("ppm", ConcentrationUnit::Ppm),
            ("mg/l", ConcentrationUnit::Ppm),
            (r"mg\s*l[-/]1", ConcentrationUnit::Ppm),
            ("ppt", ConcentrationUnit::Ppt),
            ("ng/l", ConcentrationUnit::Ppt),
            (r"ng\s*l[-/]1", ConcentrationUnit::Ppt),
        ]
        .into_iter()
        .map(|(unit, u)| (format!("{}{}", number, unit), Some(u)));
        let bare: [(String, Option<ConcentrationUnit>); 2] = [
            (r"(\d+(?:\.\d+)?)\s*$".to_string(), None),
            (r"^(\d+(?:\.\d+)?)(?:\D|$)".to_string(), None),
        ];
        with_unit
            .chain(bare)
            .filter_map(|(pattern, unit)| Regex::new(&pattern).ok().map(|re| (re, unit)))
            .collect()
    })
}

fn any_number() -> Option<&'static Regex> {
    static ANY: OnceLock<Option<Regex>> = OnceLock::new();
    ANY.get_or_init(|| Regex::new(r"\b(\d+(?:\.\d+)?)\b").ok()).as_ref()
}

fn first_number(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok())
}

/// guess the concentration of a standard from its sample name
///
/// Blank-like names give 0. Otherwise the first number followed by a unit is
/// converted to `unit`; a trailing or leading number is taken in `unit` as is;
/// and as a last resort any stand-alone number in [0.01, 10000].
///
/// Arguments:
///
/// * `name` - sample name, e.g. "Au 10 ppb_rep2"
/// * `unit` - unit the result is expressed in
///
/// Returns:
///
/// * `Option<f64>` - the concentration, `None` when the name carries none
///
/// # Examples
///
/// ```
/// use spcore::calibration::units::{concentration_from_sample_name, ConcentrationUnit};
///
/// assert_eq!(concentration_from_sample_name("Std 2 ppm", ConcentrationUnit::Ppb), Some(2000.0));
/// assert_eq!(concentration_from_sample_name("BLK_01", ConcentrationUnit::Ppb), Some(0.0));
/// assert_eq!(concentration_from_sample_name("rinse", ConcentrationUnit::Ppb), None);
/// ```
pub fn concentration_from_sample_name(name: &str, unit: ConcentrationUnit) -> Option<f64> {
    let lower = name.trim().to_lowercase();
    if BLANK_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(0.0);
    }

    for (re, found_unit) in name_patterns() {
        if let Some(value) = first_number(re, &lower) {
            return Some(match found_unit {
                Some(u) => u.convert(value, unit),
                None => value,
            });
        }
    }

    any_number()?
        .captures_iter(&lower)
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse::<f64>().ok()))
        .find(|v| (0.01..=10000.0).contains(v))
}
