use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{SpError, SpResult};

/// Background model used to place the detection threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionMethod {
    #[serde(rename = "Currie")]
    Currie,
    #[serde(rename = "Formula_C")]
    FormulaC,
    #[serde(rename = "Compound Poisson LogNormal")]
    CompoundPoissonLogNormal,
    #[serde(rename = "Manual")]
    Manual,
}

impl DetectionMethod {
    pub const ALL: [DetectionMethod; 4] = [
        DetectionMethod::Currie,
        DetectionMethod::FormulaC,
        DetectionMethod::CompoundPoissonLogNormal,
        DetectionMethod::Manual,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DetectionMethod::Currie => "Currie",
            DetectionMethod::FormulaC => "Formula_C",
            DetectionMethod::CompoundPoissonLogNormal => "Compound Poisson LogNormal",
            DetectionMethod::Manual => "Manual",
        }
    }
}

impl Default for DetectionMethod {
    fn default() -> Self {
        DetectionMethod::CompoundPoissonLogNormal
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DetectionMethod {
    type Err = SpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Currie" | "currie" => Ok(DetectionMethod::Currie),
            "Formula_C" | "formula_c" | "formula-c" => Ok(DetectionMethod::FormulaC),
            "Compound Poisson LogNormal" | "compound-poisson-lognormal" | "cpln" => {
                Ok(DetectionMethod::CompoundPoissonLogNormal)
            }
            "Manual" | "manual" => Ok(DetectionMethod::Manual),
            other => Err(SpError::configuration(format!("unrecognized detection method '{}'", other))),
        }
    }
}

/// How the counts of a detected event are integrated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntegrationMethod {
    /// Sum over the above-threshold run, minus the background per bin.
    Background,
    /// Widen each run outward to where the signal falls back to the background level.
    Extended,
}

impl Default for IntegrationMethod {
    fn default() -> Self {
        IntegrationMethod::Background
    }
}

impl FromStr for IntegrationMethod {
    type Err = SpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "background" => Ok(IntegrationMethod::Background),
            "extended" => Ok(IntegrationMethod::Extended),
            other => Err(SpError::configuration(format!("unrecognized integration method '{}'", other))),
        }
    }
}

/// Per-sample, per-channel detection parameters; immutable for one detection run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParameters {
    pub method: DetectionMethod,
    /// Threshold in counts, used verbatim by [`DetectionMethod::Manual`]
    pub manual_threshold: f64,
    pub apply_smoothing: bool,
    /// Odd moving-average width, at least 3
    pub smoothing_window: usize,
    pub smoothing_iterations: usize,
    /// False-positive rate in (0, 0.1]
    pub alpha: f64,
    pub min_continuous_points: usize,
    pub integration_method: IntegrationMethod,
    /// Refit the background on bins below the current threshold
    pub iterative: bool,
    pub max_iterations: usize,
    /// Log-sigma of the single-ion response (compound Poisson model)
    pub single_ion_sigma: f64,
    /// Estimate the single-ion sigma from the background bins instead of using the fixed value
    pub estimate_sigma: bool,
    /// Restrict background statistics to a centred window of the signal
    pub use_background_window: bool,
    pub background_window_size: usize,
}

impl Default for DetectionParameters {
    fn default() -> Self {
        DetectionParameters {
            method: DetectionMethod::CompoundPoissonLogNormal,
            manual_threshold: 10.0,
            apply_smoothing: false,
            smoothing_window: 3,
            smoothing_iterations: 1,
            alpha: 1e-6,
            min_continuous_points: 1,
            integration_method: IntegrationMethod::Background,
            iterative: true,
            max_iterations: 4,
            single_ion_sigma: 0.47,
            estimate_sigma: false,
            use_background_window: false,
            background_window_size: 5000,
        }
    }
}

impl DetectionParameters {
    pub fn with_method(method: DetectionMethod) -> Self {
        DetectionParameters { method, ..Default::default() }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// check every parameter that a caller could get wrong
    ///
    /// Even smoothing windows are rejected rather than rounded up.
    pub fn validate(&self) -> SpResult<()> {
        validate_alpha(self.alpha)?;
        if !self.manual_threshold.is_finite() || self.manual_threshold < 0.0 {
            return Err(SpError::configuration(format!(
                "manual threshold must be a non-negative number, got {}",
                self.manual_threshold
            )));
        }
        if self.apply_smoothing {
            validate_window(self.smoothing_window)?;
            if self.smoothing_iterations < 1 {
                return Err(SpError::configuration("smoothing iterations must be at least 1"));
            }
        }
        if self.min_continuous_points < 1 {
            return Err(SpError::configuration("min continuous points must be at least 1"));
        }
        if !(self.single_ion_sigma > 0.0) || !self.single_ion_sigma.is_finite() {
            return Err(SpError::configuration(format!(
                "single-ion sigma must be positive, got {}",
                self.single_ion_sigma
            )));
        }
        if self.use_background_window && self.background_window_size == 0 {
            return Err(SpError::configuration("background window size must be positive"));
        }
        Ok(())
    }
}

pub fn validate_alpha(alpha: f64) -> SpResult<()> {
    if alpha > 0.0 && alpha <= 0.1 {
        Ok(())
    } else {
        Err(SpError::configuration(format!("alpha must lie in (0, 0.1], got {}", alpha)))
    }
}

pub fn validate_window(window_length: usize) -> SpResult<()> {
    if window_length < 3 {
        return Err(SpError::configuration(format!(
            "smoothing window must be at least 3, got {}",
            window_length
        )));
    }
    if window_length % 2 == 0 {
        return Err(SpError::configuration(format!(
            "smoothing window must be odd, got {}",
            window_length
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names_round_trip() {
        for method in DetectionMethod::ALL {
            assert_eq!(method.name().parse::<DetectionMethod>().unwrap(), method);
        }
        assert!("Poisson".parse::<DetectionMethod>().unwrap_err().is_configuration());
    }

    #[test]
    fn test_default_parameters_are_valid() {
        let params = DetectionParameters::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.method, DetectionMethod::CompoundPoissonLogNormal);
        assert_eq!(params.alpha, 1e-6);
    }

    #[test]
    fn test_alpha_range() {
        assert!(validate_alpha(0.1).is_ok());
        assert!(validate_alpha(1e-12).is_ok());
        assert!(validate_alpha(0.0).is_err());
        assert!(validate_alpha(0.2).is_err());
        assert!(validate_alpha(f64::NAN).is_err());
    }

    #[test]
    fn test_even_window_rejected_only_when_smoothing() {
        let mut params = DetectionParameters { smoothing_window: 4, ..Default::default() };
        assert!(params.validate().is_ok());
        params.apply_smoothing = true;
        assert!(params.validate().unwrap_err().is_configuration());
        params.smoothing_window = 5;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(DetectionMethod::FormulaC.to_string(), "Formula_C");
        assert_eq!(
            DetectionMethod::CompoundPoissonLogNormal.to_string(),
            "Compound Poisson LogNormal"
        );
        assert_eq!("Extended".parse::<IntegrationMethod>().unwrap(), IntegrationMethod::Extended);
    }
}
