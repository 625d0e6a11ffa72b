use std::fmt;
use std::str::FromStr;

use itertools::izip;
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::algorithm::stats::{mean, std};
use crate::error::{SpError, SpResult};

/// concentration marking a standard as unused
pub const UNUSED_CONCENTRATION: f64 = -1.0;

/// determinant magnitude below which weighted normal equations count as singular
const SINGULAR_DETERMINANT: f64 = 1e-17;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalibrationMethod {
    #[serde(rename = "Force through zero")]
    ZeroIntercept,
    #[serde(rename = "Simple linear")]
    SimpleLinear,
    #[serde(rename = "Weighted")]
    Weighted,
    #[serde(rename = "Manual")]
    Manual,
}

impl CalibrationMethod {
    pub const FITTED: [CalibrationMethod; 3] =
        [CalibrationMethod::ZeroIntercept, CalibrationMethod::SimpleLinear, CalibrationMethod::Weighted];

    pub fn name(&self) -> &'static str {
        match self {
            CalibrationMethod::ZeroIntercept => "Force through zero",
            CalibrationMethod::SimpleLinear => "Simple linear",
            CalibrationMethod::Weighted => "Weighted",
            CalibrationMethod::Manual => "Manual",
        }
    }
}

impl fmt::Display for CalibrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CalibrationMethod {
    type Err = SpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "force through zero" | "zero" => Ok(CalibrationMethod::ZeroIntercept),
            "simple linear" | "simple" => Ok(CalibrationMethod::SimpleLinear),
            "weighted" => Ok(CalibrationMethod::Weighted),
            "manual" => Ok(CalibrationMethod::Manual),
            other => Err(SpError::configuration(format!("unrecognized calibration method '{}'", other))),
        }
    }
}

/// One fitted concentration to signal relationship.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub method: CalibrationMethod,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub lod: f64,
    pub loq: f64,
    pub bec: f64,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub y_std: Vec<f64>,
}

impl CalibrationResult {
    pub fn predict(&self, concentration: f64) -> f64 {
        self.slope * concentration + self.intercept
    }
}

/// Mean and spread of the count rate measured for one standard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardResponse {
    pub concentration: f64,
    pub mean_cps: f64,
    pub std_cps: f64,
}

impl StandardResponse {
    pub fn from_cps(concentration: f64, cps: &[f64]) -> Self {
        StandardResponse { concentration, mean_cps: mean(cps), std_cps: std(cps) }
    }
}

/// response of the standard with the smallest concentration
fn sigma_at_lowest(x: &[f64], y_std: &[f64]) -> f64 {
    x.iter()
        .zip(y_std.iter())
        .min_by(|a, b| a.0.total_cmp(b.0))
        .map(|(_, s)| *s)
        .unwrap_or(0.0)
}

fn ratio_or_nan(numerator: f64, slope: f64) -> f64 {
    if slope != 0.0 {
        numerator / slope
    } else {
        f64::NAN
    }
}

fn r_squared(ss_res: f64, ss_tot: f64) -> f64 {
    if ss_tot != 0.0 {
        1.0 - ss_res / ss_tot
    } else {
        0.0
    }
}

/// least squares through the origin; R² uses the raw sum of squares of `y`
pub fn fit_zero_intercept(x: &[f64], y: &[f64], y_std: &[f64]) -> CalibrationResult {
    let sxx: f64 = x.iter().map(|v| v * v).sum();
    let sxy: f64 = izip!(x, y).map(|(a, b)| a * b).sum();
    let slope = if sxx != 0.0 { sxy / sxx } else { 0.0 };

    let ss_res: f64 = izip!(x, y).map(|(a, b)| (b - slope * a).powi(2)).sum();
    let ss_tot: f64 = y.iter().map(|b| b * b).sum();
    let sigma = sigma_at_lowest(x, y_std);

    CalibrationResult {
        method: CalibrationMethod::ZeroIntercept,
        slope,
        intercept: 0.0,
        r_squared: r_squared(ss_res, ss_tot),
        lod: ratio_or_nan(3.0 * sigma, slope),
        loq: ratio_or_nan(10.0 * sigma, slope),
        bec: ratio_or_nan(3.0 * sigma, slope),
        x: x.to_vec(),
        y: y.to_vec(),
        y_std: y_std.to_vec(),
    }
}

/// ordinary least squares `(slope, intercept)`, a flat line through the mean when `x` has no spread
pub fn ordinary_least_squares(x: &[f64], y: &[f64]) -> (f64, f64) {
    let x_mean = mean(x);
    let y_mean = mean(y);
    let sxx: f64 = x.iter().map(|v| (v - x_mean).powi(2)).sum();
    let sxy: f64 = izip!(x, y).map(|(a, b)| (a - x_mean) * (b - y_mean)).sum();
    if sxx == 0.0 {
        return (0.0, y_mean);
    }
    let slope = sxy / sxx;
    (slope, y_mean - slope * x_mean)
}

/// coefficient of determination of a line against mean-centred data
pub fn linear_r_squared(x: &[f64], y: &[f64], slope: f64, intercept: f64) -> f64 {
    let y_mean = mean(y);
    let ss_res: f64 = izip!(x, y).map(|(a, b)| (b - (slope * a + intercept)).powi(2)).sum();
    let ss_tot: f64 = y.iter().map(|b| (b - y_mean).powi(2)).sum();
    r_squared(ss_res, ss_tot)
}

pub fn fit_simple_linear(x: &[f64], y: &[f64], y_std: &[f64]) -> CalibrationResult {
    let (slope, intercept) = ordinary_least_squares(x, y);
    let sigma = sigma_at_lowest(x, y_std);

    CalibrationResult {
        method: CalibrationMethod::SimpleLinear,
        slope,
        intercept,
        r_squared: linear_r_squared(x, y, slope, intercept),
        lod: ratio_or_nan(3.0 * sigma, slope),
        loq: ratio_or_nan(10.0 * sigma, slope),
        bec: ratio_or_nan(intercept, slope),
        x: x.to_vec(),
        y: y.to_vec(),
        y_std: y_std.to_vec(),
    }
}

/// weighted least squares with weights `1/σ²`
///
/// Falls back to the simple linear fit, still labelled Weighted, when a σ is
/// zero or not finite or the normal equations are singular.
pub fn fit_weighted(x: &[f64], y: &[f64], y_std: &[f64]) -> CalibrationResult {
    let fallback = || CalibrationResult { method: CalibrationMethod::Weighted, ..fit_simple_linear(x, y, y_std) };

    if y_std.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
        warn!("zero or invalid standard deviation, weighted fit falls back to simple linear");
        return fallback();
    }
    let weights: Vec<f64> = y_std.iter().map(|s| 1.0 / (s * s)).collect();

    let (mut sw, mut swx, mut swxx, mut swy, mut swxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (w, a, b) in izip!(&weights, x, y) {
        sw += w;
        swx += w * a;
        swxx += w * a * a;
        swy += w * b;
        swxy += w * a * b;
    }

    // normal equations for (intercept, slope)
    let normal = Matrix2::new(sw, swx, swx, swxx);
    let det = normal.determinant();
    let inverse = match normal.try_inverse() {
        Some(inv) if det.abs() > SINGULAR_DETERMINANT && det.is_finite() => inv,
        _ => {
            warn!(det, "singular weighted normal equations, falling back to simple linear");
            return fallback();
        }
    };
    let beta = inverse * Vector2::new(swy, swxy);
    let (intercept, slope) = (beta[0], beta[1]);

    let y_mean = mean(y);
    let ss_res: f64 = izip!(&weights, x, y).map(|(w, a, b)| w * (b - (slope * a + intercept)).powi(2)).sum();
    let ss_tot: f64 = izip!(&weights, y).map(|(w, b)| w * (b - y_mean).powi(2)).sum();
    let sigma = sigma_at_lowest(x, y_std);

    CalibrationResult {
        method: CalibrationMethod::Weighted,
        slope,
        intercept,
        r_squared: r_squared(ss_res, ss_tot),
        lod: ratio_or_nan(3.0 * sigma, slope),
        loq: ratio_or_nan(10.0 * sigma, slope),
        bec: ratio_or_nan(intercept, slope),
        x: x.to_vec(),
        y: y.to_vec(),
        y_std: y_std.to_vec(),
    }
}

/// result record of a user supplied sensitivity
pub fn manual_result(slope: f64, x: &[f64], y: &[f64], y_std: &[f64]) -> CalibrationResult {
    let sigma = sigma_at_lowest(x, y_std);
    CalibrationResult {
        method: CalibrationMethod::Manual,
        slope,
        intercept: 0.0,
        r_squared: 1.0,
        lod: ratio_or_nan(3.0 * sigma, slope),
        loq: ratio_or_nan(10.0 * sigma, slope),
        bec: ratio_or_nan(3.0 * sigma, slope),
        x: x.to_vec(),
        y: y.to_vec(),
        y_std: y_std.to_vec(),
    }
}

/// fit one calibration method to a set of standards
///
/// Arguments:
///
/// * `concentrations` - concentration of each standard, -1 marks an unused standard
/// * `signals_per_sample` - count rate series (counts per second) of each standard
/// * `method` - regression mode; Manual is resolved through [`IsotopeCalibration`]
///
/// Returns:
///
/// * `SpResult<Option<CalibrationResult>>` - `None` with fewer than two usable standards
///
/// # Examples
///
/// ```
/// use spcore::calibration::ionic::{perform_calibration, CalibrationMethod};
///
/// let signals = vec![vec![10.0, 10.0], vec![20.0, 20.0], vec![30.0, 30.0]];
/// let fit = perform_calibration(&[1.0, 2.0, 3.0], &signals, CalibrationMethod::SimpleLinear).unwrap().unwrap();
/// assert!((fit.slope - 10.0).abs() < 1e-9);
/// ```
pub fn perform_calibration(
    concentrations: &[f64],
    signals_per_sample: &[Vec<f64>],
    method: CalibrationMethod,
) -> SpResult<Option<CalibrationResult>> {
    if concentrations.len() != signals_per_sample.len() {
        return Err(SpError::data(format!(
            "{} concentrations for {} standards",
            concentrations.len(),
            signals_per_sample.len()
        )));
    }
    let standards: Vec<StandardResponse> = izip!(concentrations, signals_per_sample)
        .map(|(c, s)| StandardResponse::from_cps(*c, s))
        .collect();
    let calibration = match IsotopeCalibration::fit(&standards) {
        Some(c) => c,
        None => return Ok(None),
    };
    match method {
        CalibrationMethod::Manual => Err(SpError::configuration("manual calibration needs a user supplied slope")),
        m => Ok(Some(calibration.result(m))),
    }
}

/// All fits of one isotope and the user's choice among them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IsotopeCalibration {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub y_std: Vec<f64>,
    pub zero: CalibrationResult,
    pub simple: CalibrationResult,
    pub weighted: CalibrationResult,
    pub manual_slope: Option<f64>,
    /// explicit method choice, auto selection when unset
    pub selected: Option<CalibrationMethod>,
}

impl IsotopeCalibration {
    /// fit all regression modes, `None` with fewer than two usable standards
    pub fn fit(standards: &[StandardResponse]) -> Option<Self> {
        let usable: Vec<&StandardResponse> = standards
            .iter()
            .filter(|s| s.concentration != UNUSED_CONCENTRATION && s.concentration.is_finite() && s.concentration >= 0.0)
            .collect();
        if usable.len() < 2 {
            return None;
        }
        let x: Vec<f64> = usable.iter().map(|s| s.concentration).collect();
        let y: Vec<f64> = usable.iter().map(|s| s.mean_cps).collect();
        let y_std: Vec<f64> = usable.iter().map(|s| s.std_cps).collect();

        Some(IsotopeCalibration {
            zero: fit_zero_intercept(&x, &y, &y_std),
            simple: fit_simple_linear(&x, &y, &y_std),
            weighted: fit_weighted(&x, &y, &y_std),
            x,
            y,
            y_std,
            manual_slope: None,
            selected: None,
        })
    }

    pub fn with_manual_slope(mut self, slope: f64) -> Self {
        self.manual_slope = Some(slope);
        self
    }

    /// fitted method with the highest R², ties resolved in the order zero, simple, weighted
    pub fn best_fitted_method(&self) -> CalibrationMethod {
        let score = |r: f64| if r.is_nan() { f64::NEG_INFINITY } else { r };
        let mut best = CalibrationMethod::ZeroIntercept;
        for method in CalibrationMethod::FITTED {
            if score(self.result(method).r_squared) > score(self.result(best).r_squared) {
                best = method;
            }
        }
        best
    }

    /// Manual when an override slope exists, then the explicit choice, then the best R²
    pub fn preferred_method(&self) -> CalibrationMethod {
        if self.manual_slope.is_some() {
            return CalibrationMethod::Manual;
        }
        match self.selected {
            Some(CalibrationMethod::Manual) | None => self.best_fitted_method(),
            Some(m) => m,
        }
    }

    pub fn result(&self, method: CalibrationMethod) -> CalibrationResult {
        match method {
            CalibrationMethod::ZeroIntercept => self.zero.clone(),
            CalibrationMethod::SimpleLinear => self.simple.clone(),
            CalibrationMethod::Weighted => self.weighted.clone(),
            CalibrationMethod::Manual => match self.manual_slope {
                Some(slope) => manual_result(slope, &self.x, &self.y, &self.y_std),
                None => self.result(self.best_fitted_method()),
            },
        }
    }

    pub fn preferred(&self) -> CalibrationResult {
        let method = self.preferred_method();
        info!(method = %method, "calibration method selected");
        self.result(method)
    }

    /// one flat record per method, the preferred one flagged
    pub fn records(&self, isotope: &str) -> Vec<CalibrationRecord> {
        let preferred = self.preferred_method();
        let mut methods = CalibrationMethod::FITTED.to_vec();
        if self.manual_slope.is_some() {
            methods.push(CalibrationMethod::Manual);
        }
        methods
            .into_iter()
            .map(|m| {
                let r = self.result(m);
                CalibrationRecord {
                    isotope: isotope.to_string(),
                    method: m.name().to_string(),
                    slope: r.slope,
                    intercept: r.intercept,
                    r_squared: r.r_squared,
                    lod: r.lod,
                    loq: r.loq,
                    bec: r.bec,
                    preferred: m == preferred,
                }
            })
            .collect()
    }
}

/// Flat export row, one per isotope and method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub isotope: String,
    pub method: String,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub lod: f64,
    pub loq: f64,
    pub bec: f64,
    pub preferred: bool,
}
