use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::algorithm::stats::{mean, std};
use crate::calibration::ionic::{linear_r_squared, ordinary_least_squares};
use crate::calibration::units::ConcentrationUnit;
use crate::data::particle::Particle;
use crate::error::{SpError, SpResult};

/// mass of a spherical particle in fg
///
/// Arguments:
///
/// * `diameter_nm` - particle diameter in nm
/// * `density_g_cm3` - material density in g/cm³
///
/// Returns:
///
/// * `f64` - particle mass in fg
///
/// # Examples
///
/// ```
/// use spcore::calibration::transport::calculate_particle_mass;
///
/// // 100 nm gold sphere
/// let mass = calculate_particle_mass(100.0, 19.32);
/// assert!((mass - 10.116).abs() < 1e-3);
/// ```
pub fn calculate_particle_mass(diameter_nm: f64, density_g_cm3: f64) -> f64 {
    let radius_cm = diameter_nm / 2.0 * 1e-7;
    let volume_cm3 = 4.0 / 3.0 * PI * radius_cm.powi(3);
    volume_cm3 * density_g_cm3 * 1e15
}

/// diameter in nm of a sphere of `mass_fg` fg, `None` for non-physical input
pub fn diameter_from_mass(mass_fg: f64, density_g_cm3: f64) -> Option<f64> {
    if !(density_g_cm3 > 0.0) {
        return None;
    }
    let volume_cm3 = mass_fg * 1e-15 / density_g_cm3;
    if !(volume_cm3 > 0.0) || !volume_cm3.is_finite() {
        return None;
    }
    let diameter = 2.0 * (3.0 * volume_cm3 / (4.0 * PI)).cbrt() * 1e7;
    if diameter > 0.0 && diameter.is_finite() {
        Some(diameter)
    } else {
        None
    }
}

/// particle diameter in nm from integrated counts and a counts/fg conversion factor
pub fn particle_diameter_nm(total_counts: f64, conversion_factor: f64, density_g_cm3: f64) -> Option<f64> {
    if total_counts <= 0.0 || !(conversion_factor > 0.0) {
        return None;
    }
    diameter_from_mass(total_counts / conversion_factor, density_g_cm3)
}

/// counts/fg sensitivity from an ionic slope and a transport rate
///
/// Arguments:
///
/// * `ionic_slope` - counts/s per concentration `unit`
/// * `unit` - unit of the ionic calibration
/// * `transport_rate_ul_s` - sample uptake reaching the plasma in µL/s
///
/// Returns:
///
/// * `f64` - counts per fg of analyte
pub fn conversion_factor(ionic_slope: f64, unit: ConcentrationUnit, transport_rate_ul_s: f64) -> f64 {
    ionic_slope / unit.ng_per_l() / transport_rate_ul_s
}

/// diameters of the particles that give a physical size, others are silently dropped
pub fn size_distribution(particles: &[Particle], conversion_factor: f64, density_g_cm3: f64) -> Vec<f64> {
    particles
        .iter()
        .filter(|p| p.total_counts > 0.0)
        .filter_map(|p| particle_diameter_nm(p.total_counts, conversion_factor, density_g_cm3))
        .collect()
}

/// Counts per fg of analyte from particle standards of known mass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleCalibration {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub masses_fg: Vec<f64>,
    pub counts: Vec<f64>,
}

/// calibrate particle mass against mean particle counts
///
/// A single standard gives a line through the origin; with several standards an
/// origin point is added and an ordinary least-squares line is fitted.
///
/// Arguments:
///
/// * `masses_fg` - particle mass of each standard in fg
/// * `mean_counts` - mean integrated counts per particle of each standard
///
/// Returns:
///
/// * `SpResult<ParticleCalibration>` - a data error without standards or with non-positive masses
pub fn calibrate_particle_mass(masses_fg: &[f64], mean_counts: &[f64]) -> SpResult<ParticleCalibration> {
    if masses_fg.is_empty() || masses_fg.len() != mean_counts.len() {
        return Err(SpError::data(format!(
            "particle calibration needs matching masses and counts, got {} and {}",
            masses_fg.len(),
            mean_counts.len()
        )));
    }
    if masses_fg.iter().any(|m| !(*m > 0.0)) {
        return Err(SpError::data("particle standard masses must be positive"));
    }

    if masses_fg.len() == 1 {
        return Ok(ParticleCalibration {
            slope: mean_counts[0] / masses_fg[0],
            intercept: 0.0,
            r_squared: 1.0,
            masses_fg: masses_fg.to_vec(),
            counts: mean_counts.to_vec(),
        });
    }

    let mut points: Vec<(f64, f64)> = masses_fg.iter().copied().zip(mean_counts.iter().copied()).collect();
    points.push((0.0, 0.0));
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (x, y): (Vec<f64>, Vec<f64>) = points.into_iter().unzip();

    let (slope, intercept) = ordinary_least_squares(&x, &y);
    Ok(ParticleCalibration { slope, intercept, r_squared: linear_r_squared(&x, &y, slope, intercept), masses_fg: x, counts: y })
}

/// Mass-method transport rate and the sensitivity used for sizing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MassMethodResult {
    pub transport_rate_ul_s: f64,
    /// ionic slope in counts/s per fg/µL
    pub adjusted_ionic_slope: f64,
    /// counts per fg, equal to the particle calibration slope
    pub conversion_factor: f64,
}

/// transport rate from an ionic slope and a particle mass calibration slope
pub fn transport_rate_mass_method(
    ionic_slope: f64,
    unit: ConcentrationUnit,
    particle_slope: f64,
) -> SpResult<MassMethodResult> {
    if !(particle_slope > 0.0) || !(ionic_slope > 0.0) {
        return Err(SpError::data(format!(
            "mass method needs positive slopes, got ionic {} and particle {}",
            ionic_slope, particle_slope
        )));
    }
    let adjusted = ionic_slope / unit.ng_per_l();
    let rate = adjusted / particle_slope;
    Ok(MassMethodResult { transport_rate_ul_s: rate, adjusted_ionic_slope: adjusted, conversion_factor: adjusted / rate })
}

/// number concentration of a particle suspension in particles/mL
pub fn particles_per_ml(concentration_ng_l: f64, diameter_nm: f64, density_g_cm3: f64) -> f64 {
    let mass_kg = calculate_particle_mass(diameter_nm, density_g_cm3) * 1e-18;
    if !(mass_kg > 0.0) {
        return 0.0;
    }
    concentration_ng_l / (mass_kg * 1e12) / 1000.0
}

/// One reference suspension measured for the number method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumberMethodSample {
    pub sample_name: String,
    pub particles_detected: usize,
    pub diameter_nm: f64,
    pub concentration_ng_l: f64,
    pub acquisition_time_s: f64,
    pub density_g_cm3: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TransportStatus {
    Ok,
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumberMethodResult {
    pub sample_name: String,
    pub particles_per_ml: f64,
    pub transport_rate_ul_s: f64,
    pub status: TransportStatus,
}

/// transport rate of one reference suspension, rate 0 with an invalid status on bad input
pub fn transport_rate_number_method(sample: &NumberMethodSample) -> NumberMethodResult {
    let per_ml = particles_per_ml(sample.concentration_ng_l, sample.diameter_nm, sample.density_g_cm3);
    let invalid = |reason: &str| NumberMethodResult {
        sample_name: sample.sample_name.clone(),
        particles_per_ml: per_ml,
        transport_rate_ul_s: 0.0,
        status: TransportStatus::Invalid(reason.to_string()),
    };
    if !(per_ml > 0.0) || !per_ml.is_finite() {
        return invalid("particle concentration must be positive");
    }
    if !(sample.acquisition_time_s > 0.0) {
        return invalid("acquisition time must be positive");
    }
    let rate_ml_s = sample.particles_detected as f64 / (per_ml * sample.acquisition_time_s);
    NumberMethodResult {
        sample_name: sample.sample_name.clone(),
        particles_per_ml: per_ml,
        transport_rate_ul_s: rate_ml_s * 1000.0,
        status: TransportStatus::Ok,
    }
}

/// mean and standard deviation of the valid number-method rates
pub fn summarize_transport_rates(results: &[NumberMethodResult]) -> Option<(f64, f64)> {
    let rates: Vec<f64> = results
        .iter()
        .filter(|r| r.status == TransportStatus::Ok)
        .map(|r| r.transport_rate_ul_s)
        .collect();
    if rates.is_empty() {
        warn!("no valid number-method transport rate");
        return None;
    }
    Some((mean(&rates), std(&rates)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MassUnit {
    Gram,
    Milligram,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Seconds,
    Minutes,
}

/// Gravimetric uptake measurement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightMethodInput {
    pub initial_mass: f64,
    pub final_mass: f64,
    pub waste_mass: f64,
    pub mass_unit: MassUnit,
    pub time: f64,
    pub time_unit: TimeUnit,
}

/// transport rate in µL/s from the mass of sample that reached the plasma
///
/// Assumes an aqueous sample, 1 mg per µL.
pub fn transport_rate_weight_method(input: &WeightMethodInput) -> SpResult<f64> {
    let to_g = match input.mass_unit {
        MassUnit::Gram => 1.0,
        MassUnit::Milligram => 1e-3,
    };
    let seconds = match input.time_unit {
        TimeUnit::Seconds => input.time,
        TimeUnit::Minutes => input.time * 60.0,
    };
    let (initial, final_, waste) = (input.initial_mass * to_g, input.final_mass * to_g, input.waste_mass * to_g);

    if !(seconds > 0.0) {
        return Err(SpError::data("analysis time must be positive"));
    }
    if [initial, final_, waste].iter().any(|m| !m.is_finite() || *m < 0.0) {
        return Err(SpError::data("masses must be non-negative numbers"));
    }
    let consumed = initial - final_;
    if consumed <= 0.0 {
        return Err(SpError::data("initial mass must exceed final mass"));
    }
    let to_plasma = consumed - waste;
    if to_plasma <= 0.0 {
        return Err(SpError::data("sample consumed must exceed waste mass"));
    }
    Ok(to_plasma * 1000.0 / seconds)
}

/// Way a transport rate was determined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportMethod {
    Mass,
    Number,
    Weight,
}

/// Transport rates in µL/s found by each method, `None` where not measured.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportRates {
    pub mass: Option<f64>,
    pub number: Option<f64>,
    pub weight: Option<f64>,
}

impl TransportRates {
    pub fn get(&self, method: TransportMethod) -> Option<f64> {
        match method {
            TransportMethod::Mass => self.mass,
            TransportMethod::Number => self.number,
            TransportMethod::Weight => self.weight,
        }
    }

    /// mean rate over the selected methods that have a positive rate
    ///
    /// Arguments:
    ///
    /// * `selected` - methods to include, duplicates count once
    ///
    /// Returns:
    ///
    /// * `Option<f64>` - the average in µL/s, `None` when no selected method has a rate
    ///
    /// # Examples
    ///
    /// ```
    /// use spcore::calibration::transport::{TransportMethod, TransportRates};
    ///
    /// let rates = TransportRates { mass: Some(2.0), number: Some(4.0), weight: None };
    /// assert_eq!(rates.average(&[TransportMethod::Mass, TransportMethod::Number]), Some(3.0));
    /// assert_eq!(rates.average(&[TransportMethod::Weight]), None);
    /// ```
    pub fn average(&self, selected: &[TransportMethod]) -> Option<f64> {
        let mut methods = selected.to_vec();
        methods.sort_by_key(|m| *m as u8);
        methods.dedup();
        let rates: Vec<f64> = methods
            .into_iter()
            .filter_map(|m| self.get(m))
            .filter(|r| *r > 0.0 && r.is_finite())
            .collect();
        if rates.is_empty() {
            None
        } else {
            Some(mean(&rates))
        }
    }
}

/// Mass and size detection limits of one channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MassLimits {
    /// minimum detectable analyte mass in fg
    pub mdl_fg: f64,
    /// minimum quantifiable analyte mass in fg, 10/3 of the MDL
    pub mql_fg: f64,
    /// size detection limit in nm, `None` without a density
    pub sdl_nm: Option<f64>,
    /// size quantification limit in nm
    pub sql_nm: Option<f64>,
    pub background_cps: f64,
    pub background_sd_cps: f64,
    /// background equivalent concentration in ppt
    pub background_ppt: f64,
    pub background_sd_ppt: f64,
}

/// mass and size limits from a channel's detection limit and its calibration
///
/// The detection limit in counts above background is turned into analyte
/// mass with the counts/fg sensitivity of the ionic slope at the given
/// transport rate; sizes assume a solid sphere.
///
/// Arguments:
///
/// * `lod_counts` - detection limit above background in counts per event
/// * `background_counts` - background mean per bin
/// * `dwell_time_s` - bin width, the background stays per bin when not positive
/// * `ionic_slope` - counts/s per concentration `unit`
/// * `unit` - unit of the ionic calibration
/// * `transport_rate_ul_s` - sample uptake reaching the plasma
/// * `density_g_cm3` - material density for the size limits
///
/// Returns:
///
/// * `Option<MassLimits>` - `None` when the limit, slope or rate is not positive
pub fn calculate_mass_limits(
    lod_counts: f64,
    background_counts: f64,
    dwell_time_s: f64,
    ionic_slope: f64,
    unit: ConcentrationUnit,
    transport_rate_ul_s: f64,
    density_g_cm3: Option<f64>,
) -> Option<MassLimits> {
    if !(lod_counts > 0.0) || !(ionic_slope > 0.0) || !(transport_rate_ul_s > 0.0) {
        return None;
    }
    let factor = conversion_factor(ionic_slope, unit, transport_rate_ul_s);
    let mdl_fg = lod_counts / factor;
    let mql_fg = mdl_fg * 10.0 / 3.0;

    let background = background_counts.max(0.0);
    let per_second = if dwell_time_s > 0.0 { 1.0 / dwell_time_s } else { 1.0 };
    let background_cps = background * per_second;
    let background_sd_cps = background.sqrt() * per_second;
    let to_ppt = |cps: f64| unit.convert(cps / ionic_slope, ConcentrationUnit::Ppt);

    let size = |mass: f64| density_g_cm3.and_then(|d| diameter_from_mass(mass, d));
    Some(MassLimits {
        mdl_fg,
        mql_fg,
        sdl_nm: size(mdl_fg),
        sql_nm: size(mql_fg),
        background_cps,
        background_sd_cps,
        background_ppt: to_ppt(background_cps),
        background_sd_ppt: to_ppt(background_sd_cps),
    })
}

/// What a measured element contributes to its particle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementComposition {
    /// mass fraction of the element in the particle material, in (0, 1]
    pub mass_fraction: f64,
    /// atomic mass of the element in g/mol
    pub molar_mass_g_mol: f64,
    /// molar mass of the particle compound, element moles are used when missing
    pub compound_molar_mass_g_mol: Option<f64>,
    /// density of the pure element in g/cm³
    pub element_density_g_cm3: Option<f64>,
    /// density of the particle compound in g/cm³
    pub compound_density_g_cm3: Option<f64>,
}

impl ElementComposition {
    /// a pure-element particle
    pub fn pure(molar_mass_g_mol: f64, density_g_cm3: f64) -> Self {
        ElementComposition {
            mass_fraction: 1.0,
            molar_mass_g_mol,
            compound_molar_mass_g_mol: None,
            element_density_g_cm3: Some(density_g_cm3),
            compound_density_g_cm3: Some(density_g_cm3),
        }
    }
}

/// Mass, amount and size of one particle seen through one element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleMass {
    pub element_mass_fg: f64,
    pub element_moles_fmol: f64,
    pub particle_mass_fg: f64,
    pub particle_moles_fmol: f64,
    pub element_diameter_nm: Option<f64>,
    /// falls back to the element diameter without a compound density
    pub particle_diameter_nm: Option<f64>,
}

/// element and particle mass of an event from its counts
///
/// Arguments:
///
/// * `total_counts` - integrated counts of the event
/// * `conversion_factor` - counts per fg of the element
/// * `composition` - mass fraction, molar masses and densities
///
/// Returns:
///
/// * `Option<ParticleMass>` - `None` for non-positive counts or an unusable composition
///
/// # Examples
///
/// ```
/// use spcore::calibration::transport::{particle_mass, ElementComposition};
///
/// // TiO2: Ti is 59.9 % of the mass
/// let tio2 = ElementComposition {
///     mass_fraction: 0.599,
///     molar_mass_g_mol: 47.867,
///     compound_molar_mass_g_mol: Some(79.866),
///     element_density_g_cm3: Some(4.5),
///     compound_density_g_cm3: Some(4.23),
/// };
/// let mass = particle_mass(599.0, 10.0, &tio2).unwrap();
/// assert!((mass.element_mass_fg - 59.9).abs() < 1e-9);
/// assert!((mass.particle_mass_fg - 100.0).abs() < 1e-9);
/// ```
pub fn particle_mass(total_counts: f64, conversion_factor: f64, composition: &ElementComposition) -> Option<ParticleMass> {
    let fraction = composition.mass_fraction;
    if !(total_counts > 0.0)
        || !(conversion_factor > 0.0)
        || !(composition.molar_mass_g_mol > 0.0)
        || !(fraction > 0.0 && fraction <= 1.0)
    {
        return None;
    }
    let element_mass_fg = total_counts / conversion_factor;
    let element_moles_fmol = element_mass_fg / composition.molar_mass_g_mol;
    let particle_mass_fg = element_mass_fg / fraction;
    let particle_moles_fmol = match composition.compound_molar_mass_g_mol {
        Some(m) if m > 0.0 => particle_mass_fg / m,
        _ => element_moles_fmol,
    };

    let element_diameter_nm = composition.element_density_g_cm3.and_then(|d| diameter_from_mass(element_mass_fg, d));
    let particle_diameter_nm = match composition.compound_density_g_cm3 {
        Some(d) if d > 0.0 => diameter_from_mass(particle_mass_fg, d),
        _ => element_diameter_nm,
    };

    Some(ParticleMass {
        element_mass_fg,
        element_moles_fmol,
        particle_mass_fg,
        particle_moles_fmol,
        element_diameter_nm,
        particle_diameter_nm,
    })
}

/// Sums over the elements of one multi-element particle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleTotals {
    pub element_mass_fg: f64,
    pub element_moles_fmol: f64,
    pub particle_mass_fg: f64,
    pub particle_moles_fmol: f64,
}

impl ParticleTotals {
    pub fn from_masses(masses: &[ParticleMass]) -> Self {
        masses.iter().fold(ParticleTotals::default(), |t, m| ParticleTotals {
            element_mass_fg: t.element_mass_fg + m.element_mass_fg,
            element_moles_fmol: t.element_moles_fmol + m.element_moles_fmol,
            particle_mass_fg: t.particle_mass_fg + m.particle_mass_fg,
            particle_moles_fmol: t.particle_moles_fmol + m.particle_moles_fmol,
        })
    }

    /// mass and mole percentage of one element of the particle, zeros when the totals are empty
    pub fn percentages(&self, mass: &ParticleMass) -> (f64, f64) {
        let percent = |part: f64, total: f64| if total > 0.0 { part / total * 100.0 } else { 0.0 };
        (
            percent(mass.element_mass_fg, self.element_mass_fg),
            percent(mass.element_moles_fmol, self.element_moles_fmol),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn particle(counts: f64) -> Particle {
        Particle { left_idx: 0, right_idx: 0, peak_idx: 0, total_counts: counts, max_height: counts, snr: 1.0 }
    }

    #[test]
    fn test_mass_and_diameter_invert() {
        let mass = calculate_particle_mass(60.0, 10.49);
        let d = diameter_from_mass(mass, 10.49).unwrap();
        assert_relative_eq!(d, 60.0, epsilon = 1e-9);
        assert_eq!(diameter_from_mass(0.0, 10.49), None);
        assert_eq!(diameter_from_mass(1.0, 0.0), None);
    }

    #[test]
    fn test_size_distribution_drops_non_physical() {
        let factor = 2.0;
        let particles = vec![particle(-5.0), particle(0.0), particle(20.0), particle(f64::NAN)];
        let sizes = size_distribution(&particles, factor, 19.32);
        assert_eq!(sizes.len(), 1);
        assert_relative_eq!(calculate_particle_mass(sizes[0], 19.32), 10.0, epsilon = 1e-9);
        assert!(size_distribution(&particles, 0.0, 19.32).is_empty());
    }

    #[test]
    fn test_particle_calibration() {
        let single = calibrate_particle_mass(&[10.0], &[250.0]).unwrap();
        assert_eq!((single.slope, single.intercept), (25.0, 0.0));

        let multi = calibrate_particle_mass(&[20.0, 10.0], &[500.0, 250.0]).unwrap();
        assert_relative_eq!(multi.slope, 25.0, epsilon = 1e-9);
        assert_relative_eq!(multi.intercept, 0.0, epsilon = 1e-9);
        assert_relative_eq!(multi.r_squared, 1.0, epsilon = 1e-12);
        assert_eq!(multi.masses_fg, vec![0.0, 10.0, 20.0]);

        assert!(calibrate_particle_mass(&[], &[]).is_err());
        assert!(calibrate_particle_mass(&[0.0], &[1.0]).is_err());
    }

    #[test]
    fn test_mass_method() {
        // 50 000 cps per ppb, 25 counts per fg
        let result = transport_rate_mass_method(50_000.0, ConcentrationUnit::Ppb, 25.0).unwrap();
        assert_relative_eq!(result.adjusted_ionic_slope, 50.0);
        assert_relative_eq!(result.transport_rate_ul_s, 2.0);
        assert_relative_eq!(result.conversion_factor, 25.0);
        assert_relative_eq!(conversion_factor(50_000.0, ConcentrationUnit::Ppb, 2.0), 25.0);
        assert!(transport_rate_mass_method(1.0, ConcentrationUnit::Ppb, 0.0).is_err());
    }

    #[test]
    fn test_number_method() {
        let sample = NumberMethodSample {
            sample_name: "Au60".to_string(),
            particles_detected: 1200,
            diameter_nm: 60.0,
            concentration_ng_l: 50.0,
            acquisition_time_s: 60.0,
            density_g_cm3: 19.32,
        };
        let per_ml = particles_per_ml(50.0, 60.0, 19.32);
        let mass_kg = calculate_particle_mass(60.0, 19.32) * 1e-18;
        assert_relative_eq!(per_ml, 50.0 * 1e-12 / mass_kg / 1000.0, max_relative = 1e-12);

        let result = transport_rate_number_method(&sample);
        assert_eq!(result.status, TransportStatus::Ok);
        assert_relative_eq!(result.transport_rate_ul_s, 1000.0 * 1200.0 / (per_ml * 60.0), max_relative = 1e-12);

        let bad = transport_rate_number_method(&NumberMethodSample { acquisition_time_s: 0.0, ..sample.clone() });
        assert_eq!(bad.transport_rate_ul_s, 0.0);
        assert!(matches!(bad.status, TransportStatus::Invalid(_)));

        let (m, s) = summarize_transport_rates(&[result.clone(), bad, result.clone()]).unwrap();
        assert_relative_eq!(m, result.transport_rate_ul_s);
        assert_eq!(s, 0.0);
        assert_eq!(summarize_transport_rates(&[]), None);
    }

    #[test]
    fn test_weight_method() {
        let input = WeightMethodInput {
            initial_mass: 10.0,
            final_mass: 9.0,
            waste_mass: 0.9,
            mass_unit: MassUnit::Gram,
            time: 1.0,
            time_unit: TimeUnit::Minutes,
        };
        assert_relative_eq!(transport_rate_weight_method(&input).unwrap(), 100.0 / 60.0, epsilon = 1e-9);

        let mg = WeightMethodInput { initial_mass: 10_000.0, final_mass: 9_000.0, waste_mass: 900.0, mass_unit: MassUnit::Milligram, ..input.clone() };
        assert_relative_eq!(transport_rate_weight_method(&mg).unwrap(), 100.0 / 60.0, epsilon = 1e-9);

        let wasted = WeightMethodInput { waste_mass: 1.5, ..input.clone() };
        assert!(transport_rate_weight_method(&wasted).is_err());
        let no_time = WeightMethodInput { time: 0.0, ..input };
        assert!(transport_rate_weight_method(&no_time).is_err());
    }

    #[test]
    fn test_average_transport_rate() {
        let rates = TransportRates { mass: Some(2.0), number: Some(0.0), weight: Some(5.0) };
        assert_eq!(rates.average(&[TransportMethod::Mass, TransportMethod::Weight]), Some(3.5));
        // a zero rate is not a measurement
        assert_eq!(rates.average(&[TransportMethod::Mass, TransportMethod::Number]), Some(2.0));
        assert_eq!(rates.average(&[TransportMethod::Mass, TransportMethod::Mass]), Some(2.0));
        assert_eq!(rates.average(&[]), None);
        assert_eq!(TransportRates::default().average(&[TransportMethod::Number]), None);
    }

    #[test]
    fn test_mass_limits() {
        // 50 000 cps per ppb at 2 µL/s gives 25 counts per fg
        let limits = calculate_mass_limits(50.0, 4.0, 1e-4, 50_000.0, ConcentrationUnit::Ppb, 2.0, Some(19.32)).unwrap();
        assert_relative_eq!(limits.mdl_fg, 2.0, epsilon = 1e-12);
        assert_relative_eq!(limits.mql_fg, 20.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(calculate_particle_mass(limits.sdl_nm.unwrap(), 19.32), 2.0, epsilon = 1e-9);
        assert!(limits.sql_nm.unwrap() > limits.sdl_nm.unwrap());
        assert_relative_eq!(limits.background_cps, 40_000.0, epsilon = 1e-6);
        assert_relative_eq!(limits.background_sd_cps, 20_000.0, epsilon = 1e-6);
        // 0.8 ppb of background
        assert_relative_eq!(limits.background_ppt, 800.0, epsilon = 1e-9);
        assert_relative_eq!(limits.background_sd_ppt, 400.0, epsilon = 1e-9);

        let no_density = calculate_mass_limits(50.0, 4.0, 1e-4, 50_000.0, ConcentrationUnit::Ppb, 2.0, None).unwrap();
        assert_eq!(no_density.sdl_nm, None);
        assert!(calculate_mass_limits(0.0, 4.0, 1e-4, 50_000.0, ConcentrationUnit::Ppb, 2.0, None).is_none());
        assert!(calculate_mass_limits(50.0, 4.0, 1e-4, 50_000.0, ConcentrationUnit::Ppb, 0.0, None).is_none());
    }

    #[test]
    fn test_particle_mass_from_composition() {
        let au = ElementComposition::pure(196.97, 19.32);
        let mass = particle_mass(250.0, 25.0, &au).unwrap();
        assert_relative_eq!(mass.element_mass_fg, 10.0);
        assert_eq!(mass.element_mass_fg, mass.particle_mass_fg);
        assert_relative_eq!(mass.element_moles_fmol, 10.0 / 196.97, epsilon = 1e-12);
        assert_eq!(mass.particle_moles_fmol, mass.element_moles_fmol);
        assert_relative_eq!(calculate_particle_mass(mass.particle_diameter_nm.unwrap(), 19.32), 10.0, epsilon = 1e-9);

        let oxide = ElementComposition {
            mass_fraction: 0.5,
            molar_mass_g_mol: 50.0,
            compound_molar_mass_g_mol: Some(100.0),
            element_density_g_cm3: None,
            compound_density_g_cm3: None,
        };
        let mass = particle_mass(100.0, 10.0, &oxide).unwrap();
        assert_relative_eq!(mass.particle_mass_fg, 20.0);
        assert_relative_eq!(mass.particle_moles_fmol, 0.2);
        assert_eq!(mass.particle_diameter_nm, None);

        assert!(particle_mass(0.0, 10.0, &oxide).is_none());
        assert!(particle_mass(100.0, 10.0, &ElementComposition { mass_fraction: 0.0, ..oxide.clone() }).is_none());
        assert!(particle_mass(100.0, 10.0, &ElementComposition { mass_fraction: 1.5, ..oxide }).is_none());
    }

    #[test]
    fn test_particle_totals() {
        let a = particle_mass(30.0, 1.0, &ElementComposition::pure(10.0, 1.0)).unwrap();
        let b = particle_mass(10.0, 1.0, &ElementComposition::pure(20.0, 1.0)).unwrap();
        let totals = ParticleTotals::from_masses(&[a.clone(), b]);
        assert_relative_eq!(totals.element_mass_fg, 40.0);
        assert_relative_eq!(totals.element_moles_fmol, 3.5);
        let (mass_pct, mole_pct) = totals.percentages(&a);
        assert_relative_eq!(mass_pct, 75.0);
        assert_relative_eq!(mole_pct, 300.0 / 3.5, epsilon = 1e-9);
        assert_eq!(ParticleTotals::default().percentages(&a), (0.0, 0.0));
    }
}
