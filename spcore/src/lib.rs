// data module
pub mod data {
    pub mod signal;
    pub mod params;
    pub mod particle;
    pub mod synthetic;
}

// algorithm module
pub mod algorithm {
    pub mod stats;
    pub mod smoothing;
    pub mod distributions;
    pub mod background;
    pub mod detection;
    pub mod multi_element;
}

// calibration module
pub mod calibration {
    pub mod units;
    pub mod ionic;
    pub mod transport;
}

pub mod error;

pub use error::{SpError, SpResult};
