// src/lib.rs
pub mod data {
    pub mod run;
    pub mod loader;
}

pub mod batch;
pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod session;

pub use error::{TrackError, TrackResult};
