pub mod parser;
pub mod stuck;
pub mod validator;

pub use parser::parse_calibration;
pub use stuck::{stuck_sensor_check, RawSampleSource};
pub use validator::{detect_high_magnitude_outliers, validate_calibration};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serial::ProtocolError;

/// One axis result from a `calibrate` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub sensor_num: u32,
    pub mean: i64,
    pub std_dev: i64,
    pub axis: u32,
}

/// Result of structural validation. `failing_sensors` is `Some` only when
/// specific sensors were identified as bad.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalibrationVerdict {
    pub passed: bool,
    pub failing_sensors: Option<Vec<u32>>,
}

impl CalibrationVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failing_sensors: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("Calibration check failed: median absolute deviation is zero")]
    ZeroVariance,

    #[error("No raw samples to check")]
    NoSamples,

    #[error("Axis index {index} is outside a raw sample of {len} values")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Device error: {0}")]
    Device(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, CalibrationError>;

/// Thresholds for the magnitude and stuck-sensor checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Modified z-score above which a sample is an outlier
    pub outlier_threshold: f64,
    /// Compress samples with ln(1 + |x|) before scoring
    pub use_log: bool,
    pub num_readings: usize,
    pub sample_interval_ms: u64,
    /// Unchanged axes tolerated between two consecutive readings
    pub max_allowed_no_change: usize,
}

impl DetectorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            outlier_threshold: 3.5,
            use_log: true,
            num_readings: 5,
            sample_interval_ms: 500,
            max_allowed_no_change: 3,
        }
    }
}
