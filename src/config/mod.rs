use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calibration::DetectorConfig;
use crate::retry::RetryPolicy;
use crate::serial::{ListenClass, Uid};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read settings file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Everything a configuration session needs, passed explicitly to each stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub serial: SerialSettings,
    pub listen: ListenSettings,
    pub defaults: DeviceDefaults,
    pub detector: DetectorConfig,
    pub retry: RetrySettings,
    pub modbus: ModbusSettings,
}

impl Settings {
    /// Load settings from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(&text)?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: Option<String>,
    /// Baud rate the sensors are configured at
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// Check confirmation phrases on setter replies
    pub verify_responses: bool,
}

impl SerialSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115200,
            read_timeout_ms: 5000,
            verify_responses: true,
        }
    }
}

/// Idle timeouts that close a reply frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenSettings {
    pub setter_ms: u64,
    pub query_ms: u64,
    pub calibration_ms: u64,
}

impl ListenSettings {
    pub fn idle_for(&self, class: ListenClass) -> Duration {
        let ms = match class {
            ListenClass::Setter => self.setter_ms,
            ListenClass::Query => self.query_ms,
            ListenClass::Calibration => self.calibration_ms,
        };
        Duration::from_millis(ms)
    }
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            setter_ms: 250,
            query_ms: 500,
            calibration_ms: 20_000,
        }
    }
}

/// Parameters written to every sensor during configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceDefaults {
    pub gain: u32,
    pub centroid_threshold: u32,
    pub centroid_res: u32,
    pub termination: u32,
    pub n_stds: u32,
    /// Reference sensor on the test bench, never counted or configured
    pub check_sensor_uid: Uid,
    /// Baud rate sensors are left at when the session ends
    pub final_baud_rate: u32,
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        Self {
            gain: 3,
            centroid_threshold: 800,
            centroid_res: 10,
            termination: 0,
            n_stds: 10,
            check_sensor_uid: 1111111111,
            final_baud_rate: 9600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_auto_attempts: u32,
    pub retry_delay_ms: u64,
    pub sensor_count_attempts: u32,
    pub sensor_count_delay_ms: u64,
}

impl RetrySettings {
    /// Policy for device operations: the prompt continues the attempt count.
    pub fn operation_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_auto_attempts: self.max_auto_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
            reset_on_user_retry: false,
        }
    }

    /// Policy for calibration: a user retry grants a fresh automatic budget.
    pub fn calibration_policy(&self) -> RetryPolicy {
        RetryPolicy {
            reset_on_user_retry: true,
            ..self.operation_policy()
        }
    }

    pub fn sensor_count_delay(&self) -> Duration {
        Duration::from_millis(self.sensor_count_delay_ms)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_auto_attempts: 3,
            retry_delay_ms: 1000,
            sensor_count_attempts: 3,
            sensor_count_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusSettings {
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub settle_ms: u64,
}

impl Default for ModbusSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            timeout_ms: 1000,
            settle_ms: 1000,
        }
    }
}
