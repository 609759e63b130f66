pub mod client;

pub use client::ModbusTester;

use serde::Serialize;

use crate::serial::{SerialError, Uid};

pub const TRIGGER_REG: u16 = 0x0063;
pub const TRIGGER_VALUE: u16 = 0xFFFF;
/// 1 register, 1 means the last measurement is valid
pub const STATUS_REG: u16 = 0x0135;
/// float32 registers, 2 words each, high word first
pub const DISTANCE_REG: u16 = 0x0136;
pub const TEMP_REG: u16 = 0x0139;
pub const VOLTAGE_REG: u16 = 0x013C;

#[derive(Debug, thiserror::Error)]
pub enum ModbusError {
    #[error("Modbus frame error: {0}")]
    Frame(#[from] rmodbus::ErrorKind),

    #[error("Short response from alias {alias}: {len} bytes")]
    ShortResponse { alias: u8, len: usize },

    #[error("No response from alias {alias} for register {register:#06x}")]
    Timeout { alias: u8, register: u16 },

    #[error("Alias {0} is not a valid Modbus address")]
    InvalidAlias(u32),

    #[error("Serial error: {0}")]
    Serial(#[from] SerialError),
}

pub type Result<T> = std::result::Result<T, ModbusError>;

/// Combine two holding registers into an IEEE-754 float, high word first.
pub fn regs_to_f32(high: u16, low: u16) -> f32 {
    f32::from_bits(((high as u32) << 16) | low as u32)
}

/// Values read from one sensor after a triggered measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModbusMeasurement {
    pub uid: Uid,
    pub alias: u8,
    pub status: u16,
    pub distance_mm: f32,
    pub temperature_c: f32,
    pub voltage_v: f32,
}

/// Pass window for a bench measurement.
#[derive(Debug, Clone)]
pub struct ModbusLimits {
    pub status: u16,
    /// Distance reported with no target in range
    pub distance_mm: f32,
    pub temperature_c: (f32, f32),
    pub voltage_v: (f32, f32),
}

impl Default for ModbusLimits {
    fn default() -> Self {
        Self {
            status: 1,
            distance_mm: -99.0,
            temperature_c: (10.0, 40.0),
            voltage_v: (11.2, 12.8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModbusVerification {
    pub status: bool,
    pub distance: bool,
    pub temperature: bool,
    pub voltage: bool,
    pub overall: bool,
    pub failures: Vec<String>,
}

pub fn verify_results(m: &ModbusMeasurement, limits: &ModbusLimits) -> ModbusVerification {
    let status = m.status == limits.status;
    let distance = (m.distance_mm - limits.distance_mm).abs() < 1e-3;
    let temperature =
        (limits.temperature_c.0..=limits.temperature_c.1).contains(&m.temperature_c);
    let voltage = (limits.voltage_v.0..=limits.voltage_v.1).contains(&m.voltage_v);

    let mut failures = Vec::new();
    if !status {
        failures.push(format!("Status {} (expected {})", m.status, limits.status));
    }
    if !distance {
        failures.push(format!(
            "Distance {} mm (expected {} mm)",
            m.distance_mm, limits.distance_mm
        ));
    }
    if !temperature {
        failures.push(format!(
            "Temperature {} \u{b0}C (expected {}-{} \u{b0}C)",
            m.temperature_c, limits.temperature_c.0, limits.temperature_c.1
        ));
    }
    if !voltage {
        failures.push(format!(
            "Voltage {} V (expected {}-{} V)",
            m.voltage_v, limits.voltage_v.0, limits.voltage_v.1
        ));
    }
    for failure in &failures {
        log::warn!("UID {} alias {}: {}", m.uid, m.alias, failure);
    }

    let overall = failures.is_empty();
    if overall {
        log::info!("All checks passed for UID {}, alias {}", m.uid, m.alias);
    }
    ModbusVerification {
        status,
        distance,
        temperature,
        voltage,
        overall,
        failures,
    }
}

/// One row of the verification table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModbusRecord {
    #[serde(rename = "UID")]
    pub uid: Uid,
    #[serde(rename = "Alias")]
    pub alias: u8,
    #[serde(rename = "Overall_Pass")]
    pub overall_pass: bool,
    #[serde(rename = "Status_Val")]
    pub status: u16,
    #[serde(rename = "Status_Pass")]
    pub status_pass: bool,
    #[serde(rename = "Dist_mm")]
    pub distance_mm: f32,
    #[serde(rename = "Dist_Pass")]
    pub distance_pass: bool,
    #[serde(rename = "Temp_C")]
    pub temperature_c: f32,
    #[serde(rename = "Temp_Pass")]
    pub temperature_pass: bool,
    #[serde(rename = "Volt_V")]
    pub voltage_v: f32,
    #[serde(rename = "Volt_Pass")]
    pub voltage_pass: bool,
    #[serde(rename = "Errors")]
    pub errors: String,
}

impl ModbusRecord {
    pub fn new(m: &ModbusMeasurement, v: &ModbusVerification) -> Self {
        Self {
            uid: m.uid,
            alias: m.alias,
            overall_pass: v.overall,
            status: m.status,
            status_pass: v.status,
            distance_mm: m.distance_mm,
            distance_pass: v.distance,
            temperature_c: m.temperature_c,
            temperature_pass: v.temperature,
            voltage_v: m.voltage_v,
            voltage_pass: v.voltage,
            errors: v.failures.join("; "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement() -> ModbusMeasurement {
        ModbusMeasurement {
            uid: 1234,
            alias: 3,
            status: 1,
            distance_mm: -99.0,
            temperature_c: 22.5,
            voltage_v: 12.0,
        }
    }

    #[test]
    fn test_regs_to_f32() {
        // -99.0 = 0xC2C60000
        assert_eq!(regs_to_f32(0xC2C6, 0x0000), -99.0);
        assert_eq!(regs_to_f32(0x4140, 0x0000), 12.0);
    }

    #[test]
    fn test_good_measurement_passes() {
        let v = verify_results(&measurement(), &ModbusLimits::default());
        assert!(v.overall);
        assert!(v.failures.is_empty());
    }

    #[test]
    fn test_failures_are_collected() {
        let m = ModbusMeasurement {
            status: 0,
            voltage_v: 13.1,
            ..measurement()
        };
        let v = verify_results(&m, &ModbusLimits::default());
        assert!(!v.overall);
        assert!(!v.status);
        assert!(!v.voltage);
        assert!(v.distance && v.temperature);

        let record = ModbusRecord::new(&m, &v);
        assert_eq!(record.errors, "Status 0 (expected 1); Voltage 13.1 V (expected 11.2-12.8 V)");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["Overall_Pass"], false);
        assert_eq!(json["Alias"], 3);
    }
}
