use std::thread;
use std::time::{Duration, Instant};

use rmodbus::client::ModbusRequest;
use rmodbus::{guess_response_frame_len, ModbusProto};

use super::{
    regs_to_f32, verify_results, ModbusError, ModbusLimits, ModbusMeasurement, ModbusRecord,
    Result, DISTANCE_REG, STATUS_REG, TEMP_REG, TRIGGER_REG, TRIGGER_VALUE, VOLTAGE_REG,
};
use crate::config::ModbusSettings;
use crate::serial::{SerialError, SerialInterface, Uid};

/// Bench tester that reads sensors the way the field datalogger does.
pub struct ModbusTester {
    interface: SerialInterface,
    timeout: Duration,
    settle: Duration,
    limits: ModbusLimits,
}

impl ModbusTester {
    pub fn new(interface: SerialInterface, settings: &ModbusSettings) -> Self {
        Self {
            interface,
            timeout: Duration::from_millis(settings.timeout_ms),
            settle: Duration::from_millis(settings.settle_ms),
            limits: ModbusLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ModbusLimits) -> Self {
        self.limits = limits;
        self
    }

    fn response_len(alias: u8, buf: &[u8]) -> Result<Option<usize>> {
        if buf.len() < 3 {
            return Ok(None);
        }
        // Exception replies are address, function | 0x80, code, crc
        if buf[1] & 0x80 != 0 {
            return Ok(Some(5));
        }
        if buf.len() < 6 {
            return Ok(None);
        }
        let len = guess_response_frame_len(&buf[..6], ModbusProto::Rtu)? as usize;
        if len < 5 {
            return Err(ModbusError::ShortResponse { alias, len });
        }
        Ok(Some(len))
    }

    fn exchange(&mut self, alias: u8, register: u16, request: &[u8]) -> Result<Vec<u8>> {
        self.interface.clear_input()?;
        self.interface.send_data(request)?;
        log::debug!("modbus -> {}", hex::encode(request));

        let deadline = Instant::now() + self.timeout;
        let mut response = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            if let Some(len) = Self::response_len(alias, &response)? {
                if response.len() >= len {
                    response.truncate(len);
                    log::debug!("modbus <- {}", hex::encode(&response));
                    return Ok(response);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.interface.read_data(&mut buf, remaining) {
                Ok(n) => response.extend_from_slice(&buf[..n]),
                Err(SerialError::Timeout) => {
                    log::error!(
                        "Timeout waiting for alias {} register {:#06x} ({} bytes received)",
                        alias,
                        register,
                        response.len()
                    );
                    return Err(ModbusError::Timeout { alias, register });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_register(&mut self, alias: u8, register: u16, value: u16) -> Result<()> {
        let mut request = ModbusRequest::new(alias, ModbusProto::Rtu);
        let mut raw = Vec::new();
        request.generate_set_holding(register, value, &mut raw)?;
        let response = self.exchange(alias, register, &raw)?;
        request.parse_ok(&response)?;
        Ok(())
    }

    /// Read `count` holding registers starting at `register`
    pub fn read_registers(&mut self, alias: u8, register: u16, count: u16) -> Result<Vec<u16>> {
        let mut request = ModbusRequest::new(alias, ModbusProto::Rtu);
        let mut raw = Vec::new();
        request.generate_get_holdings(register, count, &mut raw)?;
        let response = self.exchange(alias, register, &raw)?;
        request.parse_ok(&response)?;

        let expected = 5 + 2 * count as usize;
        if response.len() < expected {
            return Err(ModbusError::ShortResponse {
                alias,
                len: response.len(),
            });
        }
        Ok(response[3..response.len() - 2]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect())
    }

    fn read_f32(&mut self, alias: u8, register: u16) -> Result<f32> {
        let regs = self.read_registers(alias, register, 2)?;
        Ok(regs_to_f32(regs[0], regs[1]))
    }

    /// Trigger a measurement and read status, distance, temperature and voltage.
    pub fn datalogger_test(&mut self, uid: Uid, alias: u32) -> Result<ModbusMeasurement> {
        let alias = u8::try_from(alias)
            .ok()
            .filter(|a| (1..=247).contains(a))
            .ok_or(ModbusError::InvalidAlias(alias))?;
        log::info!("Starting measurement sequence for sensor {} at alias {}", uid, alias);

        self.write_register(alias, TRIGGER_REG, TRIGGER_VALUE)?;
        thread::sleep(self.settle);

        let status = self.read_registers(alias, STATUS_REG, 1)?[0];
        let distance_mm = self.read_f32(alias, DISTANCE_REG)?;
        let temperature_c = self.read_f32(alias, TEMP_REG)?;
        let voltage_v = self.read_f32(alias, VOLTAGE_REG)?;

        log::debug!(
            "UID {} alias {}: status {}, distance {} mm, temperature {:.3} C, voltage {:.3} V",
            uid,
            alias,
            status,
            distance_mm,
            temperature_c,
            voltage_v
        );
        Ok(ModbusMeasurement {
            uid,
            alias,
            status,
            distance_mm,
            temperature_c,
            voltage_v,
        })
    }

    /// Measure one sensor and return the flattened, verified record.
    pub fn run_full_test(&mut self, uid: Uid, alias: u32) -> Result<ModbusRecord> {
        let measurement = self.datalogger_test(uid, alias)?;
        let verification = verify_results(&measurement, &self.limits);
        Ok(ModbusRecord::new(&measurement, &verification))
    }
}
