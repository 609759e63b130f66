use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

use super::calibrate::run_calibration_loop;
use super::report::{to_value, ReportSink};
use super::sensors::{
    assign_aliases, classify_sensors, rename_sensor, set_default_parameters, verify_sensor_count,
    SensorAssignment, SensorKind,
};
use super::{Result, WorkflowError};
use crate::config::Settings;
use crate::geosense::gxm_measure_test;
use crate::modbus::ModbusTester;
use crate::retry::{
    retry_on_exception, retry_on_failure, FailurePrompt, RetryDecision, UserAbort,
};
use crate::serial::{IpxProtocol, ScriptedPort, SerialError, SerialInterface, Uid};

/// Opens the bench port at a given baud rate. Each stage of a session holds
/// its own channel and closes it before the next one opens.
pub trait PortOpener {
    fn port_name(&self) -> &str;
    fn open(&mut self, baud_rate: u32) -> std::result::Result<SerialInterface, SerialError>;
}

/// A real serial port
pub struct SystemPort {
    port_name: String,
    read_timeout: Duration,
}

impl SystemPort {
    pub fn new(port_name: &str, read_timeout: Duration) -> Self {
        Self {
            port_name: port_name.to_string(),
            read_timeout,
        }
    }
}

impl PortOpener for SystemPort {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn open(&mut self, baud_rate: u32) -> std::result::Result<SerialInterface, SerialError> {
        SerialInterface::open(&self.port_name, baud_rate, self.read_timeout)
    }
}

impl PortOpener for ScriptedPort {
    fn port_name(&self) -> &str {
        "scripted"
    }

    fn open(&mut self, _baud_rate: u32) -> std::result::Result<SerialInterface, SerialError> {
        let mut interface = SerialInterface::from_io(Box::new(self.clone()));
        // Scripted replies are queued before the command is flushed
        interface.set_read_timeout(Duration::from_millis(100));
        Ok(interface)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Success,
    VerificationFailures { failed: usize, total: usize },
    DetectionSkipped,
    Aborted,
    Failed(String),
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Success => write!(f, "SUCCESS"),
            SessionStatus::VerificationFailures { failed, total } => write!(
                f,
                "Configuration completed, but {} of {} sensors failed verification",
                failed, total
            ),
            SessionStatus::DetectionSkipped => write!(f, "Sensor detection skipped"),
            SessionStatus::Aborted => write!(f, "ABORTED"),
            SessionStatus::Failed(reason) => write!(f, "FAILED: {}", reason),
        }
    }
}

/// Drives one bench session from detection to datalogger verification.
pub struct ConfigurationSession<'a> {
    settings: &'a Settings,
    opener: &'a mut dyn PortOpener,
    prompt: &'a mut dyn FailurePrompt,
    report: &'a mut dyn ReportSink,
}

impl<'a> ConfigurationSession<'a> {
    pub fn new(
        settings: &'a Settings,
        opener: &'a mut dyn PortOpener,
        prompt: &'a mut dyn FailurePrompt,
        report: &'a mut dyn ReportSink,
    ) -> Self {
        Self {
            settings,
            opener,
            prompt,
            report,
        }
    }

    fn open_ipx(&mut self, baud_rate: u32) -> Result<IpxProtocol> {
        log::info!("Opening {} at {} baud", self.opener.port_name(), baud_rate);
        let interface = self.opener.open(baud_rate)?;
        Ok(IpxProtocol::new(interface)
            .with_listen(self.settings.listen.clone())
            .with_verification(self.settings.serial.verify_responses))
    }

    /// Configure `expected` sensors and finalize the report.
    ///
    /// An operator abort ends the session with [`SessionStatus::Aborted`];
    /// any other error is reported as [`SessionStatus::Failed`].
    pub fn run(&mut self, expected: usize) -> SessionStatus {
        log::info!(
            "Starting configuration session on {} for {} sensors",
            self.opener.port_name(),
            expected
        );
        let status = match self.configure(expected) {
            Ok(status) => status,
            Err(WorkflowError::Aborted(abort)) => {
                log::warn!("{}", abort);
                SessionStatus::Aborted
            }
            Err(e) => {
                log::error!("Configuration failed: {}", e);
                SessionStatus::Failed(e.to_string())
            }
        };
        self.report.finalize(&status.to_string());
        status
    }

    fn configure(&mut self, expected: usize) -> Result<SessionStatus> {
        let settings = self.settings;
        let policy = settings.retry.operation_policy();
        let baud_rate = settings.serial.baud_rate;
        let final_baud = settings.defaults.final_baud_rate;

        let mut ipx = self.open_ipx(baud_rate)?;
        let Some((uids, kind)) = self.detect_sensors(&mut ipx, expected)? else {
            return Ok(SessionStatus::DetectionSkipped);
        };

        let with_aliases = kind == SensorKind::Extensometer;
        let defaults = &settings.defaults;
        let assignments = retry_on_exception(
            &policy,
            &mut *self.prompt,
            "Setting default parameters",
            WorkflowError::is_device_failure,
            || {
                set_default_parameters(&mut ipx, &uids, baud_rate, defaults, with_aliases)
                    .map_err(WorkflowError::from)
            },
        )?
        .completed()
        .unwrap_or_else(|| {
            log::warn!("Default parameters skipped, sensors keep their current settings");
            assign_aliases(&uids, with_aliases)
        });
        for assignment in &assignments {
            if let Some(alias) = assignment.alias {
                self.report
                    .add_sensor_data(assignment.uid, "alias", Value::from(alias));
            }
        }

        run_calibration_loop(
            &mut ipx,
            &uids,
            &settings.detector,
            &settings.retry.calibration_policy(),
            &mut *self.prompt,
            &mut *self.report,
        )?;

        log::info!("Setting baud rate for all sensors to {}", final_baud);
        for &uid in &uids {
            let operation = format!("Setting final baud rate on sensor {}", uid);
            retry_on_exception(
                &policy,
                &mut *self.prompt,
                &operation,
                WorkflowError::is_device_failure,
                || ipx.set_baud(uid, final_baud).map_err(WorkflowError::from),
            )?;
        }
        drop(ipx);

        let mut ipx = self.open_ipx(final_baud)?;
        for &uid in &uids {
            let operation = format!("Reading final status of sensor {}", uid);
            let status = retry_on_exception(
                &policy,
                &mut *self.prompt,
                &operation,
                WorkflowError::is_device_failure,
                || ipx.get_status(uid).map_err(WorkflowError::from),
            )?;
            if let Some(status) = status.completed() {
                self.report
                    .add_sensor_data(uid, "final_status", to_value(&status));
            }
        }
        drop(ipx);

        let (failed, total) = match kind {
            SensorKind::Extensometer => self.verify_modbus(&assignments)?,
            SensorKind::Insert => self.verify_geosense(&uids)?,
        };
        if failed == 0 {
            log::info!("All {} sensors passed verification", total);
            Ok(SessionStatus::Success)
        } else {
            log::warn!("{} of {} sensors failed verification", failed, total);
            Ok(SessionStatus::VerificationFailures { failed, total })
        }
    }

    /// Detect and classify the sensors. `None` means the operator skipped
    /// detection after the count kept mismatching.
    fn detect_sensors(
        &mut self,
        ipx: &mut IpxProtocol,
        expected: usize,
    ) -> Result<Option<(Vec<Uid>, SensorKind)>> {
        let settings = self.settings;
        let policy = settings.retry.operation_policy();
        let check_uid = settings.defaults.check_sensor_uid;

        let mismatch = format!("Sensor count mismatch, expected {} sensors", expected);
        loop {
            let detection = retry_on_failure(
                &policy,
                &mut *self.prompt,
                "Sensor detection",
                &mismatch,
                || {
                    verify_sensor_count(
                        ipx,
                        expected,
                        check_uid,
                        settings.retry.sensor_count_attempts,
                        settings.retry.sensor_count_delay(),
                    )
                    .map_err(WorkflowError::from)
                },
            )?;
            let Some((uids, check_present)) = detection.completed() else {
                log::error!("Sensor detection skipped, ending session");
                return Ok(None);
            };

            let kind = classify_sensors(&uids)?;
            if kind == SensorKind::Insert && !check_present {
                log::warn!("Bottom check sensor {} not detected", check_uid);
                let message = format!(
                    "Bottom check sensor {} not detected (retry to list again, skip to continue)",
                    check_uid
                );
                match self.prompt.decide(&message) {
                    RetryDecision::Retry => continue,
                    RetryDecision::Skip => {}
                    RetryDecision::Abort => {
                        return Err(UserAbort {
                            operation: "Sensor detection".to_string(),
                        }
                        .into())
                    }
                }
            }

            for &uid in &uids {
                self.report.add_sensor_data(uid, "sensor_kind", to_value(&kind));
            }
            return Ok(Some((uids, kind)));
        }
    }

    fn verify_modbus(&mut self, assignments: &[SensorAssignment]) -> Result<(usize, usize)> {
        let settings = self.settings;
        let policy = settings.retry.operation_policy();
        let interface = self.opener.open(settings.modbus.baud_rate)?;
        let mut tester = ModbusTester::new(interface, &settings.modbus);

        let mut failed = 0;
        let mut total = 0;
        for assignment in assignments {
            let Some(alias) = assignment.alias else {
                continue;
            };
            total += 1;
            let uid = assignment.uid;
            let operation = format!("Modbus test of sensor {} (alias {})", uid, alias);
            let outcome = retry_on_exception(
                &policy,
                &mut *self.prompt,
                &operation,
                WorkflowError::is_device_failure,
                || tester.run_full_test(uid, alias).map_err(WorkflowError::from),
            )?;
            match outcome.completed() {
                Some(record) => {
                    if record.overall_pass {
                        log::info!("Modbus test passed for {} (alias {})", uid, alias);
                    } else {
                        log::warn!("Modbus test failed for {} (alias {}): {}", uid, alias, record.errors);
                        failed += 1;
                    }
                    self.report.add_sensor_data(
                        uid,
                        "modbus_test_result",
                        json!({
                            "Overall_Pass": record.overall_pass,
                            "Dist_mm": record.distance_mm,
                            "Temp_C": record.temperature_c,
                            "Volt_V": record.voltage_v,
                            "Status_Val": record.status,
                        }),
                    );
                }
                None => failed += 1,
            }
        }
        Ok((failed, total))
    }

    fn verify_geosense(&mut self, uids: &[Uid]) -> Result<(usize, usize)> {
        let settings = self.settings;
        let policy = settings.retry.operation_policy();
        let mut ipx = self.open_ipx(settings.modbus.baud_rate)?;

        let mut failed = 0;
        for &uid in uids {
            let operation = format!("Geosense measurement of sensor {}", uid);
            let outcome = retry_on_exception(
                &policy,
                &mut *self.prompt,
                &operation,
                WorkflowError::is_device_failure,
                || gxm_measure_test(&mut ipx, uid).map_err(WorkflowError::from),
            )?;
            match outcome.completed() {
                Some(measurement) => {
                    if !measurement.pass {
                        failed += 1;
                    }
                    self.report
                        .add_sensor_data(uid, "geosense_measurement", to_value(&measurement));
                }
                None => failed += 1,
            }
        }
        Ok((failed, uids.len()))
    }

    /// Rename one sensor on the bus.
    pub fn update_uid(&mut self, current_uid: Uid, new_uid: Uid) -> Result<Vec<i64>> {
        let settings = self.settings;
        let mut ipx = self.open_ipx(settings.serial.baud_rate)?;
        let sample = rename_sensor(
            &mut ipx,
            current_uid,
            new_uid,
            settings.defaults.check_sensor_uid,
        )?;
        self.report
            .add_sensor_data(new_uid, "previous_uid", Value::from(current_uid));
        self.report
            .add_sensor_data(new_uid, "raw_data_sample", to_value(&sample));
        Ok(sample)
    }
}
