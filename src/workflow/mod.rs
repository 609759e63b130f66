pub mod calibrate;
pub mod report;
pub mod sensors;
pub mod session;

pub use calibrate::{calibrate_sensor, run_calibration_loop, CalibrationSummary};
pub use report::{MemoryReport, ReportSink};
pub use sensors::{
    assign_aliases, classify_sensors, rename_sensor, set_default_parameters, verify_sensor_count,
    SensorAssignment, SensorKind,
};
pub use session::{ConfigurationSession, PortOpener, SessionStatus, SystemPort};

use crate::calibration::CalibrationError;
use crate::geosense::GeosenseError;
use crate::modbus::ModbusError;
use crate::retry::{RetryableError, UserAbort};
use crate::serial::{ProtocolError, SerialError, Uid};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Serial error: {0}")]
    Serial(#[from] SerialError),

    #[error("Calibration check error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Calibration rejected for UID {uid}: {reason}")]
    CalibrationRejected { uid: Uid, reason: String },

    #[error("Modbus error: {0}")]
    Modbus(#[from] ModbusError),

    #[error("Geosense error: {0}")]
    Geosense(#[from] GeosenseError),

    #[error("Mixed sensor types detected (inserts and extensometers): {0:?}")]
    MixedSensorTypes(Vec<Uid>),

    #[error("UID {0} belongs to the check sensor and cannot be changed")]
    ProtectedSensor(Uid),

    #[error("UID 0 is the broadcast address and cannot be renamed to or from")]
    BroadcastUid,

    #[error(transparent)]
    Aborted(#[from] UserAbort),
}

impl WorkflowError {
    /// Failures caused by a sensor or the bus, which are worth retrying.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            WorkflowError::Protocol(_)
                | WorkflowError::Serial(_)
                | WorkflowError::Calibration(_)
                | WorkflowError::CalibrationRejected { .. }
                | WorkflowError::Modbus(_)
                | WorkflowError::Geosense(_)
        )
    }
}

impl RetryableError for WorkflowError {
    fn is_user_abort(&self) -> bool {
        matches!(self, WorkflowError::Aborted(_))
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
