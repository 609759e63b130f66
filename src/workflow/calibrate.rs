use serde::Serialize;

use super::report::{to_value, ReportSink};
use super::{Result, WorkflowError};
use crate::calibration::{
    detect_high_magnitude_outliers, stuck_sensor_check, validate_calibration, DetectorConfig,
};
use crate::retry::{retry_on_exception, FailurePrompt, RetryPolicy};
use crate::serial::{IpxProtocol, Uid};

/// Which sensors went through calibration and which the operator skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalibrationSummary {
    pub calibrated: Vec<Uid>,
    pub skipped: Vec<Uid>,
}

/// One calibration attempt on one sensor.
///
/// A structurally valid result still needs a sane raw sample. An invalid
/// result is accepted only when the failing axes turn out to be live.
pub fn calibrate_sensor<R: ReportSink + ?Sized>(
    ipx: &mut IpxProtocol,
    uid: Uid,
    detector: &DetectorConfig,
    report: &mut R,
) -> Result<()> {
    let records = ipx.calibrate(uid)?;
    report.add_sensor_data(uid, "calibration", to_value(&records));

    let verdict = validate_calibration(&records);
    if verdict.passed {
        let sample = ipx.get_raw(uid)?;
        report.add_sensor_data(uid, "raw_data_sample", to_value(&sample));
        if !detect_high_magnitude_outliers(&sample, detector.outlier_threshold, detector.use_log)? {
            return Err(WorkflowError::CalibrationRejected {
                uid,
                reason: format!("abnormal magnitude in raw data {:?}", sample),
            });
        }
        log::info!("Sensor {} calibrated", uid);
        return Ok(());
    }

    let Some(failing) = verdict.failing_sensors else {
        return Err(WorkflowError::CalibrationRejected {
            uid,
            reason: "no calibration results".to_string(),
        });
    };

    log::warn!("Sensor {} failed validation on {:?}, checking raw data", uid, failing);
    let indices: Vec<usize> = failing.iter().map(|&n| n as usize).collect();
    let (live, sample) = stuck_sensor_check(ipx, uid, &indices, detector)?;
    report.add_sensor_data(uid, "raw_data_sample", to_value(&sample));
    if !live {
        return Err(WorkflowError::CalibrationRejected {
            uid,
            reason: format!("stuck or abnormal sensors {:?}", failing),
        });
    }
    log::info!("Sensor {} accepted after raw data check", uid);
    Ok(())
}

/// Calibrate every sensor in turn, escalating failures to the operator.
pub fn run_calibration_loop<P, R>(
    ipx: &mut IpxProtocol,
    uids: &[Uid],
    detector: &DetectorConfig,
    policy: &RetryPolicy,
    prompt: &mut P,
    report: &mut R,
) -> Result<CalibrationSummary>
where
    P: FailurePrompt + ?Sized,
    R: ReportSink + ?Sized,
{
    let mut summary = CalibrationSummary::default();
    for &uid in uids {
        let operation = format!("Calibration of sensor {}", uid);
        let outcome = retry_on_exception(
            policy,
            prompt,
            &operation,
            WorkflowError::is_device_failure,
            || calibrate_sensor(ipx, uid, detector, report),
        )?;
        if outcome.is_skipped() {
            report.add_sensor_data(uid, "calibration_skipped", serde_json::Value::Bool(true));
            summary.skipped.push(uid);
        } else {
            summary.calibrated.push(uid);
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenSettings;
    use crate::retry::{RetryDecision, ScriptedPrompt};
    use crate::serial::{ScriptedPort, SerialInterface};
    use crate::workflow::MemoryReport;
    use std::time::Duration;

    const GOOD: &str = "Sensor number 0 mean = 1200, standard dev = 3 axis 1\n\
                        Sensor number 1 mean = 1180, standard dev = 2 axis 1\n\
                        Sensor number 2 mean = 1210, standard dev = 4 axis 2\n\
                        Sensor number 3 mean = 1190, standard dev = 3 axis 2\n\
                        CMD_EXEC_Calibrate: Calibration on all sensors complete, saving to memory.\n";
    const DONE: &str = "CMD_EXEC_Calibrate: Calibration on all sensors complete, saving to memory.\n";

    fn client(port: &ScriptedPort) -> IpxProtocol {
        IpxProtocol::new(SerialInterface::from_io(Box::new(port.clone()))).with_listen(
            ListenSettings {
                setter_ms: 20,
                query_ms: 20,
                calibration_ms: 50,
            },
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_auto_attempts: 2,
            delay: Duration::ZERO,
            reset_on_user_retry: true,
        }
    }

    #[test]
    fn test_good_calibration_records_sample() {
        let port = ScriptedPort::new();
        port.reply_once("op ipx 7 calibrate", &[GOOD]);
        port.reply_once("op ipx 7 get_raw", &["1200,1180,1210,1190\n"]);
        let mut ipx = client(&port);
        let mut report = MemoryReport::new("test");

        calibrate_sensor(&mut ipx, 7, &DetectorConfig::default(), &mut report).unwrap();
        assert!(report.get(7, "calibration").is_some());
        assert_eq!(
            report.get(7, "raw_data_sample"),
            Some(&serde_json::json!([1200, 1180, 1210, 1190]))
        );
    }

    #[test]
    fn test_empty_calibration_is_rejected() {
        let port = ScriptedPort::new();
        port.reply_once("op ipx 7 calibrate", &[DONE]);
        let mut ipx = client(&port);
        let mut report = MemoryReport::new("test");

        let err = calibrate_sensor(&mut ipx, 7, &DetectorConfig::default(), &mut report).unwrap_err();
        assert!(matches!(err, WorkflowError::CalibrationRejected { uid: 7, .. }));
    }

    #[test]
    fn test_skip_after_repeated_failures() {
        let port = ScriptedPort::new();
        port.reply_always("op ipx 7 calibrate", &[DONE]);
        let mut ipx = client(&port);
        let mut report = MemoryReport::new("test");
        let mut prompt = ScriptedPrompt::new(vec![RetryDecision::Skip]);

        let summary = run_calibration_loop(
            &mut ipx,
            &[7],
            &DetectorConfig::default(),
            &policy(),
            &mut prompt,
            &mut report,
        )
        .unwrap();
        assert_eq!(summary.skipped, vec![7]);
        assert_eq!(port.count_written("calibrate"), 2);
        assert_eq!(report.get(7, "calibration_skipped"), Some(&serde_json::Value::Bool(true)));
    }

    #[test]
    fn test_abort_stops_the_loop() {
        let port = ScriptedPort::new();
        port.reply_always("op ipx 7 calibrate", &[DONE]);
        let mut ipx = client(&port);
        let mut report = MemoryReport::new("test");
        let mut prompt = ScriptedPrompt::new(vec![RetryDecision::Abort]);

        let err = run_calibration_loop(
            &mut ipx,
            &[7, 8],
            &DetectorConfig::default(),
            &policy(),
            &mut prompt,
            &mut report,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Aborted(_)));
        assert_eq!(port.count_written("op ipx 8"), 0);
    }
}
