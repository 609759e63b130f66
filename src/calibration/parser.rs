use once_cell::sync::Lazy;
use regex::Regex;

use super::CalibrationRecord;

static RECORD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Sensor number (\d+) mean = (-?\d+), standard dev = (\d+) axis (\d+)")
        .unwrap_or_else(|e| unreachable!("calibration pattern: {e}"))
});

/// Parse every calibration line in a `calibrate` reply.
/// Format: `Sensor number N mean = M, standard dev = S axis A`
///
/// A reply without any matching line yields no records; the caller decides
/// whether that is a failure.
pub fn parse_calibration(text: &str) -> Vec<CalibrationRecord> {
    let records: Vec<CalibrationRecord> = RECORD_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            Some(CalibrationRecord {
                sensor_num: caps[1].parse().ok()?,
                mean: caps[2].parse().ok()?,
                std_dev: caps[3].parse().ok()?,
                axis: caps[4].parse().ok()?,
            })
        })
        .collect();

    if records.is_empty() {
        log::error!("No calibration results found in reply");
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_calibration_lines() {
        let text = "Starting calibration\n\
                    Sensor number 3 mean = -42, standard dev = 7 axis 1\n\
                    Sensor number 4 mean = 1200, standard dev = 15 axis 2\n\
                    CMD_EXEC_Calibrate: Calibration on all sensors complete, saving to memory.";
        let records = parse_calibration(text);
        assert_eq!(
            records,
            vec![
                CalibrationRecord { sensor_num: 3, mean: -42, std_dev: 7, axis: 1 },
                CalibrationRecord { sensor_num: 4, mean: 1200, std_dev: 15, axis: 2 },
            ]
        );
    }

    #[test]
    fn test_no_matches_is_empty() {
        assert!(parse_calibration("CMD_EXEC_Calibrate: nothing to do").is_empty());
    }
}
