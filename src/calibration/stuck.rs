use std::thread;

use super::validator::detect_high_magnitude_outliers;
use super::{CalibrationError, DetectorConfig, Result};
use crate::serial::{IpxProtocol, ProtocolError, Uid};

/// Anything that can produce one raw sample per axis for a sensor.
pub trait RawSampleSource {
    fn raw_sample(&mut self, uid: Uid) -> std::result::Result<Vec<i64>, ProtocolError>;
}

impl RawSampleSource for IpxProtocol {
    fn raw_sample(&mut self, uid: Uid) -> std::result::Result<Vec<i64>, ProtocolError> {
        self.get_raw(uid)
    }
}

fn value_at(sample: &[i64], index: usize) -> Result<i64> {
    sample
        .get(index)
        .copied()
        .ok_or(CalibrationError::IndexOutOfRange {
            index,
            len: sample.len(),
        })
}

/// Check whether the axes at `axis_indices` are frozen.
///
/// Takes `num_readings` raw samples `sample_interval` apart. The first one
/// must pass the magnitude check; then no two consecutive readings may share
/// more than `max_allowed_no_change` unchanged values at the given indices.
/// Returns the verdict together with the first sample for the report.
pub fn stuck_sensor_check<S: RawSampleSource + ?Sized>(
    source: &mut S,
    uid: Uid,
    axis_indices: &[usize],
    config: &DetectorConfig,
) -> Result<(bool, Vec<i64>)> {
    let count = config.num_readings.max(1);
    let mut readings = Vec::with_capacity(count);
    for i in 0..count {
        if i > 0 {
            thread::sleep(config.sample_interval());
        }
        readings.push(source.raw_sample(uid)?);
    }
    let first = readings[0].clone();

    if !detect_high_magnitude_outliers(&first, config.outlier_threshold, config.use_log)? {
        log::warn!("Sensor {} raw data has high magnitude outliers", uid);
        return Ok((false, first));
    }

    for (i, pair) in readings.windows(2).enumerate() {
        let mut unchanged = 0;
        for &index in axis_indices {
            if value_at(&pair[0], index)? == value_at(&pair[1], index)? {
                unchanged += 1;
            }
        }
        if unchanged > config.max_allowed_no_change {
            log::warn!(
                "Sensor {}: {} axes unchanged between readings {} and {}",
                uid,
                unchanged,
                i,
                i + 1
            );
            return Ok((false, first));
        }
    }

    Ok((true, first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Samples(VecDeque<Vec<i64>>);

    impl RawSampleSource for Samples {
        fn raw_sample(&mut self, _uid: Uid) -> std::result::Result<Vec<i64>, ProtocolError> {
            Ok(self.0.pop_front().unwrap_or_default())
        }
    }

    fn config(readings: usize) -> DetectorConfig {
        DetectorConfig {
            num_readings: readings,
            sample_interval_ms: 0,
            use_log: false,
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn test_moving_values_pass() {
        let mut source = Samples(VecDeque::from(vec![
            vec![100, 101, 99, 102, 98],
            vec![101, 102, 100, 103, 99],
            vec![102, 103, 101, 104, 100],
        ]));
        let (ok, first) = stuck_sensor_check(&mut source, 7, &[0, 1, 2, 3, 4], &config(3)).unwrap();
        assert!(ok);
        assert_eq!(first, vec![100, 101, 99, 102, 98]);
    }

    #[test]
    fn test_frozen_values_fail() {
        let frozen = vec![100, 101, 99, 102, 98];
        let mut source = Samples(VecDeque::from(vec![frozen.clone(), frozen.clone(), frozen]));
        let (ok, _) = stuck_sensor_check(&mut source, 7, &[0, 1, 2, 3], &config(3)).unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_tolerates_few_unchanged_axes() {
        let frozen = vec![100, 101, 99, 102, 98];
        let mut source = Samples(VecDeque::from(vec![frozen.clone(), frozen]));
        let (ok, _) = stuck_sensor_check(&mut source, 7, &[0, 1, 2], &config(2)).unwrap();
        assert!(ok);
    }

    #[test]
    fn test_index_out_of_range() {
        let mut source = Samples(VecDeque::from(vec![vec![100, 101, 99], vec![100, 102, 98]]));
        let err = stuck_sensor_check(&mut source, 7, &[5], &config(2)).unwrap_err();
        assert!(matches!(err, CalibrationError::IndexOutOfRange { index: 5, len: 3 }));
    }

    #[test]
    fn test_outlier_in_first_reading_fails() {
        let mut source = Samples(VecDeque::from(vec![
            vec![100, 101, 99, 102, 100, 98, 5000],
            vec![101, 102, 100, 103, 101, 99, 5001],
        ]));
        let (ok, first) = stuck_sensor_check(&mut source, 7, &[0], &config(2)).unwrap();
        assert!(!ok);
        assert_eq!(first.len(), 7);
    }
}
