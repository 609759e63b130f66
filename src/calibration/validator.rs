use super::{CalibrationError, CalibrationRecord, CalibrationVerdict, Result};

/// Consistency constant relating MAD to the standard deviation of a normal distribution
const MAD_SCALE: f64 = 0.6745;

/// Structural check of calibration results.
///
/// A record fails when its mean or standard deviation is zero, which the
/// firmware reports for axes that saw no light. The failing set holds each
/// bad sensor number once, in ascending order. An empty record list fails
/// without naming sensors.
pub fn validate_calibration(records: &[CalibrationRecord]) -> CalibrationVerdict {
    if records.is_empty() {
        log::warn!("Calibration produced no results");
        return CalibrationVerdict {
            passed: false,
            failing_sensors: None,
        };
    }

    let mut failing: Vec<u32> = Vec::new();
    for record in records {
        if record.mean == 0 || record.std_dev == 0 {
            log::warn!(
                "Sensor {} axis {} failed calibration (mean = {}, standard dev = {})",
                record.sensor_num,
                record.axis,
                record.mean,
                record.std_dev
            );
            failing.push(record.sensor_num);
        }
    }

    if failing.is_empty() {
        return CalibrationVerdict::pass();
    }
    failing.sort_unstable();
    failing.dedup();
    CalibrationVerdict {
        passed: false,
        failing_sensors: Some(failing),
    }
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Modified z-score outlier check on one raw sample.
///
/// Returns `Ok(true)` when no value is an outlier. Zero values are skipped,
/// they are reported by axes that are not fitted. Fails with
/// [`CalibrationError::ZeroVariance`] when the median absolute deviation is
/// zero, since no score can be computed.
pub fn detect_high_magnitude_outliers(samples: &[i64], threshold: f64, use_log: bool) -> Result<bool> {
    if samples.is_empty() {
        return Err(CalibrationError::NoSamples);
    }

    let mut values: Vec<f64> = samples
        .iter()
        .map(|&v| {
            let v = v as f64;
            if use_log {
                v.abs().ln_1p()
            } else {
                v
            }
        })
        .collect();
    values.sort_by(f64::total_cmp);

    let center = median(&values);
    let mut deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    deviations.sort_by(f64::total_cmp);
    let mad = median(&deviations);

    if mad == 0.0 {
        log::warn!("MAD is zero for sample {:?}", samples);
        return Err(CalibrationError::ZeroVariance);
    }

    for &value in values.iter().filter(|v| **v != 0.0) {
        let z = MAD_SCALE * (value - center) / mad;
        if z.abs() > threshold {
            log::warn!(
                "Outlier in raw sample: score {:.2} exceeds {} (sample {:?})",
                z,
                threshold,
                samples
            );
            return Ok(false);
        }
    }
    Ok(true)
}
