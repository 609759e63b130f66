use serde::Serialize;

use crate::serial::commands::{CommandTemplate, ListenClass};
use crate::serial::{IpxProtocol, ProtocolError, Uid, BROADCAST_UID};

/// Geosense single-reading request. Inserts answer `SR <uid>,<axis>,<temperature>`.
pub const GET_GXM_MEASUREMENT: CommandTemplate = CommandTemplate {
    name: "get_gxm_measurement",
    pattern: "@@{uid}SR\r",
    expected: Some("SR"),
    terminator: None,
    listen: ListenClass::Query,
};

/// Axis reading of an insert resting flat on the bench
pub const EXPECTED_AXIS_DEG: f64 = -0.099;
pub const TEMPERATURE_RANGE_C: (f64, f64) = (10.0, 40.0);

#[derive(Debug, thiserror::Error)]
pub enum GeosenseError {
    #[error("UID {0} has no Geosense address")]
    InvalidUid(Uid),

    #[error("Malformed Geosense reply '{0}'")]
    Malformed(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, GeosenseError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeosenseMeasurement {
    pub uid: Uid,
    pub axis_a: f64,
    pub temperature: f64,
    pub pass: bool,
}

/// Geosense address of an insert: its UID without the first two digits.
pub fn geo_uid(uid: Uid) -> Result<Uid> {
    let digits = uid.to_string();
    digits
        .get(2..)
        .filter(|rest| !rest.is_empty())
        .and_then(|rest| rest.parse::<Uid>().ok())
        .filter(|geo| *geo != BROADCAST_UID)
        .ok_or(GeosenseError::InvalidUid(uid))
}

/// Convert the raw axis value (sine of the tilt) to degrees, truncated to 3 decimals.
pub fn axis_degrees(raw: f64) -> f64 {
    let clamped = raw.clamp(-1.0, 1.0);
    if clamped != raw {
        log::warn!("Axis A raw value {} out of range for asin, clamped to {}", raw, clamped);
    }
    (clamped.asin().to_degrees() * 1000.0).trunc() / 1000.0
}

/// Parse `SR <uid>,<axis_raw>,<temperature>` into (axis degrees, temperature).
pub fn parse_measurement(reply: &str) -> Result<(f64, f64)> {
    let body = reply.get(2..).unwrap_or("").trim();
    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        return Err(GeosenseError::Malformed(reply.to_string()));
    }
    let axis_raw: f64 = parts[1]
        .parse()
        .map_err(|_| GeosenseError::Malformed(reply.to_string()))?;
    let temperature: f64 = parts[2]
        .parse()
        .map_err(|_| GeosenseError::Malformed(reply.to_string()))?;
    Ok((axis_degrees(axis_raw), temperature))
}

/// Measure one insert over the Geosense ASCII protocol and check the reading.
pub fn gxm_measure_test(ipx: &mut IpxProtocol, uid: Uid) -> Result<GeosenseMeasurement> {
    let geo = geo_uid(uid)?;
    log::debug!("Starting GXM measurement for insert {} (address {})", uid, geo);

    let reply = ipx.send_template(&GET_GXM_MEASUREMENT, &[("uid", geo.to_string())])?;
    let (axis_a, temperature) = parse_measurement(&reply)?;

    let axis_ok = (axis_a - EXPECTED_AXIS_DEG).abs() < 1e-9;
    let temperature_ok =
        (TEMPERATURE_RANGE_C.0..=TEMPERATURE_RANGE_C.1).contains(&temperature);
    if !axis_ok {
        log::warn!(
            "Axis A check failed for {}: {}\u{b0} (expected {}\u{b0})",
            uid,
            axis_a,
            EXPECTED_AXIS_DEG
        );
    }
    if !temperature_ok {
        log::warn!(
            "Temperature check failed for {}: {} \u{b0}C (expected {}-{} \u{b0}C)",
            uid,
            temperature,
            TEMPERATURE_RANGE_C.0,
            TEMPERATURE_RANGE_C.1
        );
    }

    Ok(GeosenseMeasurement {
        uid,
        axis_a,
        temperature,
        pass: axis_ok && temperature_ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_uid_drops_leading_digits() {
        assert_eq!(geo_uid(1040012345).unwrap(), 40012345);
        assert!(geo_uid(10).is_err());
        assert!(geo_uid(1000).is_err());
    }

    #[test]
    fn test_axis_conversion_truncates() {
        // asin(-0.001728) = -0.09900...deg
        assert_eq!(axis_degrees(-0.0017279), -0.099);
        assert_eq!(axis_degrees(0.0), 0.0);
        assert!(axis_degrees(1.5) >= 89.999);
    }

    #[test]
    fn test_parse_measurement() {
        let (axis, temp) = parse_measurement("SR 40012345,-0.0017279,21.5").unwrap();
        assert_eq!(axis, -0.099);
        assert_eq!(temp, 21.5);
        assert!(parse_measurement("SR 40012345").is_err());
        assert!(parse_measurement("SR a,b,c").is_err());
    }
}
