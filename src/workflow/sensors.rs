use std::thread;
use std::time::Duration;

use serde::Serialize;

use super::{Result, WorkflowError};
use crate::config::DeviceDefaults;
use crate::serial::{IpxProtocol, ProtocolError, Uid, BROADCAST_UID};

/// UID prefix shared by every insert.
pub const INSERT_UID_PREFIX: &str = "104";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SensorKind {
    Extensometer,
    Insert,
}

/// A detected sensor and the Modbus alias it was given, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorAssignment {
    pub uid: Uid,
    pub alias: Option<u32>,
}

pub fn is_insert(uid: Uid) -> bool {
    uid.to_string().starts_with(INSERT_UID_PREFIX)
}

/// All sensors on one string must be of the same kind.
pub fn classify_sensors(uids: &[Uid]) -> Result<SensorKind> {
    let inserts = uids.iter().filter(|&&uid| is_insert(uid)).count();
    match inserts {
        0 => Ok(SensorKind::Extensometer),
        n if n == uids.len() => Ok(SensorKind::Insert),
        _ => Err(WorkflowError::MixedSensorTypes(uids.to_vec())),
    }
}

/// List the bus until `expected` sensors answer besides the check sensor.
///
/// Returns the detected UIDs and whether the check sensor was present, or
/// `None` when the count never matched within `attempts`.
pub fn verify_sensor_count(
    ipx: &mut IpxProtocol,
    expected: usize,
    check_uid: Uid,
    attempts: u32,
    delay: Duration,
) -> std::result::Result<Option<(Vec<Uid>, bool)>, ProtocolError> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        let listed = ipx.list_uids()?;
        let check_present = listed.contains(&check_uid);
        let uids: Vec<Uid> = listed.into_iter().filter(|&uid| uid != check_uid).collect();

        if uids.len() == expected {
            log::info!("Detected {} sensors: {:?}", uids.len(), uids);
            return Ok(Some((uids, check_present)));
        }
        log::warn!(
            "Sensor count mismatch (attempt {}/{}): expected {}, found {} {:?}",
            attempt,
            attempts,
            expected,
            uids.len(),
            uids
        );
        if attempt < attempts && !delay.is_zero() {
            thread::sleep(delay);
        }
    }
    Ok(None)
}

/// Aliases count down from the number of sensors, so the first UID listed
/// gets the highest alias. Inserts are not addressed over Modbus.
pub fn assign_aliases(uids: &[Uid], with_aliases: bool) -> Vec<SensorAssignment> {
    let count = uids.len() as u32;
    uids.iter()
        .enumerate()
        .map(|(i, &uid)| SensorAssignment {
            uid,
            alias: with_aliases.then(|| count - i as u32),
        })
        .collect()
}

/// Write the bench defaults to every sensor.
pub fn set_default_parameters(
    ipx: &mut IpxProtocol,
    uids: &[Uid],
    baud_rate: u32,
    defaults: &DeviceDefaults,
    with_aliases: bool,
) -> std::result::Result<Vec<SensorAssignment>, ProtocolError> {
    let assignments = assign_aliases(uids, with_aliases);
    for assignment in &assignments {
        let uid = assignment.uid;
        log::info!("Setting default parameters on {}", uid);
        ipx.set_baud(uid, baud_rate)?;
        if let Some(alias) = assignment.alias {
            ipx.set_alias(uid, alias)?;
        }
        ipx.set_gain(uid, defaults.gain)?;
        ipx.set_centroid_threshold(uid, defaults.centroid_threshold)?;
        ipx.set_n_stds(uid, defaults.n_stds)?;
        ipx.set_centroid_res(uid, defaults.centroid_res)?;
        ipx.set_term(uid, defaults.termination)?;
    }
    Ok(assignments)
}

/// Give one sensor a new UID and read a raw sample back from the new address.
pub fn rename_sensor(
    ipx: &mut IpxProtocol,
    current_uid: Uid,
    new_uid: Uid,
    check_uid: Uid,
) -> Result<Vec<i64>> {
    if current_uid == BROADCAST_UID || new_uid == BROADCAST_UID {
        return Err(WorkflowError::BroadcastUid);
    }
    if current_uid == check_uid || new_uid == check_uid {
        return Err(WorkflowError::ProtectedSensor(check_uid));
    }
    ipx.set_uid(current_uid, new_uid)?;
    let sample = ipx.get_raw(new_uid)?;
    log::info!("Sensor {} answers with raw data {:?}", new_uid, sample);
    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenSettings;
    use crate::serial::{ScriptedPort, SerialInterface};

    fn client(port: &ScriptedPort) -> IpxProtocol {
        IpxProtocol::new(SerialInterface::from_io(Box::new(port.clone()))).with_listen(
            ListenSettings {
                setter_ms: 20,
                query_ms: 20,
                calibration_ms: 50,
            },
        )
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify_sensors(&[2001, 2002]).unwrap(), SensorKind::Extensometer);
        assert_eq!(classify_sensors(&[1040001, 1040002]).unwrap(), SensorKind::Insert);
        assert!(matches!(
            classify_sensors(&[1040001, 2002]),
            Err(WorkflowError::MixedSensorTypes(_))
        ));
    }

    #[test]
    fn test_aliases_count_down() {
        let assigned = assign_aliases(&[11, 22, 33], true);
        let aliases: Vec<_> = assigned.iter().map(|a| a.alias).collect();
        assert_eq!(aliases, vec![Some(3), Some(2), Some(1)]);
        assert!(assign_aliases(&[11], false)[0].alias.is_none());
    }

    #[test]
    fn test_sensor_count_ignores_check_sensor() {
        let port = ScriptedPort::new();
        port.reply_next(&["uid: 11\n", "uid: 1111111111\n"]);
        port.reply_next(&["uid: 11\n", "uid: 22\n", "uid: 1111111111\n"]);
        let mut ipx = client(&port);

        let found = verify_sensor_count(&mut ipx, 2, 1111111111, 3, Duration::ZERO).unwrap();
        assert_eq!(found, Some((vec![11, 22], true)));
        assert_eq!(port.count_written("list_uids"), 2);
    }

    #[test]
    fn test_sensor_count_gives_up() {
        let port = ScriptedPort::new();
        port.reply_always("op ipx 0 list_uids", &["uid: 11\n"]);
        let mut ipx = client(&port);
        let found = verify_sensor_count(&mut ipx, 2, 1111111111, 2, Duration::ZERO).unwrap();
        assert!(found.is_none());
        assert_eq!(port.count_written("list_uids"), 2);
    }

    #[test]
    fn test_rename_refuses_check_sensor() {
        let port = ScriptedPort::new();
        let mut ipx = client(&port);
        assert!(matches!(
            rename_sensor(&mut ipx, 1111111111, 5, 1111111111),
            Err(WorkflowError::ProtectedSensor(_))
        ));
        assert!(port.written().is_empty());
    }

    #[test]
    fn test_rename_refuses_broadcast_uid() {
        let port = ScriptedPort::new();
        let mut ipx = client(&port);
        for (from, to) in [(2001, 0), (0, 2005)] {
            assert!(matches!(
                rename_sensor(&mut ipx, from, to, 1111111111),
                Err(WorkflowError::BroadcastUid)
            ));
        }
        assert!(port.written().is_empty());
    }
}
