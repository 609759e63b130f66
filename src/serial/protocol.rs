use std::collections::HashMap;
use std::time::Duration;

use super::commands::{self, CommandTemplate, TemplateError, SET_UID_KEY};
use super::{parser, SerialError, SerialInterface, Uid, BROADCAST_UID};
use crate::calibration::{parse_calibration, CalibrationRecord};
use crate::config::ListenSettings;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Corrupted data in reply to '{command}' ({len} bytes not valid UTF-8)")]
    CorruptedData { command: String, len: usize },

    #[error("Verification failed for '{command}': expected '{expected}', got '{actual}'")]
    VerificationFailed {
        command: String,
        expected: String,
        actual: String,
    },

    #[error("Malformed reply to '{command}': {detail}")]
    Malformed { command: String, detail: String },

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Serial error: {0}")]
    Serial(#[from] SerialError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Decode a reply frame as UTF-8 and trim it.
pub fn decode_response(command: &str, raw: &[u8]) -> Result<String> {
    match std::str::from_utf8(raw) {
        Ok(text) => Ok(text.trim().to_string()),
        Err(_) => {
            log::error!(
                "Undecodable reply to '{}': {}",
                command.trim_end(),
                hex::encode(raw)
            );
            Err(ProtocolError::CorruptedData {
                command: command.trim_end().to_string(),
                len: raw.len(),
            })
        }
    }
}

/// Case-insensitive prefix check of a reply against its confirmation phrase.
pub fn verify_prefix(command: &str, expected: &str, actual: &str) -> Result<()> {
    let matches = actual
        .get(..expected.len())
        .map_or(false, |head| head.eq_ignore_ascii_case(expected));
    if matches {
        return Ok(());
    }
    log::warn!(
        "Verification failed for '{}': expected '{}', got '{}'",
        command.trim_end(),
        expected,
        actual
    );
    Err(ProtocolError::VerificationFailed {
        command: command.trim_end().to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    })
}

/// IPX ASCII protocol client.
///
/// Every operation renders its command template, sends it through the framed
/// transport and checks the confirmation phrase when verification is enabled.
pub struct IpxProtocol {
    interface: SerialInterface,
    verify: bool,
    listen: ListenSettings,
}

impl IpxProtocol {
    pub fn new(interface: SerialInterface) -> Self {
        Self {
            interface,
            verify: true,
            listen: ListenSettings::default(),
        }
    }

    pub fn with_listen(mut self, listen: ListenSettings) -> Self {
        self.listen = listen;
        self
    }

    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Send an already rendered command and return the decoded reply.
    pub fn transact(
        &mut self,
        command: &str,
        idle_timeout: Duration,
        terminator: Option<&str>,
        expected: Option<&str>,
    ) -> Result<String> {
        let raw = self
            .interface
            .send_and_collect(command, idle_timeout, terminator)?;
        let text = decode_response(command, &raw)?;

        if self.verify {
            if let Some(expected) = expected {
                verify_prefix(command, expected, &text)?;
            }
        }
        Ok(text)
    }

    /// Render `template` and send it with its own listen window and checks.
    pub fn send_template(
        &mut self,
        template: &CommandTemplate,
        args: &[(&str, String)],
    ) -> Result<String> {
        let command = template.render(args)?;
        let idle = self.listen.idle_for(template.listen);
        self.transact(&command, idle, template.terminator, template.expected)
    }

    fn setter(
        &mut self,
        template: &CommandTemplate,
        uid: Uid,
        name: &str,
        value: u32,
    ) -> Result<String> {
        if is_broadcast(template.name, uid) {
            return Ok(String::new());
        }
        let args = [("uid", uid.to_string()), (name, value.to_string())];
        let reply = self.send_template(template, &args)?;
        log::info!("{} on {}: {}", template.name, uid, reply);
        Ok(reply)
    }

    /// Raw reply to `list_uids`
    pub fn list_uids_text(&mut self) -> Result<String> {
        self.send_template(&commands::LIST_UIDS, &[])
    }

    /// UIDs of every sensor on the bus, in reply order
    pub fn list_uids(&mut self) -> Result<Vec<Uid>> {
        let text = self.list_uids_text()?;
        parser::parse_uid_list(&text).map_err(|detail| ProtocolError::Malformed {
            command: commands::LIST_UIDS.name.to_string(),
            detail,
        })
    }

    pub fn get_status_text(&mut self, uid: Uid) -> Result<String> {
        if is_broadcast(commands::GET_STATUS.name, uid) {
            return Ok(String::new());
        }
        self.send_template(&commands::GET_STATUS, &[("uid", uid.to_string())])
    }

    /// Status fields of one sensor
    pub fn get_status(&mut self, uid: Uid) -> Result<HashMap<String, String>> {
        let text = self.get_status_text(uid)?;
        Ok(parser::parse_status(&text))
    }

    /// One raw sample per axis
    pub fn get_raw(&mut self, uid: Uid) -> Result<Vec<i64>> {
        if is_broadcast(commands::GET_RAW.name, uid) {
            return Ok(Vec::new());
        }
        let text = self.send_template(&commands::GET_RAW, &[("uid", uid.to_string())])?;
        parser::parse_raw_samples(&text).map_err(|detail| ProtocolError::Malformed {
            command: commands::GET_RAW.name.to_string(),
            detail,
        })
    }

    /// Run calibration and return the full reply text
    pub fn calibrate_text(&mut self, uid: Uid) -> Result<String> {
        if is_broadcast(commands::CALIBRATE.name, uid) {
            return Ok(String::new());
        }
        log::info!("Calibrating sensor {}", uid);
        self.send_template(&commands::CALIBRATE, &[("uid", uid.to_string())])
    }

    /// Run calibration and parse the per-axis results
    pub fn calibrate(&mut self, uid: Uid) -> Result<Vec<CalibrationRecord>> {
        let text = self.calibrate_text(uid)?;
        Ok(parse_calibration(&text))
    }

    pub fn set_baud(&mut self, uid: Uid, baud: u32) -> Result<String> {
        self.setter(&commands::SET_BAUD, uid, "baud", baud)
    }

    /// Give a sensor a new UID
    pub fn set_uid(&mut self, current_uid: Uid, new_uid: Uid) -> Result<String> {
        if is_broadcast(commands::SET_UID.name, current_uid)
            || is_broadcast(commands::SET_UID.name, new_uid)
        {
            return Ok(String::new());
        }
        let reply = self.send_template(
            &commands::SET_UID,
            &[
                ("current_uid", current_uid.to_string()),
                ("key", SET_UID_KEY.to_string()),
                ("new_uid", new_uid.to_string()),
            ],
        )?;
        log::info!("UID {} changed to {}", current_uid, new_uid);
        Ok(reply)
    }

    pub fn set_axis(&mut self, uid: Uid, axis: u32) -> Result<String> {
        self.setter(&commands::SET_AXIS, uid, "axis", axis)
    }

    pub fn set_gain(&mut self, uid: Uid, gain: u32) -> Result<String> {
        self.setter(&commands::SET_GAIN, uid, "gain", gain)
    }

    pub fn set_centroid_threshold(&mut self, uid: Uid, threshold: u32) -> Result<String> {
        self.setter(&commands::SET_CENTROID_THRESHOLD, uid, "threshold", threshold)
    }

    pub fn set_centroid_res(&mut self, uid: Uid, resolution: u32) -> Result<String> {
        self.setter(&commands::SET_CENTROID_RES, uid, "resolution", resolution)
    }

    pub fn set_n_stds(&mut self, uid: Uid, n_stds: u32) -> Result<String> {
        self.setter(&commands::SET_N_STDS, uid, "n_stds", n_stds)
    }

    pub fn set_term(&mut self, uid: Uid, termination: u32) -> Result<String> {
        self.setter(&commands::SET_TERM, uid, "termination", termination)
    }

    pub fn set_alias(&mut self, uid: Uid, alias: u32) -> Result<String> {
        self.setter(&commands::SET_ALIAS, uid, "alias", alias)
    }
}

/// Per-device operations never go out with the broadcast UID.
fn is_broadcast(operation: &str, uid: Uid) -> bool {
    if uid == BROADCAST_UID {
        log::warn!("Refusing {} with broadcast UID 0", operation);
        return true;
    }
    false
}
