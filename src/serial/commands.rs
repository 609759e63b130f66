/// How long a command keeps listening after the last byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenClass {
    /// Parameter writes that answer with a single confirmation line
    Setter,
    /// Reads such as list/status/raw
    Query,
    /// Calibration, which streams results for many seconds
    Calibration,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Command '{command}' is missing a value for '{placeholder}'")]
    MissingArgument {
        command: &'static str,
        placeholder: String,
    },

    #[error("Command '{command}' has an unterminated placeholder")]
    Unterminated { command: &'static str },

    #[error("Value for '{placeholder}' in command '{command}' contains a line break")]
    LineBreakInArgument {
        command: &'static str,
        placeholder: String,
    },
}

/// An ASCII command line with `{named}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct CommandTemplate {
    pub name: &'static str,
    pub pattern: &'static str,
    /// Phrase the reply must start with when verification is on
    pub expected: Option<&'static str>,
    /// Line that ends the reply early
    pub terminator: Option<&'static str>,
    pub listen: ListenClass,
}

impl CommandTemplate {
    const fn query(name: &'static str, pattern: &'static str) -> Self {
        Self {
            name,
            pattern,
            expected: None,
            terminator: None,
            listen: ListenClass::Query,
        }
    }

    const fn setter(name: &'static str, pattern: &'static str, expected: &'static str) -> Self {
        Self {
            name,
            pattern,
            expected: Some(expected),
            terminator: None,
            listen: ListenClass::Setter,
        }
    }

    /// Substitute every placeholder. Values may not contain CR or LF.
    pub fn render(&self, args: &[(&str, String)]) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.pattern.len() + 16);
        let mut rest = self.pattern;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after
                .find('}')
                .ok_or(TemplateError::Unterminated { command: self.name })?;
            let placeholder = &after[..end];

            let value = args
                .iter()
                .find(|(key, _)| *key == placeholder)
                .map(|(_, value)| value.as_str())
                .ok_or_else(|| TemplateError::MissingArgument {
                    command: self.name,
                    placeholder: placeholder.to_string(),
                })?;
            if value.contains(['\r', '\n']) {
                return Err(TemplateError::LineBreakInArgument {
                    command: self.name,
                    placeholder: placeholder.to_string(),
                });
            }

            out.push_str(value);
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

pub const CALIBRATION_COMPLETE: &str =
    "CMD_EXEC_Calibrate: Calibration on all sensors complete, saving to memory.";

/// Fixed key the firmware requires before accepting a new UID.
pub const SET_UID_KEY: u32 = 567892;

pub const LIST_UIDS: CommandTemplate = CommandTemplate::query("list_uids", "op ipx 0 list_uids\n");
pub const GET_STATUS: CommandTemplate =
    CommandTemplate::query("get_status", "op ipx {uid} get_status\n");
pub const GET_RAW: CommandTemplate = CommandTemplate::query("get_raw", "op ipx {uid} get_raw\n");

pub const CALIBRATE: CommandTemplate = CommandTemplate {
    name: "calibrate",
    pattern: "op ipx {uid} calibrate\n",
    expected: None,
    terminator: Some(CALIBRATION_COMPLETE),
    listen: ListenClass::Calibration,
};

pub const SET_BAUD: CommandTemplate = CommandTemplate::setter(
    "set_baud",
    "op ipx {uid} set_baud {baud}\n",
    "CMD_EXEC_Set_Baud: Baudrate set to",
);
pub const SET_UID: CommandTemplate = CommandTemplate::setter(
    "set_uid",
    "op ipx {current_uid} set_uid {key} {new_uid}\n",
    "CMD_EXEC_Set_UID: UID set to",
);
pub const SET_AXIS: CommandTemplate = CommandTemplate::setter(
    "set_axis",
    "op ipx {uid} set_axis {axis}\n",
    "CMD_EXEC_Set_Axis: Axis set to",
);
pub const SET_GAIN: CommandTemplate = CommandTemplate::setter(
    "set_gain",
    "op ipx {uid} set_gain {gain}\n",
    "CMD_EXEC_Set_Gain: Gain set to",
);
pub const SET_CENTROID_THRESHOLD: CommandTemplate = CommandTemplate::setter(
    "set_centroid_threshold",
    "op ipx {uid} set_centroid_threshold {threshold}\n",
    "CMD_EXEC_Set_Centroid_Threshold: Centroiding threshold is set to",
);
pub const SET_CENTROID_RES: CommandTemplate = CommandTemplate::setter(
    "set_centroid_res",
    "op ipx {uid} set_centroid_res {resolution}\n",
    "CMD_EXEC_Set_Centroid_Res: Centroiding resolution set to",
);
pub const SET_N_STDS: CommandTemplate = CommandTemplate::setter(
    "set_n_stds",
    "op ipx {uid} set_n_stds {n_stds}\n",
    "CMD_EXEC_Set_N_STDDevs: Number of standard deviations set to",
);
pub const SET_TERM: CommandTemplate = CommandTemplate::setter(
    "set_term",
    "op ipx {uid} set_term {termination}\n",
    "CMD_EXEC_Enable_120R: 120ohm termination",
);
pub const SET_ALIAS: CommandTemplate = CommandTemplate::setter(
    "set_alias",
    "op ipx {uid} set_alias {alias}\n",
    "CMD_EXEC_Set_Alias: Alias set to",
);

/// Every IPX template, for callers that need to iterate over them.
pub const ALL: [CommandTemplate; 13] = [
    LIST_UIDS,
    GET_STATUS,
    GET_RAW,
    CALIBRATE,
    SET_BAUD,
    SET_UID,
    SET_AXIS,
    SET_GAIN,
    SET_CENTROID_THRESHOLD,
    SET_CENTROID_RES,
    SET_N_STDS,
    SET_TERM,
    SET_ALIAS,
];
