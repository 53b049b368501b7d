use crate::schedule::config::ConfigError;
use serde::Serialize;

pub const AT_HANGUP: &str = "ATH";

// Outcome of one dial/hold/hangup sequence, serialized as returned to HTTP callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DialResult {
    Ok {
        number: String,
        call_seconds: u64,
        resp_start: String,
        resp_end: String,
    },
    Error {
        msg: String,
    },
}

impl DialResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Ok { .. } => "ok",
            Self::Error { .. } => "error",
        }
    }
}

// Voice call: the trailing ';' keeps the modem in command mode.
pub fn dial_command(number: &str) -> String {
    format!("ATD{number};")
}

// Only dialable characters may reach `ATD`, so a number cannot smuggle in another command.
pub fn validate_number(number: &str) -> Result<(), ConfigError> {
    let valid = !number.is_empty()
        && number
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '*' | '#'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::DialNumber(number.to_string()))
    }
}

// Drop carriage returns, squeeze blank lines, trim.
pub fn normalize_reply(raw: &str) -> String {
    raw.replace('\r', "").replace("\n\n", "\n").trim().to_string()
}
