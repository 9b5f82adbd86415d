use crate::errors::ImportError;
use regex::Regex;
use serde::Deserialize;

/// Default caption patterns of the reference deployment (DaVinci, German).
/// Named groups: day, month, weekday, startHour, optional endHour.
pub const DEFAULT_MOVED_TO_PATTERN: &str = r"^Auf (?P<day>[0-9]{1,2})\.(?P<month>[0-9]{1,2})\. (?P<weekday>[a-zA-Z]{2}) (?P<startHour>[0-9]{1,2})(-(?P<endHour>[0-9]{1,2}))? verschoben$";
pub const DEFAULT_MOVED_FROM_PATTERN: &str = r"^Von (?P<day>[0-9]{1,2})\.(?P<month>[0-9]{1,2})\. (?P<weekday>[a-zA-Z]{2}) (?P<startHour>[0-9]{1,2})(-(?P<endHour>[0-9]{1,2}))? verschoben$";

/// Resolved configuration bundle for one import run. Callers may override any
/// field through the request params; absent fields keep the defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportConfig {
    pub encoding: String,
    pub moved_to_pattern: Option<String>,
    pub moved_from_pattern: Option<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            encoding: "utf-8".to_string(),
            moved_to_pattern: Some(DEFAULT_MOVED_TO_PATTERN.to_string()),
            moved_from_pattern: Some(DEFAULT_MOVED_FROM_PATTERN.to_string()),
        }
    }
}

/// Compiled caption patterns. A pattern set to None disables that kind of
/// caption resolution entirely.
#[derive(Debug)]
pub struct MovePatterns {
    pub moved_to: Option<Regex>,
    pub moved_from: Option<Regex>,
}

impl ImportConfig {
    pub fn compile_patterns(&self) -> Result<MovePatterns, ImportError> {
        let compile = |src: &Option<String>, which: &str| -> Result<Option<Regex>, ImportError> {
            match src {
                None => Ok(None),
                Some(p) => Regex::new(p).map(Some).map_err(|e| {
                    ImportError::ParseFormat(format!("invalid {which} pattern: {e}"))
                }),
            }
        };
        Ok(MovePatterns {
            moved_to: compile(&self.moved_to_pattern, "moved-to")?,
            moved_from: compile(&self.moved_from_pattern, "moved-from")?,
        })
    }
}

/// Display toggles for name expansion, consumed by the view handler.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DisplayOptions {
    pub teacher_fullname: bool,
    pub teacher_shortcut: bool,
    pub subject_fullname: bool,
    pub subject_shortcut: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        DisplayOptions {
            teacher_fullname: true,
            teacher_shortcut: false,
            subject_fullname: true,
            subject_shortcut: false,
        }
    }
}
