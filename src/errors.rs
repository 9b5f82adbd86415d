use chrono::NaiveDate;
use thiserror::Error;

/// Failure kinds of a plan import. Any of these aborts the whole run;
/// there is no per-record skip-and-continue mode.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("file unreadable or not decodable: {0}")]
    ParseFormat(String),

    #[error("no school year covers {0}")]
    MissingSchoolYear(NaiveDate),

    #[error("no teacher given with reference {lesson_ref}")]
    MissingTeacher { lesson_ref: String },

    #[error("no room given with reference {lesson_ref}")]
    MissingRoom { lesson_ref: String },

    #[error("unknown {kind} code {key}")]
    UnknownReference { kind: &'static str, key: String },

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl ImportError {
    /// Stable code for the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::ParseFormat(_) => "parse_format",
            ImportError::MissingSchoolYear(_) => "missing_school_year",
            ImportError::MissingTeacher { .. } => "missing_teacher",
            ImportError::MissingRoom { .. } => "missing_room",
            ImportError::UnknownReference { .. } => "unknown_reference",
            ImportError::Db(_) => "db_failed",
        }
    }
}
