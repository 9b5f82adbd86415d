use crate::config::DisplayOptions;
use chrono::{NaiveDate, NaiveTime};

/// Typed set of change kinds on a standin record. Bits are only ever added
/// during normalization, never cleared; the API has no remove operation.
/// Bit values are part of the stored format (DUTY skips 256).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeFlags(u16);

impl ChangeFlags {
    pub const CANCELLED: ChangeFlags = ChangeFlags(1);
    pub const ROOM: ChangeFlags = ChangeFlags(2);
    pub const TEACHER: ChangeFlags = ChangeFlags(4);
    pub const SUBJECT: ChangeFlags = ChangeFlags(8);
    pub const DATETIME: ChangeFlags = ChangeFlags(16);
    pub const MOVED_FROM: ChangeFlags = ChangeFlags(32);
    pub const MOVED_TO: ChangeFlags = ChangeFlags(64);
    pub const FREE: ChangeFlags = ChangeFlags(128);
    pub const DUTY: ChangeFlags = ChangeFlags(512);

    pub fn empty() -> ChangeFlags {
        ChangeFlags(0)
    }

    pub fn from_bits(bits: u16) -> ChangeFlags {
        ChangeFlags(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn insert(&mut self, other: ChangeFlags) {
        self.0 |= other.0;
    }

    pub fn contains(self, other: ChangeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The class is absent and can stay home.
    pub fn is_cancelled(self) -> bool {
        self.contains(ChangeFlags::CANCELLED)
    }

    /// A single lesson is cancelled.
    pub fn is_free(self) -> bool {
        self.contains(ChangeFlags::FREE)
    }

    pub fn is_moved_from(self) -> bool {
        self.contains(ChangeFlags::MOVED_FROM)
    }

    pub fn is_moved_to(self) -> bool {
        self.contains(ChangeFlags::MOVED_TO)
    }

    /// Exactly a duty entry (schoolyard duty etc.), nothing else set.
    pub fn is_duty_only(self) -> bool {
        self == ChangeFlags::DUTY
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Teacher {
    pub id: String,
    pub code: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Teacher {
    pub fn full_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => Some(format!("{f} {l}")),
            _ => None,
        }
    }

    /// Name shown to pupils: the full name when available and enabled,
    /// otherwise the code; the shortcut toggle appends the code.
    pub fn display_name(&self, opts: &DisplayOptions) -> String {
        let Some(full) = self.full_name() else {
            return self.code.clone();
        };
        if !opts.teacher_fullname {
            return self.code.clone();
        }
        if opts.teacher_shortcut {
            format!("{} ({})", full, self.code)
        } else {
            full
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub id: String,
    pub code: String,
    pub fullname: String,
}

impl Subject {
    pub fn display_name(&self, opts: &DisplayOptions) -> String {
        if !opts.subject_fullname {
            return self.code.clone();
        }
        if opts.subject_shortcut {
            format!("{} ({})", self.fullname, self.code)
        } else {
            self.fullname.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Division {
    pub id: String,
    pub code: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchoolYear {
    pub id: i64,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Course {
    pub id: String,
    pub school_year_id: i64,
    pub teacher_id: Option<String>,
    pub subject_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grade {
    pub id: String,
    pub school_year_id: i64,
    pub code: String,
    pub division_id: Option<String>,
}

/// One normalized, per-date-per-class substitution fact. Constructed once by
/// the normalizer and immutable afterwards; owned by its plan.
#[derive(Debug, Clone, PartialEq)]
pub struct StandinRecord {
    pub day: NaiveDate,
    /// Ordinal hour; None when the start time is outside the standard
    /// timetable (e.g. duties).
    pub hour: Option<u32>,
    pub time_start: NaiveTime,
    pub time_end: NaiveTime,
    pub grade_id: String,
    pub grade_code: String,
    pub course_id: String,
    pub course_name: String,
    pub room: String,
    pub supply_teacher: Option<Teacher>,
    pub supply_subject: Option<Subject>,
    pub supply_room: Option<String>,
    pub supply_date: Option<NaiveDate>,
    pub supply_hour: Option<u32>,
    pub supply_time_start: Option<NaiveTime>,
    pub supply_time_end: Option<NaiveTime>,
    pub note: Option<String>,
    pub flags: ChangeFlags,
}

impl StandinRecord {
    pub fn hour_label(&self) -> String {
        match self.hour {
            Some(h) => format!("{h}."),
            None => String::new(),
        }
    }

    pub fn supply_hour_label(&self) -> String {
        match self.supply_hour {
            Some(h) => format!("{h}."),
            None => String::new(),
        }
    }
}
