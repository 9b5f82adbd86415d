//! Import pipeline for the DaVinci JSON export: file decode, reference
//! sections, timeframe table, change normalization and the plan commit.

use crate::config::{ImportConfig, MovePatterns};
use crate::errors::ImportError;
use crate::moves;
use crate::records::{ChangeFlags, SchoolYear, StandinRecord, Subject, Teacher};
use crate::store::Store;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use std::collections::HashMap;

const DAY_FMT: &str = "%Y%m%d";
const CLOCK_FMT: &str = "%H%M";
const STAMP_FMT: &str = "%Y%m%d %H%M";

// ---- export file data model ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    pub result: ExportResult,
    pub about: About,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct About {
    pub server_time_stamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    #[serde(default)]
    pub teachers: Vec<TeacherEntry>,
    #[serde(default)]
    pub subjects: Vec<SubjectEntry>,
    #[serde(default)]
    pub teams: Vec<TeamEntry>,
    #[serde(default)]
    pub courses: Vec<CourseEntry>,
    #[serde(default)]
    pub classes: Vec<ClassEntry>,
    #[serde(default)]
    pub timeframes: Vec<TimeframeEntry>,
    pub display_schedule: DisplaySchedule,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySchedule {
    #[serde(default)]
    pub lesson_times: Vec<LessonTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherEntry {
    pub id: String,
    pub code: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectEntry {
    pub id: String,
    pub code: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamEntry {
    pub id: String,
    pub code: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseEntry {
    pub id: String,
    pub subject_ref: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassEntry {
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub team_refs: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeframeEntry {
    pub code: String,
    #[serde(default)]
    pub timeslots: Vec<Timeslot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeslot {
    pub start_time: String,
    pub label: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonTime {
    #[serde(default)]
    pub dates: Vec<String>,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub class_codes: Vec<String>,
    #[serde(default)]
    pub teacher_codes: Vec<String>,
    #[serde(default)]
    pub room_codes: Vec<String>,
    pub course_ref: Option<String>,
    pub lesson_ref: Option<String>,
    pub changes: Option<Changes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changes {
    pub new_subject_code: Option<String>,
    #[serde(default)]
    pub new_teacher_codes: Vec<String>,
    #[serde(default)]
    pub new_room_codes: Vec<String>,
    #[serde(default)]
    pub absent_room_codes: Vec<String>,
    pub reason_type: Option<String>,
    pub cancelled: Option<String>,
    pub caption: Option<String>,
    pub information: Option<String>,
}

// ---- timeframe table ----

/// Maps a raw start-time token ("0755") to its ordinal hour, built from the
/// standard academic timetable of the file (duty timetables are excluded).
pub struct TimeframeTable {
    by_start: HashMap<String, u32>,
}

impl TimeframeTable {
    pub fn from_export(timeframes: &[TimeframeEntry]) -> Result<TimeframeTable, ImportError> {
        let mut by_start = HashMap::new();
        for tf in timeframes {
            if tf.code != "Standard" {
                continue;
            }
            for slot in &tf.timeslots {
                let label: u32 = slot.label.trim().parse().map_err(|e| {
                    ImportError::ParseFormat(format!(
                        "timeslot label {:?} is not an hour number: {e}",
                        slot.label
                    ))
                })?;
                by_start.insert(slot.start_time.clone(), label);
            }
        }
        Ok(TimeframeTable { by_start })
    }

    pub fn from_slots(slots: Vec<(String, u32)>) -> TimeframeTable {
        TimeframeTable {
            by_start: slots.into_iter().collect(),
        }
    }

    /// A start time outside the timetable is legitimate (duties); no hour.
    pub fn hour_for(&self, start_time: &str) -> Option<u32> {
        self.by_start.get(start_time).copied()
    }

    /// Reverse lookup: hour label back to the slot's clock time.
    pub fn time_for_hour(&self, hour: u32) -> Option<NaiveTime> {
        for (start, label) in &self.by_start {
            if *label == hour {
                return NaiveTime::parse_from_str(start, CLOCK_FMT).ok();
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }
}

// ---- decode ----

/// Decodes and parses the raw export bytes. Only a UTF-8 encoding name is
/// supported; when strict parsing fails and the text starts with a byte-order
/// mark, the BOM is stripped and parsing retried.
pub fn decode_export(bytes: &[u8], config: &ImportConfig) -> Result<ExportFile, ImportError> {
    if !config.encoding.eq_ignore_ascii_case("utf-8") {
        return Err(ImportError::ParseFormat(format!(
            "unsupported encoding: {}",
            config.encoding
        )));
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ImportError::ParseFormat(format!("not valid UTF-8: {e}")))?;
    match serde_json::from_str(text) {
        Ok(v) => Ok(v),
        Err(first) => {
            let trimmed = text.trim_start_matches('\u{feff}');
            if trimmed.len() != text.len() {
                serde_json::from_str(trimmed)
                    .map_err(|e| ImportError::ParseFormat(e.to_string()))
            } else {
                Err(ImportError::ParseFormat(first.to_string()))
            }
        }
    }
}

// ---- reference sections ----

fn parse_teachers(store: &Store, teachers: &[TeacherEntry]) -> Result<(), ImportError> {
    for t in teachers {
        store.upsert_teacher(
            &t.id,
            &t.code,
            t.first_name.as_deref(),
            t.last_name.as_deref(),
        )?;
    }
    Ok(())
}

fn parse_subjects(store: &Store, subjects: &[SubjectEntry]) -> Result<(), ImportError> {
    for s in subjects {
        let fullname = s.description.as_deref().unwrap_or(&s.code);
        store.upsert_subject(&s.id, &s.code, fullname)?;
    }
    Ok(())
}

fn parse_divisions(store: &Store, teams: &[TeamEntry]) -> Result<(), ImportError> {
    for t in teams {
        let name = t.description.as_deref().unwrap_or(&t.code);
        store.upsert_division(&t.id, Some(&t.code), name)?;
    }
    Ok(())
}

fn parse_courses(
    store: &Store,
    year: &SchoolYear,
    courses: &[CourseEntry],
) -> Result<(), ImportError> {
    for c in courses {
        // The subject must already be known; the teacher is learned later
        // from the first change entry naming the course.
        let subject = store.subject_by_id(&c.subject_ref)?;
        store.upsert_course(&c.id, year.id, &subject.id, &c.title)?;
    }
    Ok(())
}

fn parse_classes(
    store: &Store,
    year: &SchoolYear,
    classes: &[ClassEntry],
) -> Result<(), ImportError> {
    for cl in classes {
        let division = match cl.team_refs.first() {
            Some(team_ref) => Some(store.division_by_id(team_ref)?),
            None => None,
        };
        store.upsert_grade(&cl.id, year.id, &cl.code, division.as_ref().map(|d| d.id.as_str()))?;
    }
    Ok(())
}

// ---- normalizer ----

fn parse_day(s: &str) -> Result<NaiveDate, ImportError> {
    NaiveDate::parse_from_str(s, DAY_FMT)
        .map_err(|e| ImportError::ParseFormat(format!("bad date {s:?}: {e}")))
}

fn parse_clock(s: &str) -> Result<NaiveTime, ImportError> {
    NaiveTime::parse_from_str(s, CLOCK_FMT)
        .map_err(|e| ImportError::ParseFormat(format!("bad time {s:?}: {e}")))
}

/// Normalizes one change entry into zero or more standin records, one per
/// (affected class × affected date) pair. Any unknown reference aborts the
/// import; a single bad entry invalidates the batch.
pub fn normalize_change(
    store: &Store,
    timeframes: &TimeframeTable,
    patterns: &MovePatterns,
    year: &SchoolYear,
    les: &LessonTime,
) -> Result<Vec<StandinRecord>, ImportError> {
    let Some(changes) = &les.changes else {
        return Ok(Vec::new());
    };
    let lesson_ref = les.lesson_ref.clone().unwrap_or_default();

    let days = les
        .dates
        .iter()
        .map(|d| parse_day(d))
        .collect::<Result<Vec<_>, _>>()?;
    let time_start = parse_clock(&les.start_time)?;
    let time_end = parse_clock(&les.end_time)?;
    let hour = timeframes.hour_for(&les.start_time);

    let teacher = match les.teacher_codes.first() {
        Some(code) => store.teacher_by_code(code)?,
        None => return Err(ImportError::MissingTeacher { lesson_ref }),
    };

    let course_ref = les.course_ref.as_deref().ok_or_else(|| {
        ImportError::ParseFormat(format!("change {lesson_ref} has no courseRef"))
    })?;
    let course = store.course_by_id(course_ref)?;
    // One-time backfill: the file never names the course's own teacher, so
    // the first change entry teaches it to us.
    if course.teacher_id.is_none() {
        store.set_course_teacher(&course.id, &teacher.id)?;
    }

    // The plain room list sometimes already holds the substitute room; the
    // absent-room list, when present, is authoritative for the original one.
    let mut room = match les.room_codes.first() {
        Some(r) => r.clone(),
        None => return Err(ImportError::MissingRoom { lesson_ref }),
    };
    if let Some(r) = changes.absent_room_codes.first() {
        room = r.clone();
    }

    let mut flags = ChangeFlags::empty();

    let mut supply_subject: Option<Subject> = None;
    if let Some(code) = &changes.new_subject_code {
        supply_subject = Some(store.subject_by_code(code)?);
        flags.insert(ChangeFlags::SUBJECT);
    }

    let mut supply_teacher: Option<Teacher> = None;
    if let Some(code) = changes.new_teacher_codes.first() {
        supply_teacher = Some(store.teacher_by_code(code)?);
        flags.insert(ChangeFlags::TEACHER);
    }

    let mut supply_room: Option<String> = None;
    if let Some(code) = changes.new_room_codes.first() {
        supply_room = Some(code.clone());
        flags.insert(ChangeFlags::ROOM);
    }

    if changes.reason_type.as_deref() == Some("classAbsence") {
        flags.insert(ChangeFlags::CANCELLED);
    }

    let reference = || -> Result<NaiveDateTime, ImportError> {
        let first = days.first().ok_or_else(|| {
            ImportError::ParseFormat(format!("change {lesson_ref} has a caption but no dates"))
        })?;
        Ok(first.and_time(time_start))
    };

    let mut supply_date: Option<NaiveDate> = None;
    let mut supply_hour: Option<u32> = None;

    match changes.cancelled.as_deref() {
        Some("movedAway") => {
            flags.insert(ChangeFlags::MOVED_TO);
            if let (Some(caption), Some(re)) = (&changes.caption, patterns.moved_to.as_ref()) {
                if let Some(mv) = moves::resolve_move(caption, re, timeframes, reference()?)? {
                    supply_date = Some(mv.day);
                    supply_hour = Some(mv.hour);
                }
            }
        }
        Some("classFree") | Some("lessonCancelled") => {
            flags.insert(ChangeFlags::FREE);
        }
        _ => {}
    }

    // The inverse entry of a move carries the same caption shape; only
    // attempted when the entry is neither free nor itself moved away.
    if let Some(caption) = &changes.caption {
        if !flags.is_free() && !flags.is_moved_to() {
            if let Some(re) = patterns.moved_from.as_ref() {
                if let Some(mv) = moves::resolve_move(caption, re, timeframes, reference()?)? {
                    flags.insert(ChangeFlags::MOVED_FROM);
                    supply_date = Some(mv.day);
                    supply_hour = Some(mv.hour);
                }
            }
        }
    }

    let note = changes.information.clone();

    let mut records = Vec::with_capacity(les.class_codes.len() * days.len());
    for class_code in &les.class_codes {
        let grade = store.grade_by_code(year.id, class_code)?;
        for day in &days {
            records.push(StandinRecord {
                day: *day,
                hour,
                time_start,
                time_end,
                grade_id: grade.id.clone(),
                grade_code: grade.code.clone(),
                course_id: course.id.clone(),
                course_name: course.name.clone(),
                room: room.clone(),
                supply_teacher: supply_teacher.clone(),
                supply_subject: supply_subject.clone(),
                supply_room: supply_room.clone(),
                supply_date,
                supply_hour,
                supply_time_start: None,
                supply_time_end: None,
                note: note.clone(),
                flags,
            });
        }
    }
    Ok(records)
}

// ---- orchestrator ----

#[derive(Debug, Clone, Copy)]
pub struct ImportSummary {
    pub plan_id: i64,
    pub stand: NaiveDateTime,
    pub changes: usize,
    pub entries: usize,
}

/// Runs the whole pipeline over one export file inside a single transaction.
/// Nothing becomes visible to readers unless every change entry normalizes;
/// activation is the last step before commit.
pub fn import_plan(
    conn: &Connection,
    config: &ImportConfig,
    year: &SchoolYear,
    bytes: &[u8],
) -> Result<ImportSummary, ImportError> {
    let patterns = config.compile_patterns()?;
    let export = decode_export(bytes, config)?;

    let tx = conn.unchecked_transaction()?;
    let store = Store::new(&tx);

    // Reference sections in dependency order: courses need their subjects,
    // classes their divisions, changes need all of them.
    parse_teachers(&store, &export.result.teachers)?;
    parse_subjects(&store, &export.result.subjects)?;
    parse_divisions(&store, &export.result.teams)?;
    parse_courses(&store, year, &export.result.courses)?;
    parse_classes(&store, year, &export.result.classes)?;

    let timeframes = TimeframeTable::from_export(&export.result.timeframes)?;

    let stand = NaiveDateTime::parse_from_str(&export.about.server_time_stamp, STAMP_FMT)
        .map_err(|e| {
            ImportError::ParseFormat(format!(
                "bad serverTimeStamp {:?}: {e}",
                export.about.server_time_stamp
            ))
        })?;
    let plan_id = store.insert_plan(Utc::now().naive_utc(), stand)?;

    let mut records: Vec<StandinRecord> = Vec::new();
    let mut changes = 0usize;
    for les in &export.result.display_schedule.lesson_times {
        if les.changes.is_none() {
            continue;
        }
        changes += 1;
        records.extend(normalize_change(&store, &timeframes, &patterns, year, les)?);
    }

    for rec in &records {
        store.insert_entry(plan_id, rec)?;
    }
    store.activate_plan(plan_id)?;
    tx.commit()?;

    Ok(ImportSummary {
        plan_id,
        stand,
        changes,
        entries: records.len(),
    })
}
