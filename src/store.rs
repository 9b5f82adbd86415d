use crate::errors::ImportError;
use crate::records::{
    ChangeFlags, Course, Division, Grade, SchoolYear, StandinRecord, Subject, Teacher,
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M";
const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Plan header row: one import batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanHeader {
    pub id: i64,
    pub uploaded_at: NaiveDateTime,
    pub stand: NaiveDateTime,
    pub active: bool,
}

/// Key-based read/upsert access to the reference entities and plans.
/// All upserts are idempotent and keyed by the natural id of the export;
/// they deliberately never duplicate rows on re-import.
pub struct Store<'a> {
    conn: &'a Connection,
}

fn bad_col(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn get_date(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DATE_FMT).map_err(|e| bad_col(idx, e))
}

fn get_opt_date(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| NaiveDate::parse_from_str(&s, DATE_FMT).map_err(|e| bad_col(idx, e)))
        .transpose()
}

fn get_time(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveTime> {
    let s: String = row.get(idx)?;
    NaiveTime::parse_from_str(&s, TIME_FMT).map_err(|e| bad_col(idx, e))
}

fn get_opt_time(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<NaiveTime>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| NaiveTime::parse_from_str(&s, TIME_FMT).map_err(|e| bad_col(idx, e)))
        .transpose()
}

fn get_datetime(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let s: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&s, DATETIME_FMT).map_err(|e| bad_col(idx, e))
}

impl<'a> Store<'a> {
    pub fn new(conn: &'a Connection) -> Store<'a> {
        Store { conn }
    }

    // ---- school years ----

    pub fn school_year_for(&self, day: NaiveDate) -> Result<Option<SchoolYear>, ImportError> {
        let d = day.format(DATE_FMT).to_string();
        let row = self
            .conn
            .query_row(
                "SELECT id, start_date, end_date FROM school_years
                 WHERE start_date <= ? AND end_date >= ?",
                [&d, &d],
                |r| {
                    Ok(SchoolYear {
                        id: r.get(0)?,
                        start: get_date(r, 1)?,
                        end: get_date(r, 2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn current_school_year(&self, day: NaiveDate) -> Result<SchoolYear, ImportError> {
        self.school_year_for(day)?
            .ok_or(ImportError::MissingSchoolYear(day))
    }

    /// Defines or adjusts the school year covering `start`.
    pub fn upsert_school_year(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SchoolYear, ImportError> {
        if let Some(existing) = self.school_year_for(start)? {
            self.conn.execute(
                "UPDATE school_years SET start_date = ?, end_date = ? WHERE id = ?",
                (
                    start.format(DATE_FMT).to_string(),
                    end.format(DATE_FMT).to_string(),
                    existing.id,
                ),
            )?;
            return Ok(SchoolYear {
                id: existing.id,
                start,
                end,
            });
        }
        self.conn.execute(
            "INSERT INTO school_years(start_date, end_date) VALUES(?, ?)",
            (
                start.format(DATE_FMT).to_string(),
                end.format(DATE_FMT).to_string(),
            ),
        )?;
        Ok(SchoolYear {
            id: self.conn.last_insert_rowid(),
            start,
            end,
        })
    }

    // ---- reference entities ----

    pub fn upsert_teacher(
        &self,
        id: &str,
        code: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<(), ImportError> {
        self.conn.execute(
            "INSERT INTO teachers(id, code, first_name, last_name)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               code = excluded.code,
               first_name = excluded.first_name,
               last_name = excluded.last_name",
            (id, code, first_name, last_name),
        )?;
        Ok(())
    }

    pub fn teacher_by_code(&self, code: &str) -> Result<Teacher, ImportError> {
        self.conn
            .query_row(
                "SELECT id, code, first_name, last_name FROM teachers WHERE code = ?",
                [code],
                |r| {
                    Ok(Teacher {
                        id: r.get(0)?,
                        code: r.get(1)?,
                        first_name: r.get(2)?,
                        last_name: r.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| ImportError::UnknownReference {
                kind: "teacher",
                key: code.to_string(),
            })
    }

    pub fn upsert_subject(&self, id: &str, code: &str, fullname: &str) -> Result<(), ImportError> {
        self.conn.execute(
            "INSERT INTO subjects(id, code, fullname)
             VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               code = excluded.code,
               fullname = excluded.fullname",
            (id, code, fullname),
        )?;
        Ok(())
    }

    pub fn subject_by_id(&self, id: &str) -> Result<Subject, ImportError> {
        self.conn
            .query_row(
                "SELECT id, code, fullname FROM subjects WHERE id = ?",
                [id],
                |r| {
                    Ok(Subject {
                        id: r.get(0)?,
                        code: r.get(1)?,
                        fullname: r.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| ImportError::UnknownReference {
                kind: "subject",
                key: id.to_string(),
            })
    }

    pub fn subject_by_code(&self, code: &str) -> Result<Subject, ImportError> {
        self.conn
            .query_row(
                "SELECT id, code, fullname FROM subjects WHERE code = ?",
                [code],
                |r| {
                    Ok(Subject {
                        id: r.get(0)?,
                        code: r.get(1)?,
                        fullname: r.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| ImportError::UnknownReference {
                kind: "subject",
                key: code.to_string(),
            })
    }

    pub fn upsert_division(
        &self,
        id: &str,
        code: Option<&str>,
        name: &str,
    ) -> Result<(), ImportError> {
        self.conn.execute(
            "INSERT INTO divisions(id, code, name)
             VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               code = excluded.code,
               name = excluded.name",
            (id, code, name),
        )?;
        Ok(())
    }

    pub fn division_by_id(&self, id: &str) -> Result<Division, ImportError> {
        self.conn
            .query_row(
                "SELECT id, code, name FROM divisions WHERE id = ?",
                [id],
                |r| {
                    Ok(Division {
                        id: r.get(0)?,
                        code: r.get(1)?,
                        name: r.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| ImportError::UnknownReference {
                kind: "division",
                key: id.to_string(),
            })
    }

    pub fn division_name_for_grade(&self, grade_id: &str) -> Result<Option<String>, ImportError> {
        let name = self
            .conn
            .query_row(
                "SELECT d.name FROM grades g
                 JOIN divisions d ON d.id = g.division_id
                 WHERE g.id = ?",
                [grade_id],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(name)
    }

    /// Courses keep an already-learned teacher across re-imports; only the
    /// descriptive fields follow the file.
    pub fn upsert_course(
        &self,
        id: &str,
        school_year_id: i64,
        subject_id: &str,
        name: &str,
    ) -> Result<(), ImportError> {
        self.conn.execute(
            "INSERT INTO courses(id, school_year_id, teacher_id, subject_id, name)
             VALUES(?, ?, NULL, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               school_year_id = excluded.school_year_id,
               subject_id = excluded.subject_id,
               name = excluded.name",
            (id, school_year_id, subject_id, name),
        )?;
        Ok(())
    }

    pub fn course_by_id(&self, id: &str) -> Result<Course, ImportError> {
        self.conn
            .query_row(
                "SELECT id, school_year_id, teacher_id, subject_id, name FROM courses WHERE id = ?",
                [id],
                |r| {
                    Ok(Course {
                        id: r.get(0)?,
                        school_year_id: r.get(1)?,
                        teacher_id: r.get(2)?,
                        subject_id: r.get(3)?,
                        name: r.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| ImportError::UnknownReference {
                kind: "course",
                key: id.to_string(),
            })
    }

    pub fn set_course_teacher(&self, course_id: &str, teacher_id: &str) -> Result<(), ImportError> {
        self.conn.execute(
            "UPDATE courses SET teacher_id = ? WHERE id = ?",
            (teacher_id, course_id),
        )?;
        Ok(())
    }

    pub fn upsert_grade(
        &self,
        id: &str,
        school_year_id: i64,
        code: &str,
        division_id: Option<&str>,
    ) -> Result<(), ImportError> {
        self.conn.execute(
            "INSERT INTO grades(id, school_year_id, code, division_id)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               school_year_id = excluded.school_year_id,
               code = excluded.code,
               division_id = excluded.division_id",
            (id, school_year_id, code, division_id),
        )?;
        Ok(())
    }

    pub fn grade_by_code(&self, school_year_id: i64, code: &str) -> Result<Grade, ImportError> {
        self.conn
            .query_row(
                "SELECT id, school_year_id, code, division_id FROM grades
                 WHERE school_year_id = ? AND code = ?",
                (school_year_id, code),
                |r| {
                    Ok(Grade {
                        id: r.get(0)?,
                        school_year_id: r.get(1)?,
                        code: r.get(2)?,
                        division_id: r.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| ImportError::UnknownReference {
                kind: "class",
                key: code.to_string(),
            })
    }

    // ---- plans ----

    pub fn insert_plan(
        &self,
        uploaded_at: NaiveDateTime,
        stand: NaiveDateTime,
    ) -> Result<i64, ImportError> {
        self.conn.execute(
            "INSERT INTO plans(uploaded_at, stand, active) VALUES(?, ?, 0)",
            (
                uploaded_at.format(DATETIME_FMT).to_string(),
                stand.format(DATETIME_FMT).to_string(),
            ),
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Flips the plan's active flag. The single visibility gate: readers only
    /// ever see the most recently activated plan.
    pub fn activate_plan(&self, plan_id: i64) -> Result<(), ImportError> {
        self.conn.execute(
            "UPDATE plans SET active = 1 WHERE id = ?",
            [plan_id],
        )?;
        Ok(())
    }

    pub fn active_plan(&self) -> Result<Option<PlanHeader>, ImportError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, uploaded_at, stand, active FROM plans
                 WHERE active = 1 ORDER BY uploaded_at DESC, id DESC LIMIT 1",
                [],
                |r| {
                    Ok(PlanHeader {
                        id: r.get(0)?,
                        uploaded_at: get_datetime(r, 1)?,
                        stand: get_datetime(r, 2)?,
                        active: r.get::<_, i64>(3)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_plans(&self) -> Result<Vec<PlanHeader>, ImportError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uploaded_at, stand, active FROM plans ORDER BY uploaded_at, id",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(PlanHeader {
                    id: r.get(0)?,
                    uploaded_at: get_datetime(r, 1)?,
                    stand: get_datetime(r, 2)?,
                    active: r.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_entry(&self, plan_id: i64, rec: &StandinRecord) -> Result<(), ImportError> {
        self.conn.execute(
            "INSERT INTO plan_entries(
                plan_id, day, hour, time_start, time_end, grade_id, course_id, room,
                supply_teacher_id, supply_subject_id, supply_room, supply_date,
                supply_hour, supply_time_start, supply_time_end, note, flags
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                plan_id,
                rec.day.format(DATE_FMT).to_string(),
                rec.hour,
                rec.time_start.format(TIME_FMT).to_string(),
                rec.time_end.format(TIME_FMT).to_string(),
                &rec.grade_id,
                &rec.course_id,
                &rec.room,
                rec.supply_teacher.as_ref().map(|t| t.id.as_str()),
                rec.supply_subject.as_ref().map(|s| s.id.as_str()),
                rec.supply_room.as_deref(),
                rec.supply_date.map(|d| d.format(DATE_FMT).to_string()),
                rec.supply_hour,
                rec.supply_time_start.map(|t| t.format(TIME_FMT).to_string()),
                rec.supply_time_end.map(|t| t.format(TIME_FMT).to_string()),
                rec.note.as_deref(),
                rec.flags.bits(),
            ],
        )?;
        Ok(())
    }

    /// First `days` distinct days of the plan on or after `from`.
    pub fn next_days(
        &self,
        plan_id: i64,
        from: NaiveDate,
        days: usize,
    ) -> Result<Vec<NaiveDate>, ImportError> {
        let days = days.max(1);
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT day FROM plan_entries
             WHERE plan_id = ? AND day >= ? ORDER BY day LIMIT ?",
        )?;
        let rows = stmt
            .query_map(
                (plan_id, from.format(DATE_FMT).to_string(), days as i64),
                |r| get_date(r, 0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Entries of the given days, ordered by (day, grade code, hour), with
    /// duty-only and flagless entries excluded, ready for grouping.
    pub fn entries_for_view(
        &self,
        plan_id: i64,
        days: &[NaiveDate],
        grades: Option<&[String]>,
    ) -> Result<Vec<StandinRecord>, ImportError> {
        if days.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT pe.day, pe.hour, pe.time_start, pe.time_end,
                    pe.grade_id, g.code, pe.course_id, c.name, pe.room,
                    t.id, t.code, t.first_name, t.last_name,
                    s.id, s.code, s.fullname,
                    pe.supply_room, pe.supply_date, pe.supply_hour,
                    pe.supply_time_start, pe.supply_time_end, pe.note, pe.flags
             FROM plan_entries pe
             JOIN grades g ON g.id = pe.grade_id
             JOIN courses c ON c.id = pe.course_id
             LEFT JOIN teachers t ON t.id = pe.supply_teacher_id
             LEFT JOIN subjects s ON s.id = pe.supply_subject_id
             WHERE pe.plan_id = ? AND pe.flags > 0 AND pe.flags <> ?",
        );

        let mut params: Vec<Value> = vec![
            Value::Integer(plan_id),
            Value::Integer(i64::from(ChangeFlags::DUTY.bits())),
        ];

        sql.push_str(" AND pe.day IN (");
        for (i, d) in days.iter().enumerate() {
            if i > 0 {
                sql.push(',');
            }
            sql.push('?');
            params.push(Value::Text(d.format(DATE_FMT).to_string()));
        }
        sql.push(')');

        if let Some(grades) = grades {
            if !grades.is_empty() {
                sql.push_str(" AND g.code IN (");
                for (i, gcode) in grades.iter().enumerate() {
                    if i > 0 {
                        sql.push(',');
                    }
                    sql.push('?');
                    params.push(Value::Text(gcode.clone()));
                }
                sql.push(')');
            }
        }

        sql.push_str(" ORDER BY pe.day, g.code, pe.hour");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), |r| {
                let supply_teacher = match r.get::<_, Option<String>>(9)? {
                    Some(id) => Some(Teacher {
                        id,
                        code: r.get(10)?,
                        first_name: r.get(11)?,
                        last_name: r.get(12)?,
                    }),
                    None => None,
                };
                let supply_subject = match r.get::<_, Option<String>>(13)? {
                    Some(id) => Some(Subject {
                        id,
                        code: r.get(14)?,
                        fullname: r.get(15)?,
                    }),
                    None => None,
                };
                Ok(StandinRecord {
                    day: get_date(r, 0)?,
                    hour: r.get(1)?,
                    time_start: get_time(r, 2)?,
                    time_end: get_time(r, 3)?,
                    grade_id: r.get(4)?,
                    grade_code: r.get(5)?,
                    course_id: r.get(6)?,
                    course_name: r.get(7)?,
                    room: r.get(8)?,
                    supply_teacher,
                    supply_subject,
                    supply_room: r.get(16)?,
                    supply_date: get_opt_date(r, 17)?,
                    supply_hour: r.get(18)?,
                    supply_time_start: get_opt_time(r, 19)?,
                    supply_time_end: get_opt_time(r, 20)?,
                    note: r.get(21)?,
                    flags: ChangeFlags::from_bits(r.get::<_, i64>(22)? as u16),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn entry_count(&self, plan_id: i64) -> Result<usize, ImportError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM plan_entries WHERE plan_id = ?",
            [plan_id],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}
