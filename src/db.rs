use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("standin.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_schema(&conn)?;
    Ok(conn)
}

pub fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    // Reference entities keep the UUID string ids of the export file.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            first_name TEXT,
            last_name TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            fullname TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS divisions(
            id TEXT PRIMARY KEY,
            code TEXT,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_years(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            school_year_id INTEGER NOT NULL,
            teacher_id TEXT,
            subject_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_year_id) REFERENCES school_years(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            school_year_id INTEGER NOT NULL,
            code TEXT NOT NULL,
            division_id TEXT,
            UNIQUE(school_year_id, code),
            FOREIGN KEY(school_year_id) REFERENCES school_years(id),
            FOREIGN KEY(division_id) REFERENCES divisions(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS plans(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uploaded_at TEXT NOT NULL,
            stand TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS plan_entries(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            plan_id INTEGER NOT NULL,
            day TEXT NOT NULL,
            hour INTEGER,
            time_start TEXT NOT NULL,
            time_end TEXT NOT NULL,
            grade_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            room TEXT NOT NULL,
            supply_teacher_id TEXT,
            supply_subject_id TEXT,
            supply_room TEXT,
            supply_date TEXT,
            supply_hour INTEGER,
            supply_time_start TEXT,
            supply_time_end TEXT,
            note TEXT,
            flags INTEGER NOT NULL,
            FOREIGN KEY(plan_id) REFERENCES plans(id),
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(supply_teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(supply_subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_plan_entries_plan_day ON plan_entries(plan_id, day)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_plan_entries_grade ON plan_entries(grade_id)",
        [],
    )?;

    Ok(())
}
