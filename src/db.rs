use rusqlite::Connection;
use std::path::Path;

/// Default full marks for a co-curricular or optional subject when the
/// administrator has not set an override.
pub const DEFAULT_ELECTIVE_FULL_MARKS: f64 = 50.0;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("school.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(class_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_class ON sections(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('regular','cocurricular','optional')),
            full_marks REAL NOT NULL DEFAULT 50,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(class_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            section_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            roll_no TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(section_id) REFERENCES sections(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_cohort
         ON students(session_id, class_id, section_id, sort_order)",
        [],
    )?;

    // Class-level defaults for the six regular term components
    // (summative + formative per term). Per-record values are
    // authoritative once a result row exists.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks_distribution(
            class_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            first_summative_full REAL NOT NULL DEFAULT 40,
            first_formative_full REAL NOT NULL DEFAULT 10,
            second_summative_full REAL NOT NULL DEFAULT 40,
            second_formative_full REAL NOT NULL DEFAULT 10,
            third_summative_full REAL NOT NULL DEFAULT 40,
            third_formative_full REAL NOT NULL DEFAULT 10,
            PRIMARY KEY(class_id, session_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            first_summative_obtained REAL NOT NULL DEFAULT 0,
            first_summative_full REAL NOT NULL DEFAULT 0,
            first_formative_obtained REAL NOT NULL DEFAULT 0,
            first_formative_full REAL NOT NULL DEFAULT 0,
            second_summative_obtained REAL NOT NULL DEFAULT 0,
            second_summative_full REAL NOT NULL DEFAULT 0,
            second_formative_obtained REAL NOT NULL DEFAULT 0,
            second_formative_full REAL NOT NULL DEFAULT 0,
            third_summative_obtained REAL NOT NULL DEFAULT 0,
            third_summative_full REAL NOT NULL DEFAULT 0,
            third_formative_obtained REAL NOT NULL DEFAULT 0,
            third_formative_full REAL NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            UNIQUE(student_id, subject_id, session_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_results_student ON subject_results(student_id)",
        [],
    )?;

    // Per-term cells keep the legacy dual representation: a numeric mark or
    // a letter grade, never both. Reconciliation happens in calc.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cocurricular_results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            first_term_marks REAL,
            first_term_grade TEXT,
            second_term_marks REAL,
            second_term_grade TEXT,
            final_term_marks REAL,
            final_term_grade TEXT,
            full_marks REAL NOT NULL DEFAULT 50,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            UNIQUE(student_id, subject_id, session_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cocurricular_results_student
         ON cocurricular_results(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS optional_results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            obtained_marks REAL NOT NULL DEFAULT 0,
            full_marks REAL NOT NULL DEFAULT 50,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            UNIQUE(student_id, subject_id, session_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_optional_results_student ON optional_results(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_settings(
            session_id TEXT PRIMARY KEY,
            total_school_days INTEGER,
            FOREIGN KEY(session_id) REFERENCES sessions(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_heads(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            name TEXT NOT NULL,
            amount REAL NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            UNIQUE(class_id, session_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_payments(
            id TEXT PRIMARY KEY,
            fee_head_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            amount REAL NOT NULL,
            method TEXT,
            paid_on TEXT NOT NULL,
            FOREIGN KEY(fee_head_id) REFERENCES fee_heads(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_payments_student ON fee_payments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_payments_head ON fee_payments(fee_head_id)",
        [],
    )?;

    // Existing workspaces may predate the school-days column split.
    ensure_school_settings_days(&conn)?;

    Ok(conn)
}

fn ensure_school_settings_days(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "school_settings", "total_school_days")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE school_settings ADD COLUMN total_school_days INTEGER",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
