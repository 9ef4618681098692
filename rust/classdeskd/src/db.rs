use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "classdesk.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            subject TEXT NOT NULL DEFAULT '',
            room TEXT NOT NULL DEFAULT '',
            grade_level TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL DEFAULT '',
            grade_level TEXT NOT NULL DEFAULT '',
            guardian_name TEXT NOT NULL DEFAULT '',
            guardian_phone TEXT NOT NULL DEFAULT '',
            guardian_email TEXT NOT NULL DEFAULT '',
            enrollment_date TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_last_name ON students(last_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_students(
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(class_id, student_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_students_student ON class_students(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            date TEXT NOT NULL,
            max_score REAL NOT NULL CHECK(max_score > 0),
            exam_type TEXT NOT NULL,
            is_published INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_class ON exams(class_id)",
        [],
    )?;

    // `score` is the working value; `published_score` is what guardians see
    // and only changes on publish. `is_published` is clear while they differ.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_entries(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            exam_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            score REAL,
            letter_grade TEXT,
            published_score REAL,
            is_published INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(student_id, exam_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_entries_exam ON grade_entries(exam_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_entries_student ON grade_entries(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            note TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(student_id, class_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date
         ON attendance_records(class_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance_records(student_id)",
        [],
    )?;

    // Append-only: nothing in the sidecar updates or deletes notes.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_notes(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_notes_student ON teacher_notes(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            parent_name TEXT NOT NULL,
            subject TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            last_message_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS message_items(
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL,
            sender_name TEXT NOT NULL,
            content TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            is_from_teacher INTEGER NOT NULL,
            FOREIGN KEY(message_id) REFERENCES messages(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_student ON messages(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_message_items_message ON message_items(message_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS action_items(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            item_type TEXT NOT NULL,
            priority TEXT NOT NULL,
            link TEXT NOT NULL DEFAULT '',
            is_completed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_action_items_open
         ON action_items(is_completed, created_at)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
pub fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_schema(&conn).expect("init schema");
    conn
}
