use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;

pub const DEFAULT_DB_FILE_NAME: &str = "coursed.sqlite3";

pub fn open_db(workspace: &Path, file_name: &str) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(file_name);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    migrate(&conn)?;
    tracing::debug!(path = %db_path.display(), "workspace database ready");
    Ok(conn)
}

pub fn migrate(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            certificate_enabled INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS modules(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            title TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_modules_course ON modules(course_id)",
        [],
    )?;

    // course_id is denormalized from the module so lesson counts per course
    // stay a single indexed lookup.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            module_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            title TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(module_id) REFERENCES modules(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_course ON lessons(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_module ON lessons(module_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quizzes(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            title TEXT NOT NULL,
            questions_json TEXT NOT NULL,
            attempts_allowed INTEGER NOT NULL DEFAULT 3,
            pass_mark REAL NOT NULL DEFAULT 70,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    ensure_quizzes_auto_grade(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quizzes_course ON quizzes(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_attempts(
            id TEXT PRIMARY KEY,
            quiz_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            answers_json TEXT NOT NULL,
            score REAL NOT NULL,
            passed INTEGER NOT NULL,
            attempted_at TEXT NOT NULL,
            FOREIGN KEY(quiz_id) REFERENCES quizzes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_attempts_quiz_student ON quiz_attempts(quiz_id, student_id)",
        [],
    )?;

    // No foreign key to courses: enrollments outlive a deleted course and
    // keep their frozen progress.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            completed_lessons TEXT NOT NULL DEFAULT '[]',
            progress REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            enrolled_at TEXT NOT NULL,
            UNIQUE(student_id, course_id)
        )",
        [],
    )?;
    ensure_enrollments_completed_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS certificate_templates(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            course_id TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS certificates(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            template_id TEXT NOT NULL DEFAULT '',
            issued_by TEXT NOT NULL,
            issued_at TEXT NOT NULL,
            UNIQUE(student_id, course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_certificates_student ON certificates(student_id)",
        [],
    )?;

    // Rows edited outside the sidecar can carry a status that disagrees with progress.
    heal_enrollment_statuses(conn)?;

    Ok(())
}

fn ensure_quizzes_auto_grade(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "quizzes", "auto_grade")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE quizzes ADD COLUMN auto_grade INTEGER NOT NULL DEFAULT 1",
        [],
    )?;
    Ok(())
}

fn ensure_enrollments_completed_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "enrollments", "completed_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE enrollments ADD COLUMN completed_at TEXT", [])?;
    Ok(())
}

fn heal_enrollment_statuses(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE enrollments SET status = 'active', completed_at = NULL
         WHERE status = 'completed' AND progress < 100",
        [],
    )?;
    conn.execute(
        "UPDATE enrollments
         SET status = 'completed',
             completed_at = COALESCE(completed_at, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
         WHERE status <> 'completed' AND progress >= 100",
        [],
    )?;
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
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
