use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};

use super::models::{
    Certificate, Enrollment, EnrollmentStatus, Lesson, Quiz, QuizAttempt, QuizQuestion,
};
use super::{CertificateStore, ContentRepository, EnrollmentStore, QuizAttemptStore};
use crate::error::{EngineError, EngineResult};

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {:?}: {}", raw, e))
}

/// Engine collaborators backed by the workspace database.
pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

struct EnrollmentRow {
    id: String,
    student_id: String,
    course_id: String,
    completed_json: String,
    progress: f64,
    status: String,
    enrolled_at: String,
    completed_at: Option<String>,
}

impl EnrollmentRow {
    fn read(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            student_id: r.get(1)?,
            course_id: r.get(2)?,
            completed_json: r.get(3)?,
            progress: r.get(4)?,
            status: r.get(5)?,
            enrolled_at: r.get(6)?,
            completed_at: r.get(7)?,
        })
    }

    fn decode(self) -> Result<Enrollment, EngineError> {
        let corrupt = |id: &str, reason: String| EngineError::Corrupt {
            id: id.to_string(),
            reason,
        };
        let completed_lessons: Vec<String> = serde_json::from_str(&self.completed_json)
            .map_err(|e| corrupt(&self.id, format!("completed_lessons: {}", e)))?;
        let status = EnrollmentStatus::parse(&self.status)
            .ok_or_else(|| corrupt(&self.id, format!("unknown status {:?}", self.status)))?;
        let enrolled_at = parse_ts(&self.enrolled_at).map_err(|e| corrupt(&self.id, e))?;
        let completed_at = match self.completed_at.as_deref() {
            None => None,
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(parse_ts(raw).map_err(|e| corrupt(&self.id, e))?),
        };
        Ok(Enrollment {
            enrollment_id: self.id,
            student_id: self.student_id,
            course_id: self.course_id,
            completed_lessons,
            progress: self.progress,
            status,
            enrolled_at,
            completed_at,
        })
    }
}

const ENROLLMENT_COLUMNS: &str =
    "id, student_id, course_id, completed_lessons, progress, status, enrolled_at, completed_at";

struct CertificateRow {
    id: String,
    student_id: String,
    course_id: String,
    template_id: String,
    issued_by: String,
    issued_at: String,
}

fn read_certificate(r: &rusqlite::Row<'_>) -> rusqlite::Result<CertificateRow> {
    Ok(CertificateRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        course_id: r.get(2)?,
        template_id: r.get(3)?,
        issued_by: r.get(4)?,
        issued_at: r.get(5)?,
    })
}

fn finish_certificate(row: CertificateRow) -> EngineResult<Certificate> {
    let issued_at = parse_ts(&row.issued_at).map_err(|reason| EngineError::Corrupt {
        id: row.id.clone(),
        reason,
    })?;
    Ok(Certificate {
        certificate_id: row.id,
        student_id: row.student_id,
        course_id: row.course_id,
        template_id: row.template_id,
        issued_by: row.issued_by,
        issued_at,
    })
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn quiz(&self, quiz_id: &str) -> EngineResult<Option<Quiz>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, course_id, title, questions_json, attempts_allowed, pass_mark, auto_grade
                 FROM quizzes
                 WHERE id = ?",
                [quiz_id],
                read_quiz_row,
            )
            .optional()?;
        Ok(row.map(decode_quiz_row))
    }

    pub fn attempt_count(&self, quiz_id: &str, student_id: &str) -> EngineResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM quiz_attempts WHERE quiz_id = ? AND student_id = ?",
            (quiz_id, student_id),
            |r| r.get(0),
        )?)
    }

    pub fn insert_attempt(&self, attempt: &QuizAttempt) -> EngineResult<()> {
        let answers_json = serde_json::to_string(&attempt.answers)?;
        self.conn.execute(
            "INSERT INTO quiz_attempts(id, quiz_id, student_id, answers_json, score, passed, attempted_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            params![
                attempt.attempt_id,
                attempt.quiz_id,
                attempt.student_id,
                answers_json,
                attempt.score,
                attempt.passed as i64,
                format_ts(attempt.attempted_at),
            ],
        )?;
        Ok(())
    }

    pub fn list_certificates(&self, student_id: Option<&str>) -> EngineResult<Vec<Certificate>> {
        let mut sql = String::from(
            "SELECT id, student_id, course_id, template_id, issued_by, issued_at FROM certificates",
        );
        let mut bind: Vec<Value> = Vec::new();
        if let Some(sid) = student_id {
            sql.push_str(" WHERE student_id = ?");
            bind.push(Value::Text(sid.to_string()));
        }
        sql.push_str(" ORDER BY issued_at, id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind), read_certificate)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(finish_certificate).collect()
    }

    pub fn template_exists(&self, template_id: &str) -> EngineResult<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM certificate_templates WHERE id = ?",
                [template_id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }
}

type QuizRow = (String, String, String, String, i64, f64, i64);

fn read_quiz_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<QuizRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
    ))
}

fn decode_quiz_row(row: QuizRow) -> Quiz {
    let (quiz_id, course_id, title, questions_json, attempts_allowed, pass_mark, auto_grade) = row;
    let questions: Vec<QuizQuestion> = match serde_json::from_str(&questions_json) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(quiz_id = %quiz_id, error = %e, "unreadable quiz questions, treating as empty");
            Vec::new()
        }
    };
    Quiz {
        quiz_id,
        course_id,
        title,
        questions,
        attempts_allowed,
        pass_mark,
        auto_grade: auto_grade != 0,
    }
}

impl ContentRepository for SqliteStore<'_> {
    fn course_exists(&self, course_id: &str) -> EngineResult<bool> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?
            .is_some())
    }

    fn lesson_count(&self, course_id: &str) -> EngineResult<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM lessons WHERE course_id = ?",
            [course_id],
            |r| r.get(0),
        )?;
        Ok(n.max(0) as usize)
    }

    fn lesson_ids_of(&self, course_id: &str) -> EngineResult<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM lessons WHERE course_id = ?")?;
        let ids = stmt
            .query_map([course_id], |r| r.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    fn lesson(&self, lesson_id: &str) -> EngineResult<Option<Lesson>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, module_id, course_id, title, sort_order FROM lessons WHERE id = ?",
                [lesson_id],
                |r| {
                    Ok(Lesson {
                        lesson_id: r.get(0)?,
                        module_id: r.get(1)?,
                        course_id: r.get(2)?,
                        title: r.get(3)?,
                        sort_order: r.get(4)?,
                    })
                },
            )
            .optional()?)
    }

    fn quizzes_of(&self, course_id: &str) -> EngineResult<Vec<Quiz>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, course_id, title, questions_json, attempts_allowed, pass_mark, auto_grade
             FROM quizzes
             WHERE course_id = ?
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([course_id], read_quiz_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().map(decode_quiz_row).collect())
    }
}

impl SqliteStore<'_> {
    fn query_enrollments(
        &self,
        student_id: Option<&str>,
        course_id: Option<&str>,
    ) -> EngineResult<Vec<EnrollmentRow>> {
        let mut sql = format!("SELECT {} FROM enrollments", ENROLLMENT_COLUMNS);
        let mut clauses: Vec<&str> = Vec::new();
        let mut bind: Vec<Value> = Vec::new();
        if let Some(sid) = student_id {
            clauses.push("student_id = ?");
            bind.push(Value::Text(sid.to_string()));
        }
        if let Some(cid) = course_id {
            clauses.push("course_id = ?");
            bind.push(Value::Text(cid.to_string()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY enrolled_at, id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind), EnrollmentRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl EnrollmentStore for SqliteStore<'_> {
    fn find_enrollments(
        &self,
        student_id: Option<&str>,
        course_id: Option<&str>,
    ) -> EngineResult<Vec<Enrollment>> {
        let rows = self.query_enrollments(student_id, course_id)?;
        // A single bad row must not hide the rest of the student's or course's records.
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match row.decode() {
                Ok(e) => out.push(e),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable enrollment"),
            }
        }
        Ok(out)
    }

    fn student_enrollments(&self, student_id: &str) -> EngineResult<Vec<Enrollment>> {
        self.query_enrollments(Some(student_id), None)?
            .into_iter()
            .map(EnrollmentRow::decode)
            .collect()
    }

    fn get_enrollment(&self, enrollment_id: &str) -> EngineResult<Option<Enrollment>> {
        let sql = format!("SELECT {} FROM enrollments WHERE id = ?", ENROLLMENT_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, [enrollment_id], EnrollmentRow::read)
            .optional()?;
        row.map(EnrollmentRow::decode).transpose()
    }

    fn upsert_enrollment(&self, e: &Enrollment) -> EngineResult<()> {
        let completed_json = serde_json::to_string(&e.completed_lessons)?;
        self.conn.execute(
            "INSERT INTO enrollments(id, student_id, course_id, completed_lessons, progress, status, enrolled_at, completed_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                completed_lessons = excluded.completed_lessons,
                progress = excluded.progress,
                status = excluded.status,
                completed_at = excluded.completed_at",
            params![
                e.enrollment_id,
                e.student_id,
                e.course_id,
                completed_json,
                e.progress,
                e.status.as_str(),
                format_ts(e.enrolled_at),
                e.completed_at.map(format_ts),
            ],
        )?;
        Ok(())
    }

    fn delete_enrollment(&self, enrollment_id: &str) -> EngineResult<bool> {
        let n = self
            .conn
            .execute("DELETE FROM enrollments WHERE id = ?", [enrollment_id])?;
        Ok(n > 0)
    }
}

impl CertificateStore for SqliteStore<'_> {
    fn find_certificate(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> EngineResult<Option<Certificate>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, student_id, course_id, template_id, issued_by, issued_at
                 FROM certificates
                 WHERE student_id = ? AND course_id = ?",
                (student_id, course_id),
                read_certificate,
            )
            .optional()?;
        row.map(finish_certificate).transpose()
    }

    fn insert_certificate(&self, c: &Certificate) -> EngineResult<()> {
        let n = self.conn.execute(
            "INSERT INTO certificates(id, student_id, course_id, template_id, issued_by, issued_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, course_id) DO NOTHING",
            params![
                c.certificate_id,
                c.student_id,
                c.course_id,
                c.template_id,
                c.issued_by,
                format_ts(c.issued_at),
            ],
        )?;
        if n == 0 {
            tracing::debug!(
                student_id = %c.student_id,
                course_id = %c.course_id,
                "certificate already present, insert ignored"
            );
        }
        Ok(())
    }
}

impl QuizAttemptStore for SqliteStore<'_> {
    fn best_score(&self, quiz_id: &str, student_id: &str) -> EngineResult<Option<f64>> {
        Ok(self.conn.query_row(
            "SELECT MAX(score) FROM quiz_attempts WHERE quiz_id = ? AND student_id = ?",
            (quiz_id, student_id),
            |r| r.get::<_, Option<f64>>(0),
        )?)
    }
}
