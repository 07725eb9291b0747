//! The seam between result reconciliation and persistence.
//!
//! Reconciliation only needs two point lookups and one batch insert; the
//! workspace database implements them for `rusqlite::Connection`, tests use
//! an in-memory double.

use crate::db;
use crate::grading;
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness or foreign-key constraint rejected the write.
    #[error("{0}")]
    Constraint(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// One row handed to the ledger; `semester` comes from the caller, not the CSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLedgerEntry {
    pub student_id: String,
    pub course_id: String,
    pub ca_score: i64,
    pub exam_score: i64,
    pub total_score: i64,
    pub session: String,
    pub semester: String,
}

pub trait ResultStore {
    fn find_student_id(&self, matric_number: &str) -> Result<Option<String>, StoreError>;
    fn find_course_id(&self, course_code: &str) -> Result<Option<String>, StoreError>;
    /// Inserts every entry or none of them.
    fn insert_results(&self, entries: &[ResultLedgerEntry]) -> Result<usize, StoreError>;
}

impl ResultStore for Connection {
    fn find_student_id(&self, matric_number: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .query_row(
                "SELECT id FROM students WHERE matric_number = ?",
                [matric_number],
                |r| r.get(0),
            )
            .optional()?)
    }

    fn find_course_id(&self, course_code: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .query_row("SELECT id FROM courses WHERE code = ?", [course_code], |r| {
                r.get(0)
            })
            .optional()?)
    }

    fn insert_results(&self, entries: &[ResultLedgerEntry]) -> Result<usize, StoreError> {
        if !self.is_autocommit() {
            // The caller's transaction already makes the batch atomic.
            return insert_rows(self, entries);
        }
        let tx = self.unchecked_transaction()?;
        let inserted = insert_rows(&tx, entries)?;
        // Dropping `tx` on an early return rolls the whole batch back.
        tx.commit()?;
        Ok(inserted)
    }
}

fn insert_rows(conn: &Connection, entries: &[ResultLedgerEntry]) -> Result<usize, StoreError> {
    let now = db::now_timestamp();
    let mut stmt = conn.prepare(
        "INSERT INTO results(
           id, student_id, course_id, ca_score, exam_score, total_score,
           grade, grade_point, session, semester, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for e in entries {
        let grade = grading::classify(e.total_score);
        stmt.execute((
            Uuid::new_v4().to_string(),
            &e.student_id,
            &e.course_id,
            e.ca_score,
            e.exam_score,
            e.total_score,
            grade.letter.to_string(),
            i64::from(grade.point),
            &e.session,
            &e.semester,
            &now,
        ))
        .map_err(constraint_or_sqlite)?;
    }
    Ok(entries.len())
}

fn constraint_or_sqlite(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(code, msg)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            let detail = msg.unwrap_or_else(|| "constraint violation".to_string());
            if detail.contains("UNIQUE") {
                StoreError::Constraint(format!(
                    "duplicate result for the same student, course and session ({detail})"
                ))
            } else {
                StoreError::Constraint(detail)
            }
        }
        other => StoreError::Sqlite(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(conn: &Connection) {
        conn.execute(
            "INSERT INTO students(id, matric_number, email, first_name, last_name, level,
               department, faculty, pin_hash, created_at)
             VALUES('s1', 'ND/CS/2024/001', 'a@x.ng', 'Ada', 'Obi', 'ND1', 'CS', 'ICT', 'x', 't')",
            [],
        )
        .expect("student");
        conn.execute(
            "INSERT INTO courses(id, code, title, credit_hours, level, semester)
             VALUES('c1', 'CSC101', 'Intro', 3, 'ND1', 'First')",
            [],
        )
        .expect("course");
    }

    fn entry(total: i64) -> ResultLedgerEntry {
        ResultLedgerEntry {
            student_id: "s1".into(),
            course_id: "c1".into(),
            ca_score: 20,
            exam_score: total - 20,
            total_score: total,
            session: "2024/2025".into(),
            semester: "First".into(),
        }
    }

    #[test]
    fn lookups_are_exact_matches() {
        let conn = db::open_in_memory().expect("open");
        seed(&conn);
        assert_eq!(
            conn.find_student_id("ND/CS/2024/001").expect("lookup"),
            Some("s1".to_string())
        );
        assert_eq!(conn.find_student_id("nd/cs/2024/001").expect("lookup"), None);
        assert_eq!(conn.find_course_id("CSC101").expect("lookup"), Some("c1".into()));
        assert_eq!(conn.find_course_id("CSC 101").expect("lookup"), None);
    }

    #[test]
    fn insert_derives_grade_and_point() {
        let conn = db::open_in_memory().expect("open");
        seed(&conn);
        assert_eq!(conn.insert_results(&[entry(65)]).expect("insert"), 1);
        let (grade, point): (String, i64) = conn
            .query_row("SELECT grade, grade_point FROM results", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .expect("row");
        assert_eq!(grade, "B");
        assert_eq!(point, 4);
    }

    #[test]
    fn duplicate_in_batch_rolls_back_everything() {
        let conn = db::open_in_memory().expect("open");
        seed(&conn);
        let e = conn
            .insert_results(&[entry(65), entry(70)])
            .expect_err("duplicate must fail");
        assert!(matches!(e, StoreError::Constraint(_)), "{e:?}");
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM results", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 0);
    }

    #[test]
    fn insert_joins_an_open_transaction() {
        let conn = db::open_in_memory().expect("open");
        seed(&conn);
        let tx = conn.unchecked_transaction().expect("begin");
        assert_eq!(tx.insert_results(&[entry(65)]).expect("insert"), 1);
        drop(tx);
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM results", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 0);
    }
}
