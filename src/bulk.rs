//! Bulk result upload: CSV rows in, validated and resolved results out.
//!
//! Rows are processed strictly in input order, one at a time. A bad row is
//! recorded with its reason and never stops the rows after it.

use crate::grading;
use crate::store::{ResultLedgerEntry, ResultStore, StoreError};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

pub const CA_MAX: i64 = 30;
pub const EXAM_MAX: i64 = 70;

pub const MSG_CA_RANGE: &str = "CA score must be between 0 and 30";
pub const MSG_EXAM_RANGE: &str = "Exam score must be between 0 and 70";
pub const MSG_CA_NOT_NUMBER: &str = "CA score must be a whole number";
pub const MSG_EXAM_NOT_NUMBER: &str = "Exam score must be a whole number";
pub const MSG_STUDENT_NOT_FOUND: &str = "Student not found";
pub const MSG_COURSE_NOT_FOUND: &str = "Course not found";

pub const TEMPLATE_FILE_NAME: &str = "results_template.csv";
const COLUMNS: [&str; 5] = [
    "matric_number",
    "course_code",
    "ca_score",
    "exam_score",
    "session",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CsvError {
    #[error("file is empty")]
    Empty,
    #[error("missing column {0}")]
    MissingColumn(&'static str),
    #[error("unterminated quoted field on line {0}")]
    UnterminatedQuote(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResultRow {
    /// 1-based line in the source file.
    pub line: usize,
    pub matric_number: String,
    pub course_code: String,
    pub ca_score: String,
    pub exam_score: String,
    pub session: String,
}

/// How unparseable score cells are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreParsing {
    /// Non-numeric or blank scores count as 0.
    Permissive,
    /// Non-numeric or blank scores are a row error.
    Strict,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub score_parsing: ScoreParsing,
    pub default_session: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Valid,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedResult {
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    pub matric_number: String,
    pub course_code: String,
    pub ca_score: i64,
    pub exam_score: i64,
    pub total_score: i64,
    pub session: String,
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<&'static str>,
}

impl ProcessedResult {
    fn fail(&mut self, message: &'static str) {
        self.status = RowStatus::Error;
        self.error_message = Some(message);
    }

    pub fn is_valid(&self) -> bool {
        self.status == RowStatus::Valid
    }

    /// Letter grade for a valid row; error rows may carry out-of-range totals.
    pub fn grade(&self) -> Option<char> {
        self.is_valid()
            .then(|| grading::classify(self.total_score).letter)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub all: Vec<ProcessedResult>,
    pub valid: Vec<ProcessedResult>,
    pub errors: Vec<ProcessedResult>,
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("no valid rows to save")]
    NoValidRows,
    #[error("line {line} is marked valid but was never resolved")]
    Unresolved { line: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn parse_csv_record(line: &str) -> Option<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                buf.push('"');
                chars.next();
                continue;
            }
            in_quotes = !in_quotes;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(std::mem::take(&mut buf));
            continue;
        }
        buf.push(ch);
    }
    if in_quotes {
        return None;
    }
    out.push(buf);
    Some(out)
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Parses upload text into raw rows.
///
/// Headers are matched exactly. Rows with an empty matric number, course
/// code, CA score or exam score are dropped here without being reported.
pub fn parse_rows(text: &str) -> Result<Vec<RawResultRow>, CsvError> {
    let mut lines = text.lines().enumerate();
    let header_line = loop {
        match lines.next() {
            Some((_, l)) if l.trim().is_empty() => continue,
            Some((i, l)) => break (i, l),
            None => return Err(CsvError::Empty),
        }
    };
    let header = header_line.1.strip_prefix('\u{feff}').unwrap_or(header_line.1);
    let fields =
        parse_csv_record(header).ok_or(CsvError::UnterminatedQuote(header_line.0 + 1))?;
    let mut idx = HashMap::<&str, usize>::new();
    for (i, f) in fields.iter().enumerate() {
        if let Some(col) = COLUMNS.iter().find(|c| **c == f.as_str()) {
            idx.entry(*col).or_insert(i);
        }
    }
    let col = |name: &'static str| idx.get(name).copied().ok_or(CsvError::MissingColumn(name));
    let matric_col = col("matric_number")?;
    let course_col = col("course_code")?;
    let ca_col = col("ca_score")?;
    let exam_col = col("exam_score")?;
    let session_col = idx.get("session").copied();

    let mut rows = Vec::new();
    for (i, raw_line) in lines {
        if raw_line.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_record(raw_line).ok_or(CsvError::UnterminatedQuote(i + 1))?;
        let get = |c: usize| fields.get(c).cloned().unwrap_or_default();
        let row = RawResultRow {
            line: i + 1,
            matric_number: get(matric_col),
            course_code: get(course_col),
            ca_score: get(ca_col),
            exam_score: get(exam_col),
            session: session_col.map(get).unwrap_or_default(),
        };
        if row.matric_number.is_empty()
            || row.course_code.is_empty()
            || row.ca_score.is_empty()
            || row.exam_score.is_empty()
        {
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Leading-integer parse: optional whitespace and sign, then digits.
/// `"20.7"` gives 20, `"abc"` gives None.
pub fn parse_int_prefix(s: &str) -> Option<i64> {
    let t = s.trim_start();
    let (negative, digits) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    // All-digit input only fails to parse on overflow.
    let n: i64 = digits[..end].parse().unwrap_or(i64::MAX);
    Some(if negative { -n } else { n })
}

/// Range checks only; reference lookups happen in [`resolve_references`].
pub fn validate_row(row: &RawResultRow, opts: &ReconcileOptions) -> ProcessedResult {
    let ca = parse_int_prefix(&row.ca_score);
    let exam = parse_int_prefix(&row.exam_score);
    let ca_score = ca.unwrap_or(0);
    let exam_score = exam.unwrap_or(0);
    let session = match row.session.trim() {
        "" => opts.default_session.clone(),
        s => s.to_string(),
    };

    let mut result = ProcessedResult {
        line: row.line,
        student_id: None,
        course_id: None,
        matric_number: row.matric_number.trim().to_string(),
        course_code: row.course_code.trim().to_string(),
        ca_score,
        exam_score,
        total_score: ca_score.saturating_add(exam_score),
        session,
        status: RowStatus::Valid,
        error_message: None,
    };

    if opts.score_parsing == ScoreParsing::Strict && ca.is_none() {
        result.fail(MSG_CA_NOT_NUMBER);
    } else if opts.score_parsing == ScoreParsing::Strict && exam.is_none() {
        result.fail(MSG_EXAM_NOT_NUMBER);
    } else if let Some(msg) = score_range_error(ca_score, exam_score) {
        result.fail(msg);
    }
    result
}

/// CA is checked before exam.
pub fn score_range_error(ca_score: i64, exam_score: i64) -> Option<&'static str> {
    if !(0..=CA_MAX).contains(&ca_score) {
        Some(MSG_CA_RANGE)
    } else if !(0..=EXAM_MAX).contains(&exam_score) {
        Some(MSG_EXAM_RANGE)
    } else {
        None
    }
}

/// Student lookup gates the course lookup.
pub fn resolve_references<S: ResultStore + ?Sized>(result: &mut ProcessedResult, store: &S) {
    let student = store.find_student_id(&result.matric_number).unwrap_or_else(|e| {
        tracing::warn!(line = result.line, error = %e, "student lookup failed");
        None
    });
    let Some(student_id) = student else {
        result.fail(MSG_STUDENT_NOT_FOUND);
        return;
    };
    result.student_id = Some(student_id);

    let course = store.find_course_id(&result.course_code).unwrap_or_else(|e| {
        tracing::warn!(line = result.line, error = %e, "course lookup failed");
        None
    });
    match course {
        Some(course_id) => result.course_id = Some(course_id),
        None => result.fail(MSG_COURSE_NOT_FOUND),
    }
}

pub fn reconcile<S: ResultStore + ?Sized>(
    rows: &[RawResultRow],
    store: &S,
    opts: &ReconcileOptions,
) -> Reconciliation {
    let mut all = Vec::with_capacity(rows.len());
    for row in rows {
        let mut result = validate_row(row, opts);
        if result.is_valid() {
            resolve_references(&mut result, store);
        }
        all.push(result);
    }
    let (valid, errors): (Vec<_>, Vec<_>) = all.iter().cloned().partition(|r| r.is_valid());
    tracing::debug!(
        rows = all.len(),
        valid = valid.len(),
        errors = errors.len(),
        "bulk upload reconciled"
    );
    Reconciliation { all, valid, errors }
}

/// Inserts the valid rows as one batch. The reconciliation is left as-is on
/// failure so the caller can retry.
pub fn commit<S: ResultStore + ?Sized>(
    rec: &Reconciliation,
    store: &S,
    semester: &str,
) -> Result<usize, CommitError> {
    if rec.valid.is_empty() {
        return Err(CommitError::NoValidRows);
    }
    let mut entries = Vec::with_capacity(rec.valid.len());
    for r in &rec.valid {
        let (Some(student_id), Some(course_id)) = (&r.student_id, &r.course_id) else {
            return Err(CommitError::Unresolved { line: r.line });
        };
        entries.push(ResultLedgerEntry {
            student_id: student_id.clone(),
            course_id: course_id.clone(),
            ca_score: r.ca_score,
            exam_score: r.exam_score,
            total_score: r.total_score,
            session: r.session.clone(),
            semester: semester.to_string(),
        });
    }
    Ok(store.insert_results(&entries)?)
}

pub fn template_csv() -> String {
    let rows = [
        ["ND/CS/2024/001", "CSC101", "20", "45", "2024/2025"],
        ["ND/CS/2024/002", "CSC101", "25", "50", "2024/2025"],
    ];
    let mut out = COLUMNS.join(",");
    out.push('\n');
    for r in rows {
        out.push_str(
            &r.iter()
                .map(|f| csv_quote(f))
                .collect::<Vec<_>>()
                .join(","),
        );
        out.push('\n');
    }
    out
}
