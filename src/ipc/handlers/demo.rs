//! `setup.seedDemo`: a ready-to-explore workspace with one admin, a paid ND1
//! student, an unpaid ND2 student, both levels' courses, graded results and
//! announcements.
//!
//! Everything is written through the regular handlers inside one
//! transaction, so a failure (for instance a second seeding) leaves the
//! workspace unchanged.

use crate::auth;
use crate::ipc::handlers::announcements::announcements_create;
use crate::ipc::handlers::auth::NewAdmin;
use crate::ipc::handlers::courses::courses_create;
use crate::ipc::handlers::fees::fees_record;
use crate::ipc::handlers::results::results_save;
use crate::ipc::handlers::students::students_create;
use crate::ipc::helpers::{require_db, respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::session::{AdminRole, AdminSession, SessionContext};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;

const DEMO_ADMIN_EMAIL: &str = "demo.admin@plasu.edu.ng";
const DEMO_ADMIN_PASSWORD: &str = "demo123";
const DEMO_STUDENT_PIN: &str = "2233";

struct DemoStudent {
    matric_number: &'static str,
    first_name: &'static str,
    last_name: &'static str,
    email: &'static str,
    phone: &'static str,
    level: &'static str,
}

const STUDENTS: [DemoStudent; 2] = [
    DemoStudent {
        matric_number: "PLASU/CS/ND1/2024/001",
        first_name: "John Emeka",
        last_name: "Doe",
        email: "john.doe@student.plasu.edu.ng",
        phone: "08123456789",
        level: "ND1",
    },
    DemoStudent {
        matric_number: "PLASU/CS/ND2/2023/002",
        first_name: "Sarah Kemi",
        last_name: "Johnson",
        email: "sarah.johnson@student.plasu.edu.ng",
        phone: "08198765432",
        level: "ND2",
    },
];

/// `(code, title, credit hours, level, semester)`
const COURSES: [(&str, &str, i64, &str, &str); 12] = [
    ("CSC101", "Introduction to Computer Science", 3, "ND1", "First"),
    ("CSC102", "Computer Programming I", 4, "ND1", "First"),
    ("MTH101", "General Mathematics I", 3, "ND1", "First"),
    ("CSC103", "Computer Programming II", 4, "ND1", "Second"),
    ("CSC104", "Data Structures", 3, "ND1", "Second"),
    ("MTH102", "General Mathematics II", 3, "ND1", "Second"),
    ("CSC201", "Database Management Systems", 4, "ND2", "First"),
    ("CSC202", "Web Technologies", 3, "ND2", "First"),
    ("CSC203", "Operating Systems", 3, "ND2", "First"),
    ("CSC204", "Software Engineering", 4, "ND2", "Second"),
    ("CSC205", "Network Fundamentals", 3, "ND2", "Second"),
    ("CSC206", "Project", 6, "ND2", "Second"),
];

/// `(student index, semester, session, amount due, amount paid)`
const FEES: [(usize, &str, &str, f64, f64); 3] = [
    (0, "First", "2024/2025", 50_000.0, 50_000.0),
    (0, "Second", "2024/2025", 50_000.0, 50_000.0),
    (1, "First", "2023/2024", 50_000.0, 0.0),
];

/// `(student index, course code, session, ca, exam)`; all First semester.
const RESULTS: [(usize, &str, &str, i64, i64); 6] = [
    (0, "CSC101", "2024/2025", 25, 50),
    (0, "CSC102", "2024/2025", 22, 46),
    (0, "MTH101", "2024/2025", 28, 54),
    (1, "CSC201", "2023/2024", 15, 20),
    (1, "CSC202", "2023/2024", 24, 46),
    (1, "CSC203", "2023/2024", 22, 43),
];

/// `(title, content, target level)`; no target means general.
const ANNOUNCEMENTS: [(&str, &str, Option<&str>); 3] = [
    (
        "Welcome to 2024/2025 Academic Session",
        "All students are welcome to the new academic session. Classes commence on Monday, September 18th, 2025.",
        None,
    ),
    (
        "ND1 Students: Course Registration",
        "ND1 students are required to complete their course registration before September 30th, 2025.",
        Some("ND1"),
    ),
    (
        "ND2 Project Submission Deadline",
        "ND2 students must submit their final year projects by December 15th, 2025.",
        Some("ND2"),
    ),
];

fn id_field(v: &Value, key: &str) -> Result<String, HandlerErr> {
    v.get(key)
        .and_then(|x| x.as_str())
        .map(str::to_string)
        .ok_or_else(|| HandlerErr::new("seed_failed", format!("missing {} in {}", key, v)))
}

fn seed(conn: &Connection) -> HandlerResult {
    let new_admin = NewAdmin::from_params(
        &json!({
            "email": DEMO_ADMIN_EMAIL,
            "password": DEMO_ADMIN_PASSWORD,
            "firstName": "Demo",
            "lastName": "Administrator",
            "staffId": "PLASU-ADMIN-001",
            "department": "Computer Science"
        }),
        DEMO_ADMIN_PASSWORD.len(),
    )?;
    let admin_id = new_admin.insert(conn, AdminRole::SuperAdmin)?;
    // Acts as the demo admin; no session row is created.
    let as_admin = SessionContext::Admin(AdminSession {
        token: String::new(),
        admin_id: admin_id.clone(),
        email: DEMO_ADMIN_EMAIL.to_string(),
        role: AdminRole::SuperAdmin,
    });

    let pin_hash = auth::hash_secret(DEMO_STUDENT_PIN)?;
    let mut student_ids = Vec::with_capacity(STUDENTS.len());
    let mut students_out = Vec::with_capacity(STUDENTS.len());
    for s in &STUDENTS {
        let created = students_create(
            conn,
            &as_admin,
            &json!({
                "firstName": s.first_name,
                "lastName": s.last_name,
                "matricNumber": s.matric_number,
                "email": s.email,
                "phone": s.phone,
                "level": s.level
            }),
        )?;
        let student_id = id_field(&created, "studentId")?;
        // Fixed demo PIN instead of the generated one.
        conn.execute(
            "UPDATE students SET pin_hash = ? WHERE id = ?",
            (&pin_hash, &student_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        students_out.push(json!({
            "studentId": student_id,
            "matricNumber": s.matric_number,
            "level": s.level,
            "pin": DEMO_STUDENT_PIN
        }));
        student_ids.push(student_id);
    }

    let mut course_ids: HashMap<&str, String> = HashMap::new();
    for (code, title, credit_hours, level, semester) in COURSES {
        let created = courses_create(
            conn,
            &as_admin,
            &json!({
                "code": code,
                "title": title,
                "creditHours": credit_hours,
                "level": level,
                "semester": semester
            }),
        )?;
        course_ids.insert(code, id_field(&created, "courseId")?);
    }

    for (student, semester, session, amount_due, amount_paid) in FEES {
        fees_record(
            conn,
            &as_admin,
            &json!({
                "studentId": student_ids[student],
                "semester": semester,
                "session": session,
                "amountDue": amount_due,
                "amountPaid": amount_paid
            }),
        )?;
    }

    let mut entries = Vec::with_capacity(RESULTS.len());
    for (student, code, session, ca, exam) in RESULTS {
        let course_id = course_ids
            .get(code)
            .ok_or_else(|| HandlerErr::new("seed_failed", format!("course {} not seeded", code)))?;
        entries.push(json!({
            "studentId": student_ids[student],
            "courseId": course_id,
            "caScore": ca,
            "examScore": exam,
            "session": session
        }));
    }
    results_save(
        conn,
        &as_admin,
        &json!({ "semester": "First", "entries": entries }),
    )?;

    for (title, content, target_level) in ANNOUNCEMENTS {
        announcements_create(
            conn,
            &as_admin,
            &json!({
                "title": title,
                "content": content,
                "isGeneral": target_level.is_none(),
                "targetLevel": target_level
            }),
        )?;
    }

    Ok(json!({
        "adminId": admin_id,
        "adminEmail": DEMO_ADMIN_EMAIL,
        "adminPassword": DEMO_ADMIN_PASSWORD,
        "students": students_out,
        "courses": COURSES.len(),
        "fees": FEES.len(),
        "results": RESULTS.len(),
        "announcements": ANNOUNCEMENTS.len()
    }))
}

/// Open to an admin, or to anyone while the workspace has no admin yet.
fn seed_demo(conn: &Connection, ctx: &SessionContext, _params: &Value) -> HandlerResult {
    if !matches!(ctx, SessionContext::Admin(_)) {
        let admins: i64 = conn
            .query_row("SELECT COUNT(*) FROM admins", [], |r| r.get(0))
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        if admins > 0 {
            return Err(match ctx {
                SessionContext::Student(_) => {
                    HandlerErr::new("forbidden", "You don't have admin privileges")
                }
                _ => HandlerErr::new("unauthenticated", "sign in as an admin to seed demo data"),
            });
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let out = seed(&tx)?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tracing::info!(seeded_by = ctx.kind(), "demo data seeded");
    Ok(out)
}

pub fn try_handle(
    state: &mut AppState,
    ctx: &SessionContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &SessionContext, &Value) -> HandlerResult =
        match req.method.as_str() {
            "setup.seedDemo" => seed_demo,
            _ => return None,
        };
    let result = require_db(&state.db).and_then(|conn| handler(conn, ctx, &req.params));
    Some(respond(&req.id, result))
}
