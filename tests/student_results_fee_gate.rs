mod support;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use support::{str_field, Sidecar};

struct Seeded {
    admin: String,
    student_id: String,
    student: String,
    courses: Vec<String>,
}

/// One ND1 student with A (3 units), B (4 units) and C (3 units) in First semester.
fn seed(sc: &mut Sidecar) -> Seeded {
    let admin = sc.bootstrap_admin();
    let (student_id, pin) = sc.create_student(&admin, "ND/CS/2024/001", "ND1");
    let courses = vec![
        sc.create_course(&admin, "CSC101", 3, "ND1", "First"),
        sc.create_course(&admin, "CSC103", 4, "ND1", "First"),
        sc.create_course(&admin, "GNS101", 3, "ND1", "First"),
    ];
    let scores = [(25, 50), (20, 45), (15, 40)];
    let entries: Vec<Value> = courses
        .iter()
        .zip(scores)
        .map(|(course_id, (ca, exam))| {
            json!({
                "studentId": student_id,
                "courseId": course_id,
                "caScore": ca,
                "examScore": exam
            })
        })
        .collect();
    let saved = sc.ok(
        "results.save",
        json!({ "semester": "First", "entries": entries }),
        Some(&admin),
    );
    assert_eq!(saved["inserted"], json!(3));
    let student = sc.student_login("ND/CS/2024/001", &pin);
    Seeded {
        admin,
        student_id,
        student,
        courses,
    }
}

fn pay(sc: &mut Sidecar, admin: &str, student_id: &str, semester: &str, paid: f64) -> Value {
    sc.ok(
        "fees.record",
        json!({
            "studentId": student_id,
            "semester": semester,
            "session": "2024/2025",
            "amountDue": 45000.0,
            "amountPaid": paid
        }),
        Some(admin),
    )
}

#[test]
fn unpaid_student_is_blocked() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();
    let s = seed(&mut sc);

    let params = json!({ "level": "ND1", "semester": "First" });
    let error = sc.fail("results.view", params.clone(), Some(&s.student));
    assert_eq!(error["code"], json!("fee_required"));

    let partial = pay(&mut sc, &s.admin, &s.student_id, "First", 20000.0);
    assert_eq!(partial["status"], json!("partial"));
    assert_eq!(
        sc.fail_code("results.view", params.clone(), Some(&s.student)),
        "fee_required"
    );

    let paid = pay(&mut sc, &s.admin, &s.student_id, "First", 45000.0);
    assert_eq!(paid["status"], json!("paid"));
    // Upsert keeps one record per student, semester and session.
    assert_eq!(paid["feeId"], partial["feeId"]);
    sc.ok("results.view", params, Some(&s.student));
}

#[test]
fn view_summary_matches_the_calculator() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();
    let s = seed(&mut sc);
    pay(&mut sc, &s.admin, &s.student_id, "First", 45000.0);

    let view = sc.ok(
        "results.view",
        json!({ "level": "ND1", "semester": "First" }),
        Some(&s.student),
    );
    let grades: Vec<String> = view["results"]
        .as_array()
        .expect("results")
        .iter()
        .map(|r| str_field(r, "grade"))
        .collect();
    assert_eq!(grades, vec!["A", "B", "C"]);
    assert_eq!(
        view["summary"],
        json!({
            "totalCreditUnits": 10,
            "totalGradePoints": 40,
            "cgp": "4.00",
            "classification": "Upper Credit",
            "carryovers": 0
        })
    );

    let calc = sc.ok(
        "cgp.calculate",
        json!({ "courses": [
            { "title": "CSC101", "creditUnit": 3, "grade": "A" },
            { "title": "CSC103", "creditUnit": 4, "grade": "B" },
            { "title": "GNS101", "creditUnit": 3, "grade": "C" }
        ]}),
        None,
    );
    assert_eq!(calc["cgp"], view["summary"]["cgp"]);
    assert_eq!(calc["classification"], view["summary"]["classification"]);

    // Nothing recorded for Second semester yet.
    pay(&mut sc, &s.admin, &s.student_id, "Second", 45000.0);
    let empty = sc.ok(
        "results.view",
        json!({ "level": "ND1", "semester": "Second" }),
        Some(&s.student),
    );
    assert_eq!(empty["results"], json!([]));
    assert_eq!(empty["summary"]["cgp"], json!("0.00"));
}

#[test]
fn gate_can_be_switched_off() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();
    let s = seed(&mut sc);
    sc.ok(
        "setup.update",
        json!({ "section": "portal", "patch": { "resultsRequireFeePaid": false } }),
        Some(&s.admin),
    );
    sc.ok(
        "results.view",
        json!({ "level": "ND1", "semester": "First" }),
        Some(&s.student),
    );
    let mine = sc.ok("fees.mine", json!({}), Some(&s.student));
    assert_eq!(mine["canViewResults"], json!({ "First": true, "Second": true }));
}

#[test]
fn save_rejects_bad_entries_without_writing() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();
    let s = seed(&mut sc);
    let extra = sc.create_course(&s.admin, "MTH101", 2, "ND1", "First");

    let out_of_range = sc.fail(
        "results.save",
        json!({ "semester": "First", "entries": [
            { "studentId": s.student_id, "courseId": extra, "caScore": 10, "examScore": 71 }
        ]}),
        Some(&s.admin),
    );
    assert_eq!(out_of_range["code"], json!("bad_params"));
    assert_eq!(out_of_range["message"], json!("Exam score must be between 0 and 70"));
    assert_eq!(out_of_range["details"]["index"], json!(0));

    let twice = sc.fail(
        "results.save",
        json!({ "semester": "First", "entries": [
            { "studentId": s.student_id, "courseId": extra, "caScore": 10, "examScore": 30 },
            { "studentId": s.student_id, "courseId": extra, "caScore": 12, "examScore": 30 }
        ]}),
        Some(&s.admin),
    );
    assert_eq!(twice["message"], json!("This student is already in the results list"));
    assert_eq!(twice["details"]["index"], json!(1));

    assert_eq!(
        sc.fail_code(
            "results.save",
            json!({ "semester": "First", "entries": [
                { "studentId": "missing", "courseId": extra, "caScore": 1, "examScore": 1 }
            ]}),
            Some(&s.admin)
        ),
        "not_found"
    );

    // Second entry duplicates a stored result, so the first is rolled back too.
    let dup = sc.fail(
        "results.save",
        json!({ "semester": "First", "entries": [
            { "studentId": s.student_id, "courseId": extra, "caScore": 10, "examScore": 30 },
            { "studentId": s.student_id, "courseId": s.courses[0], "caScore": 10, "examScore": 30 }
        ]}),
        Some(&s.admin),
    );
    assert_eq!(dup["code"], json!("commit_failed"));

    let all = sc.ok(
        "results.forStudent",
        json!({ "studentId": s.student_id }),
        Some(&s.admin),
    );
    assert_eq!(all["results"].as_array().map(|r| r.len()), Some(3));
    assert_eq!(all["student"]["matricNumber"], json!("ND/CS/2024/001"));
}

#[test]
fn carryovers_count_failed_courses() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();
    let s = seed(&mut sc);
    let failed = sc.create_course(&s.admin, "MTH101", 2, "ND1", "First");
    sc.ok(
        "results.save",
        json!({ "semester": "First", "entries": [
            { "studentId": s.student_id, "courseId": failed, "caScore": 10, "examScore": 20 }
        ]}),
        Some(&s.admin),
    );

    let all = sc.ok(
        "results.forStudent",
        json!({ "studentId": s.student_id, "session": "2024/2025" }),
        Some(&s.admin),
    );
    assert_eq!(all["summary"]["carryovers"], json!(1));
    assert_eq!(all["summary"]["totalCreditUnits"], json!(12));
    // 40 points over 12 units.
    assert_eq!(all["summary"]["cgp"], json!("3.33"));
}
