mod support;

use serde_json::json;
use support::{str_field, Sidecar};

#[test]
fn bootstrap_only_works_once() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();
    let admin = sc.bootstrap_admin();

    assert_eq!(
        sc.fail_code(
            "admin.bootstrap",
            json!({
                "email": "intruder@poly.edu.ng",
                "password": "Intruder99",
                "firstName": "X",
                "lastName": "Y"
            }),
            None
        ),
        "conflict"
    );

    let who = sc.ok("auth.whoami", json!({}), Some(&admin));
    assert_eq!(who["kind"], json!("admin"));
    assert_eq!(who["role"], json!("super_admin"));
    assert_eq!(who["email"], json!("registrar@poly.edu.ng"));
}

#[test]
fn admin_login_rejects_bad_credentials() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();
    sc.bootstrap_admin();

    let error = sc.fail(
        "auth.adminLogin",
        json!({ "email": "registrar@poly.edu.ng", "password": "wrong-pass" }),
        None,
    );
    assert_eq!(error["code"], json!("unauthenticated"));
    assert_eq!(error["message"], json!("Invalid email or password"));

    // Email matching ignores case and surrounding space.
    sc.ok(
        "auth.adminLogin",
        json!({ "email": "  Registrar@Poly.edu.ng ", "password": "Admin1234" }),
        None,
    );
}

#[test]
fn student_login_messages_and_whoami() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();
    let admin = sc.bootstrap_admin();
    let (student_id, pin) = sc.create_student(&admin, "ND/CS/2024/001", "ND2");

    let unknown = sc.fail(
        "auth.studentLogin",
        json!({ "matricNumber": "ND/CS/2024/404", "pin": pin }),
        None,
    );
    assert_eq!(unknown["message"], json!("Invalid matric number"));
    let wrong = sc.fail(
        "auth.studentLogin",
        json!({ "matricNumber": "ND/CS/2024/001", "pin": "000000" }),
        None,
    );
    assert_eq!(wrong["message"], json!("Invalid PIN"));

    let login = sc.ok(
        "auth.studentLogin",
        json!({ "matricNumber": "ND/CS/2024/001", "pin": pin }),
        None,
    );
    assert_eq!(login["passwordChanged"], json!(false));
    let token = str_field(&login, "token");

    let who = sc.ok("auth.whoami", json!({}), Some(&token));
    assert_eq!(who["kind"], json!("student"));
    assert_eq!(who["studentId"], json!(student_id));
    assert_eq!(who["level"], json!("ND2"));

    let anon = sc.ok("auth.whoami", json!({}), Some("not-a-token"));
    assert_eq!(anon["kind"], json!("anonymous"));
}

#[test]
fn guards_reject_the_wrong_principal() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();
    let admin = sc.bootstrap_admin();
    let (_, pin) = sc.create_student(&admin, "ND/CS/2024/001", "ND1");
    let student = sc.student_login("ND/CS/2024/001", &pin);

    assert_eq!(sc.fail_code("students.list", json!({}), None), "unauthenticated");
    assert_eq!(sc.fail_code("students.list", json!({}), Some(&student)), "forbidden");
    assert_eq!(sc.fail_code("profile.get", json!({}), Some(&admin)), "forbidden");
    assert_eq!(sc.fail_code("dashboard.admin", json!({}), Some(&student)), "forbidden");
    sc.ok("profile.get", json!({}), Some(&student));
    sc.ok("students.list", json!({}), Some(&admin));
}

#[test]
fn only_super_admins_create_admins() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();
    let root = sc.bootstrap_admin();

    sc.ok(
        "admins.create",
        json!({
            "email": "exams@poly.edu.ng",
            "password": "Exams2024",
            "firstName": "Bola",
            "lastName": "Ade",
            "staffId": "STF-019",
            "role": "admin"
        }),
        Some(&root),
    );
    assert_eq!(
        sc.fail_code(
            "admins.create",
            json!({
                "email": "exams@poly.edu.ng",
                "password": "Exams2024",
                "firstName": "Bola",
                "lastName": "Ade"
            }),
            Some(&root)
        ),
        "conflict"
    );

    let login = sc.ok(
        "auth.adminLogin",
        json!({ "email": "exams@poly.edu.ng", "password": "Exams2024" }),
        None,
    );
    assert_eq!(login["role"], json!("admin"));
    let plain = str_field(&login, "token");
    assert_eq!(
        sc.fail_code(
            "admins.create",
            json!({
                "email": "other@poly.edu.ng",
                "password": "Other2024",
                "firstName": "O",
                "lastName": "T"
            }),
            Some(&plain)
        ),
        "forbidden"
    );

    let list = sc.ok("admins.list", json!({}), Some(&plain));
    assert_eq!(list["admins"].as_array().map(|a| a.len()), Some(2));
}

#[test]
fn change_pin_rules_and_effect() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();
    let admin = sc.bootstrap_admin();
    let (_, pin) = sc.create_student(&admin, "ND/CS/2024/001", "ND1");
    let token = sc.student_login("ND/CS/2024/001", &pin);
    let other_device = sc.student_login("ND/CS/2024/001", &pin);

    let mismatch = sc.fail(
        "auth.changePin",
        json!({ "currentPin": pin, "newPin": "246810", "confirmPin": "246811" }),
        Some(&token),
    );
    assert_eq!(mismatch["message"], json!("New PINs do not match"));
    let short = sc.fail(
        "auth.changePin",
        json!({ "currentPin": pin, "newPin": "2468", "confirmPin": "2468" }),
        Some(&token),
    );
    assert_eq!(short["message"], json!("PIN must be at least 6 characters"));

    sc.ok(
        "auth.changePin",
        json!({ "currentPin": pin, "newPin": "246810", "confirmPin": "246810" }),
        Some(&token),
    );

    // This session survives, the other device is signed out.
    assert_eq!(sc.ok("auth.whoami", json!({}), Some(&token))["kind"], json!("student"));
    assert_eq!(
        sc.ok("auth.whoami", json!({}), Some(&other_device))["kind"],
        json!("anonymous")
    );

    assert_eq!(
        sc.fail_code(
            "auth.studentLogin",
            json!({ "matricNumber": "ND/CS/2024/001", "pin": pin }),
            None
        ),
        "unauthenticated"
    );
    let login = sc.ok(
        "auth.studentLogin",
        json!({ "matricNumber": "ND/CS/2024/001", "pin": "246810" }),
        None,
    );
    assert_eq!(login["passwordChanged"], json!(true));
}

#[test]
fn reset_pin_revokes_sessions_and_logout_ends_one() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();
    let admin = sc.bootstrap_admin();
    let (student_id, pin) = sc.create_student(&admin, "ND/CS/2024/001", "ND1");
    let token = sc.student_login("ND/CS/2024/001", &pin);

    let reset = sc.ok("students.resetPin", json!({ "studentId": student_id }), Some(&admin));
    let new_pin = str_field(&reset, "pin");
    assert_eq!(new_pin.len(), 6);
    assert_eq!(
        sc.ok("auth.whoami", json!({}), Some(&token))["kind"],
        json!("anonymous")
    );

    let fresh = sc.student_login("ND/CS/2024/001", &new_pin);
    let out = sc.ok("auth.logout", json!({}), Some(&fresh));
    assert_eq!(out["loggedOut"], json!(true));
    assert_eq!(sc.fail_code("profile.get", json!({}), Some(&fresh)), "unauthenticated");
    assert_eq!(sc.fail_code("auth.logout", json!({}), None), "unauthenticated");
}

#[test]
fn stored_credentials_are_argon2_phc_strings() {
    let mut sc = Sidecar::spawn();
    let ws = sc.open_workspace();
    let admin = sc.bootstrap_admin();
    let (student_id, pin) = sc.create_student(&admin, "ND/CS/2024/050", "ND1");

    let conn = rusqlite::Connection::open(ws.path().join("portal.sqlite3")).expect("open db");
    let pin_hash: String = conn
        .query_row(
            "SELECT pin_hash FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .expect("pin hash");
    assert!(pin_hash.starts_with("$argon2id$"), "{pin_hash}");
    assert!(!pin_hash.contains(&pin));

    let password_hash: String = conn
        .query_row(
            "SELECT password_hash FROM admins WHERE email = 'registrar@poly.edu.ng'",
            [],
            |r| r.get(0),
        )
        .expect("password hash");
    assert!(password_hash.starts_with("$argon2id$"), "{password_hash}");
    drop(conn);

    // The hash still verifies through the normal login path.
    sc.student_login("ND/CS/2024/050", &pin);
}
