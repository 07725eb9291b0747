mod support;

use pretty_assertions::assert_eq;
use serde_json::json;
use support::Sidecar;

#[test]
fn defaults_then_validated_updates() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();

    let setup = sc.ok("setup.get", json!({}), None);
    assert_eq!(
        setup["portal"],
        json!({
            "currentSession": "2024/2025",
            "defaultSession": "2024/2025",
            "strictScoreParsing": false,
            "resultsRequireFeePaid": true,
            "minPinLength": 6
        })
    );

    let admin = sc.bootstrap_admin();
    assert_eq!(
        sc.fail_code(
            "setup.update",
            json!({ "section": "portal", "patch": { "currentSession": "2025/2026" } }),
            None
        ),
        "unauthenticated"
    );
    for bad in [
        json!({ "section": "portal", "patch": { "minPinLength": 2 } }),
        json!({ "section": "portal", "patch": { "strictScoreParsing": "yes" } }),
        json!({ "section": "portal", "patch": { "currentSession": "" } }),
        json!({ "section": "portal", "patch": { "theme": "dark" } }),
        json!({ "section": "email", "patch": {} }),
        json!({ "section": "portal" }),
    ] {
        assert_eq!(
            sc.fail_code("setup.update", bad.clone(), Some(&admin)),
            "bad_params",
            "{}",
            bad
        );
    }

    sc.ok(
        "setup.update",
        json!({ "section": "portal", "patch": {
            "currentSession": "2025/2026",
            "defaultSession": "2025/2026",
            "minPinLength": 8
        }}),
        Some(&admin),
    );
    let setup = sc.ok("setup.get", json!({}), None);
    assert_eq!(setup["portal"]["currentSession"], json!("2025/2026"));
    assert_eq!(setup["portal"]["minPinLength"], json!(8));
    assert_eq!(setup["portal"]["resultsRequireFeePaid"], json!(true));
}

#[test]
fn default_session_fills_blank_upload_cells() {
    let mut sc = Sidecar::spawn();
    let _ws = sc.open_workspace();
    let admin = sc.bootstrap_admin();
    sc.create_student(&admin, "ND/CS/2024/001", "ND1");
    sc.create_course(&admin, "CSC101", 3, "ND1", "First");
    sc.ok(
        "setup.update",
        json!({ "section": "portal", "patch": { "defaultSession": "2023/2024" } }),
        Some(&admin),
    );

    let preview = sc.ok(
        "bulk.preview",
        json!({ "csvText": "course_code,matric_number,exam_score,ca_score\nCSC101,ND/CS/2024/001,50,20\n" }),
        Some(&admin),
    );
    let row = &preview["rows"][0];
    assert_eq!(row["session"], json!("2023/2024"));
    assert_eq!(row["caScore"], json!(20));
    assert_eq!(row["examScore"], json!(50));
    assert_eq!(row["grade"], json!("A"));
}
