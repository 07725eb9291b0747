#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_portald");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn portald");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    pub fn send_raw(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn call(&mut self, method: &str, params: Value, token: Option<&str>) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({ "id": id, "method": method, "params": params });
        if let Some(t) = token {
            payload["token"] = json!(t);
        }
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, method: &str, params: Value, token: Option<&str>) -> Value {
        let resp = self.call(method, params, token);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            resp
        );
        resp.get("result").cloned().unwrap_or(Value::Null)
    }

    /// Asserts failure and returns the error object.
    pub fn fail(&mut self, method: &str, params: Value, token: Option<&str>) -> Value {
        let resp = self.call(method, params, token);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            resp
        );
        resp.get("error").cloned().unwrap_or(Value::Null)
    }

    pub fn fail_code(&mut self, method: &str, params: Value, token: Option<&str>) -> String {
        let error = self.fail(method, params, token);
        error
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("missing")
            .to_string()
    }

    pub fn open_workspace(&mut self) -> TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        self.ok(
            "workspace.select",
            json!({ "path": dir.path().to_string_lossy() }),
            None,
        );
        dir
    }

    /// Creates the first super admin and signs in as them.
    pub fn bootstrap_admin(&mut self) -> String {
        self.ok(
            "admin.bootstrap",
            json!({
                "email": "registrar@poly.edu.ng",
                "password": "Admin1234",
                "firstName": "Grace",
                "lastName": "Okafor"
            }),
            None,
        );
        let login = self.ok(
            "auth.adminLogin",
            json!({ "email": "registrar@poly.edu.ng", "password": "Admin1234" }),
            None,
        );
        str_field(&login, "token")
    }

    /// Returns `(student_id, pin)`.
    pub fn create_student(
        &mut self,
        admin_token: &str,
        matric_number: &str,
        level: &str,
    ) -> (String, String) {
        let email = format!("{}@student.poly.edu.ng", matric_number.replace('/', "").to_lowercase());
        let created = self.ok(
            "students.create",
            json!({
                "firstName": "Chinedu",
                "lastName": "Eze",
                "matricNumber": matric_number,
                "email": email,
                "level": level
            }),
            Some(admin_token),
        );
        (str_field(&created, "studentId"), str_field(&created, "pin"))
    }

    pub fn create_course(
        &mut self,
        admin_token: &str,
        code: &str,
        credit_hours: i64,
        level: &str,
        semester: &str,
    ) -> String {
        let created = self.ok(
            "courses.create",
            json!({
                "code": code,
                "title": format!("{} title", code),
                "creditHours": credit_hours,
                "level": level,
                "semester": semester
            }),
            Some(admin_token),
        );
        str_field(&created, "courseId")
    }

    pub fn student_login(&mut self, matric_number: &str, pin: &str) -> String {
        let login = self.ok(
            "auth.studentLogin",
            json!({ "matricNumber": matric_number, "pin": pin }),
            None,
        );
        str_field(&login, "token")
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}
