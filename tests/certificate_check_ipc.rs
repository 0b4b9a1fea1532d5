use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_coursed");
    let mut child = Command::new(exe)
        .env_remove("COURSED_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn coursed");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().unwrap_or("").to_string()
}

fn select_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, name: &str) {
    let workspace = temp_dir(&format!("coursed-cert-{}", name));
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

/// Course with two lessons and two single-question quizzes; `s1` enrolled and
/// done with every lesson. Returns `(course_id, template_id, [quiz ids])`.
fn finished_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> (String, String, Vec<String>) {
    let course = request_ok(
        stdin,
        reader,
        "c",
        "courses.create",
        json!({ "title": "Physics", "certificate_enabled": true }),
    );
    let course_id = course["course_id"].as_str().expect("course_id").to_string();
    let template_id = course["template_id"].as_str().expect("template_id").to_string();
    let module = request_ok(
        stdin,
        reader,
        "m",
        "modules.create",
        json!({ "course_id": course_id, "title": "Mechanics" }),
    );
    let module_id = module["module_id"].as_str().expect("module_id").to_string();
    let mut lessons = Vec::new();
    for title in ["Forces", "Energy"] {
        let l = request_ok(
            stdin,
            reader,
            "l",
            "lessons.create",
            json!({ "module_id": module_id, "title": title }),
        );
        lessons.push(l["lesson_id"].as_str().expect("lesson_id").to_string());
    }
    let mut quizzes = Vec::new();
    for title in ["Quiz A", "Quiz B"] {
        let q = request_ok(
            stdin,
            reader,
            "q",
            "quizzes.create",
            json!({
                "course_id": course_id,
                "title": title,
                "questions": [
                    { "question_id": "q1", "prompt": "2+2", "correct_answer": "4" },
                    { "question_id": "q2", "prompt": "3+3", "correct_answer": "6" }
                ]
            }),
        );
        quizzes.push(q["quiz_id"].as_str().expect("quiz_id").to_string());
    }
    request_ok(
        stdin,
        reader,
        "e",
        "enrollments.create",
        json!({ "student_id": "s1", "course_id": course_id }),
    );
    for lesson in &lessons {
        request_ok(
            stdin,
            reader,
            "done",
            "lessons.complete",
            json!({ "student_id": "s1", "lesson_id": lesson }),
        );
    }
    (course_id, template_id, quizzes)
}

fn attempt(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    quiz_id: &str,
    correct: usize,
) -> serde_json::Value {
    let answers: Vec<serde_json::Value> = [("q1", "4"), ("q2", "6")]
        .iter()
        .enumerate()
        .map(|(i, (q, a))| {
            let given = if i < correct { *a } else { "wrong" };
            json!({ "question_id": q, "answer": given })
        })
        .collect();
    request_ok(
        stdin,
        reader,
        "att",
        "quizzes.attempt",
        json!({ "quiz_id": quiz_id, "student_id": "s1", "answers": answers }),
    )
}

#[test]
fn low_average_blocks_until_a_better_attempt() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "threshold");
    let (course_id, _, quizzes) = finished_course(&mut stdin, &mut reader);

    assert_eq!(attempt(&mut stdin, &mut reader, &quizzes[0], 1)["score"].as_f64(), Some(50.0));
    assert_eq!(attempt(&mut stdin, &mut reader, &quizzes[1], 0)["score"].as_f64(), Some(0.0));

    let blocked = request_ok(
        &mut stdin,
        &mut reader,
        "chk1",
        "certificates.check",
        json!({ "student_id": "s1", "course_id": course_id }),
    );
    assert_eq!(blocked["all_lessons_done"].as_bool(), Some(true));
    assert_eq!(blocked["avg_quiz_score"].as_f64(), Some(25.0));
    assert_eq!(blocked["eligible"].as_bool(), Some(false));
    assert_eq!(blocked["issued"].as_bool(), Some(false));

    // Best attempt per quiz counts: (50 + 100) / 2.
    attempt(&mut stdin, &mut reader, &quizzes[1], 2);
    let passed = request_ok(
        &mut stdin,
        &mut reader,
        "chk2",
        "certificates.check",
        json!({ "student_id": "s1", "course_id": course_id }),
    );
    assert_eq!(passed["avg_quiz_score"].as_f64(), Some(75.0));
    assert_eq!(passed["eligible"].as_bool(), Some(true));
    assert_eq!(passed["newly_issued"].as_bool(), Some(true));
    assert_eq!(passed["certificate"]["issued_by"].as_str(), Some("system"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn repeated_checks_issue_one_certificate() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "idempotent");
    let (course_id, _, _) = finished_course(&mut stdin, &mut reader);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "chk1",
        "certificates.check",
        json!({ "student_id": "s1", "course_id": course_id }),
    );
    assert_eq!(first["avg_quiz_score"].as_f64(), Some(100.0));
    assert_eq!(first["newly_issued"].as_bool(), Some(true));

    for i in 0..3 {
        let again = request_ok(
            &mut stdin,
            &mut reader,
            &format!("chk-again-{}", i),
            "certificates.check",
            json!({ "student_id": "s1", "course_id": course_id }),
        );
        assert_eq!(again["issued"].as_bool(), Some(true));
        assert_eq!(again["newly_issued"].as_bool(), Some(false));
        assert_eq!(again["certificate"], first["certificate"]);
    }

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "certificates.list",
        json!({ "student_id": "s1" }),
    );
    assert_eq!(listed["certificates"].as_array().map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn not_enrolled_is_a_negative_result() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "not-enrolled");
    let (course_id, _, _) = finished_course(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "chk",
        "certificates.check",
        json!({ "student_id": "stranger", "course_id": course_id }),
    );
    assert_eq!(result["eligible"].as_bool(), Some(false));
    assert_eq!(result["issued"].as_bool(), Some(false));
    assert_eq!(result["reason"].as_str(), Some("not enrolled"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn manual_issue_is_idempotent_per_pair() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "manual");
    let (course_id, template_id, _) = finished_course(&mut stdin, &mut reader);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "bad-tmpl",
        "certificates.issue",
        json!({
            "student_id": "s2",
            "course_id": course_id,
            "issued_by": "admin_1",
            "template_id": "tmpl_missing"
        }),
    );
    assert_eq!(code, "not_found");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "iss1",
        "certificates.issue",
        json!({
            "student_id": "s2",
            "course_id": course_id,
            "issued_by": "admin_1",
            "template_id": template_id
        }),
    );
    assert_eq!(first["created"].as_bool(), Some(true));
    assert_eq!(first["certificate"]["template_id"].as_str(), Some(template_id.as_str()));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "iss2",
        "certificates.issue",
        json!({ "student_id": "s2", "course_id": course_id, "issued_by": "admin_2" }),
    );
    assert_eq!(second["created"].as_bool(), Some(false));
    assert_eq!(second["certificate"], first["certificate"]);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "missing-issuer",
        "certificates.issue",
        json!({ "student_id": "s2", "course_id": course_id }),
    );
    assert_eq!(code, "bad_params");

    drop(stdin);
    let _ = child.wait();
}
