use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_server() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_mass-attendance");
    let mut child = Command::new(exe)
        .args(["--in-memory", "serve"])
        .env("ACHIEVEMENT_THRESHOLD", "3")
        .env_remove("DATABASE_URL")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn mass-attendance");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    payload: serde_json::Value,
) -> serde_json::Value {
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", payload);
    serde_json::from_str(line.trim()).expect("parse response json")
}

#[test]
fn redeem_flow_over_json_lines() {
    let (mut child, mut stdin, mut reader) = spawn_server();
    let admin = "admin@parish.example";

    let classes = request(&mut stdin, &mut reader, json!({ "action": "getAllClasses" }));
    assert_eq!(classes, json!(["C1", "C2"]));

    let stats = request(
        &mut stdin,
        &mut reader,
        json!({ "action": "getStats", "email": admin, "class": "*" }),
    );
    assert_eq!(
        stats,
        json!({ "totalRecords": 9, "achievedStudents": 2, "redeemedCount": 1, "class": "*" })
    );

    let batch = request(
        &mut stdin,
        &mut reader,
        json!({
            "action": "batchUpdateRedeemStatus",
            "email": admin,
            "records": [
                { "className": "C1", "studentName": "陳小明", "attendanceDate": "2024-01-07", "redeemDate": "2024-02-04" },
                { "className": "C1", "studentName": "陳小明", "attendanceDate": "2024-01-14", "redeemDate": "2024-02-04" },
                { "className": "C1", "studentName": "陳小明", "attendanceDate": "2024-03-03", "redeemDate": "2024-02-04" },
            ],
        }),
    );
    assert_eq!(batch["ok"], true);
    assert_eq!(batch["appliedCount"], 2);
    assert_eq!(batch["failed"].as_array().map(Vec::len), Some(1));

    let stats = request(
        &mut stdin,
        &mut reader,
        json!({ "action": "getStats", "email": admin, "class": "C1" }),
    );
    assert_eq!(stats["redeemedCount"], 1);
    assert_eq!(stats["class"], "C1");

    let pending = request(
        &mut stdin,
        &mut reader,
        json!({ "action": "getUnredeemedRecords", "email": admin }),
    );
    assert_eq!(pending.as_array().map(Vec::len), Some(3));

    drop(stdin);
    let status = child.wait().expect("wait for server");
    assert!(status.success());
}

#[test]
fn teacher_is_kept_to_own_class() {
    let (mut child, mut stdin, mut reader) = spawn_server();
    let teacher = "teacher.c1@parish.example";

    let roles = request(
        &mut stdin,
        &mut reader,
        json!({ "action": "getUserRoles", "email": teacher }),
    );
    assert_eq!(roles["role"], "teacher");
    assert_eq!(roles["defaultClass"], "C1");

    let denied = request(
        &mut stdin,
        &mut reader,
        json!({ "action": "getAchievedStudents", "email": teacher, "class": "C2" }),
    );
    assert_eq!(denied["kind"], "forbidden");

    let recorded = request(
        &mut stdin,
        &mut reader,
        json!({
            "action": "recordAttendance",
            "email": teacher,
            "class": "C1",
            "studentName": "林美華",
            "attendanceDate": "2024-01-21",
            "redeemed": true,
            "redeemDate": "2024-01-28",
        }),
    );
    assert_eq!(recorded, json!({ "ok": true }));

    let achieved = request(
        &mut stdin,
        &mut reader,
        json!({ "action": "getAchievedStudents", "email": teacher, "class": "C1" }),
    );
    let names: Vec<&str> = achieved
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|s| s["studentName"].as_str())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"林美華"));

    let garbage = request(&mut stdin, &mut reader, json!("not an object"));
    assert_eq!(garbage["kind"], "validation");

    drop(stdin);
    let _ = child.wait();
}
