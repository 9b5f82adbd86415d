use chrono::{Duration, Local};
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
    let exe = env!("CARGO_BIN_EXE_standind");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn standind");
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
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn result_of(resp: &serde_json::Value) -> &serde_json::Value {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok response, got {resp}"
    );
    resp.get("result").expect("result")
}

fn error_code(resp: &serde_json::Value) -> &str {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected error response, got {resp}"
    );
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
}

fn fixture() -> serde_json::Value {
    json!({
        "about": { "serverTimeStamp": "20270112 0712" },
        "result": {
            "teachers": [
                { "id": "t-mue", "code": "MUE", "firstName": "Eva", "lastName": "Müller" }
            ],
            "subjects": [
                { "id": "s-m", "code": "M", "description": "Mathematik" }
            ],
            "teams": [
                { "id": "tm-bs", "code": "BS", "description": "Berufsschule" }
            ],
            "courses": [
                { "id": "c-m10", "subjectRef": "s-m", "title": "M 10" }
            ],
            "classes": [
                { "id": "g-10a", "code": "10a", "teamRefs": ["tm-bs"] }
            ],
            "timeframes": [
                { "code": "Standard", "timeslots": [
                    { "startTime": "0800", "label": "1" },
                    { "startTime": "0945", "label": "3" },
                    { "startTime": "1045", "label": "4" }
                ]}
            ],
            "displaySchedule": { "lessonTimes": [
                {
                    "dates": ["20270112", "20270113"],
                    "startTime": "0945", "endTime": "1030",
                    "classCodes": ["10a"],
                    "teacherCodes": ["MUE"],
                    "roomCodes": ["A102"],
                    "courseRef": "c-m10",
                    "lessonRef": "l-1",
                    "changes": { "newRoomCodes": ["B201"] }
                }
            ]}
        }
    })
}

#[test]
fn import_activate_view_and_failed_reimport() {
    let workspace = temp_dir("standind-lifecycle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    result_of(&resp);

    // No school year yet; the import must refuse before touching the file.
    let file_path = workspace.join("export.json");
    std::fs::write(&file_path, fixture().to_string()).expect("write fixture");
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "plan.import",
        json!({ "path": file_path.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "missing_school_year");

    let today = Local::now().date_naive();
    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "schoolYear.set",
        json!({
            "start": (today - Duration::days(180)).format("%Y-%m-%d").to_string(),
            "end": (today + Duration::days(185)).format("%Y-%m-%d").to_string()
        }),
    );
    result_of(&resp);

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "plan.import",
        json!({ "path": file_path.to_string_lossy() }),
    );
    let imported = result_of(&resp);
    assert_eq!(imported.get("changes").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(imported.get("entries").and_then(|v| v.as_u64()), Some(2));
    let plan_id = imported.get("planId").and_then(|v| v.as_i64()).expect("planId");

    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "plan.view",
        json!({ "from": "2027-01-12", "days": 2 }),
    );
    let view = result_of(&resp);
    assert_eq!(view.get("planId").and_then(|v| v.as_i64()), Some(plan_id));
    let days = view.get("days").and_then(|v| v.as_array()).expect("days");
    assert_eq!(days.len(), 2);
    assert_eq!(days[0].get("day").and_then(|v| v.as_str()), Some("2027-01-12"));
    let grades = days[0].get("grades").and_then(|v| v.as_array()).expect("grades");
    assert_eq!(grades.len(), 1);
    assert_eq!(grades[0].get("grade").and_then(|v| v.as_str()), Some("10a"));
    assert_eq!(
        grades[0].get("division").and_then(|v| v.as_str()),
        Some("Berufsschule")
    );
    let entries = grades[0].get("entries").and_then(|v| v.as_array()).expect("entries");
    assert_eq!(entries.len(), 1);
    let e = &entries[0];
    assert_eq!(e.get("hour").and_then(|v| v.as_str()), Some("3."));
    assert_eq!(e.get("timeStart").and_then(|v| v.as_str()), Some("09:45"));
    assert_eq!(e.get("course").and_then(|v| v.as_str()), Some("M 10"));
    assert_eq!(e.get("room").and_then(|v| v.as_str()), Some("A102"));
    assert_eq!(e.get("supplyRoom").and_then(|v| v.as_str()), Some("B201"));
    assert_eq!(e.get("cancelled").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(e.get("grouped").and_then(|v| v.as_bool()), Some(false));

    // A broken re-import must not disturb the active plan.
    let mut broken = fixture();
    broken["result"]["displaySchedule"]["lessonTimes"][0]["teacherCodes"] = json!(["GHOST"]);
    let broken_path = workspace.join("broken.json");
    std::fs::write(&broken_path, broken.to_string()).expect("write fixture");
    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "plan.import",
        json!({ "path": broken_path.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "unknown_reference");

    let resp = request(&mut stdin, &mut reader, "7", "plan.list", json!({}));
    let plans = result_of(&resp)
        .get("plans")
        .and_then(|v| v.as_array())
        .expect("plans")
        .clone();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].get("active").and_then(|v| v.as_bool()), Some(true));

    let resp = request(
        &mut stdin,
        &mut reader,
        "8",
        "plan.view",
        json!({ "from": "2027-01-12" }),
    );
    assert_eq!(
        result_of(&resp).get("planId").and_then(|v| v.as_i64()),
        Some(plan_id)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn handlers_refuse_without_a_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let health = result_of(&resp);
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "plan.import",
        json!({ "path": "/nowhere/export.json" }),
    );
    assert_eq!(error_code(&resp), "no_workspace");

    let resp = request(&mut stdin, &mut reader, "3", "plan.view", json!({}));
    assert_eq!(error_code(&resp), "no_workspace");

    let resp = request(&mut stdin, &mut reader, "4", "bogus.method", json!({}));
    assert_eq!(error_code(&resp), "not_implemented");

    drop(stdin);
    let _ = child.wait();
}
