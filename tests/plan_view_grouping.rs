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

fn lesson(start: &str, end: &str) -> serde_json::Value {
    json!({
        "dates": ["20270112"],
        "startTime": start, "endTime": end,
        "classCodes": ["10a"],
        "teacherCodes": ["MUE"],
        "roomCodes": ["A102"],
        "courseRef": "c-m10",
        "lessonRef": format!("l-{start}"),
        "changes": { "newRoomCodes": ["B201"], "information": "Raumtausch" }
    })
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
            "teams": [],
            "courses": [
                { "id": "c-m10", "subjectRef": "s-m", "title": "M 10" }
            ],
            "classes": [
                { "id": "g-10a", "code": "10a" }
            ],
            "timeframes": [
                { "code": "Standard", "timeslots": [
                    { "startTime": "0945", "label": "3" },
                    { "startTime": "1045", "label": "4" }
                ]}
            ],
            "displaySchedule": { "lessonTimes": [
                lesson("0945", "1030"),
                lesson("1045", "1130")
            ]}
        }
    })
}

fn setup() -> (Child, ChildStdin, BufReader<ChildStdout>, PathBuf) {
    let workspace = temp_dir("standind-grouping");
    let (child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    result_of(&resp);

    let today = Local::now().date_naive();
    let resp = request(
        &mut stdin,
        &mut reader,
        "s2",
        "schoolYear.set",
        json!({
            "start": (today - Duration::days(180)).format("%Y-%m-%d").to_string(),
            "end": (today + Duration::days(185)).format("%Y-%m-%d").to_string()
        }),
    );
    result_of(&resp);

    let file_path = workspace.join("export.json");
    std::fs::write(&file_path, fixture().to_string()).expect("write fixture");
    let resp = request(
        &mut stdin,
        &mut reader,
        "s3",
        "plan.import",
        json!({ "path": file_path.to_string_lossy() }),
    );
    result_of(&resp);

    (child, stdin, reader, workspace)
}

#[test]
fn adjacent_identical_hours_render_as_one_range() {
    let (mut child, mut stdin, mut reader, workspace) = setup();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "plan.view",
        json!({ "from": "2027-01-12", "days": 1 }),
    );
    let view = result_of(&resp);
    let entries = view["days"][0]["grades"][0]["entries"]
        .as_array()
        .expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].get("hour").and_then(|v| v.as_str()), Some("3.-4."));
    assert_eq!(entries[0].get("grouped").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        entries[0].get("note").and_then(|v| v.as_str()),
        Some("Raumtausch")
    );
    // Times come from the first member of the range.
    assert_eq!(entries[0].get("timeStart").and_then(|v| v.as_str()), Some("09:45"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn grouping_can_be_disabled_per_request() {
    let (mut child, mut stdin, mut reader, workspace) = setup();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "plan.view",
        json!({ "from": "2027-01-12", "days": 1, "group": false }),
    );
    let view = result_of(&resp);
    let entries = view["days"][0]["grades"][0]["entries"]
        .as_array()
        .expect("entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].get("hour").and_then(|v| v.as_str()), Some("3."));
    assert_eq!(entries[1].get("hour").and_then(|v| v.as_str()), Some("4."));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn grade_filter_narrows_the_view() {
    let (mut child, mut stdin, mut reader, workspace) = setup();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "plan.view",
        json!({ "from": "2027-01-12", "days": 1, "grades": ["11c"] }),
    );
    let view = result_of(&resp);
    let grades = view["days"][0]["grades"].as_array().expect("grades");
    assert!(grades.is_empty());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
