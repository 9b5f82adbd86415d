use crate::config::ImportConfig;
use crate::davinci;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::Store;
use chrono::Local;
use serde_json::json;
use std::path::PathBuf;

/// Runs the whole import pipeline on one export file. All error kinds abort
/// the run and leave the previously active plan untouched.
fn handle_plan_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let path = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = path else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let config: ImportConfig = match req.params.get("config") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(c) => c,
            Err(e) => return err(&req.id, "bad_params", format!("bad config: {e}"), None),
        },
        None => ImportConfig::default(),
    };

    // No current school year means there is nothing to attach courses and
    // grades to; abort before touching the file.
    let today = Local::now().date_naive();
    let year = match Store::new(conn).current_school_year(today) {
        Ok(y) => y,
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };

    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) => {
            return err(
                &req.id,
                "parse_format",
                format!("cannot read {}: {e}", path.display()),
                Some(json!({ "path": path.to_string_lossy() })),
            )
        }
    };

    match davinci::import_plan(conn, &config, &year, &bytes) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "planId": summary.plan_id,
                "stand": summary.stand.format("%Y-%m-%d %H:%M:%S").to_string(),
                "changes": summary.changes,
                "entries": summary.entries
            }),
        ),
        Err(e) => err(
            &req.id,
            e.code(),
            e.to_string(),
            Some(json!({ "path": path.to_string_lossy() })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "plan.import" => Some(handle_plan_import(state, req)),
        _ => None,
    }
}
