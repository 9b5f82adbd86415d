use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::Store;
use chrono::NaiveDate;
use serde_json::json;

fn param_date(req: &Request, name: &str) -> Option<NaiveDate> {
    req.params
        .get(name)
        .and_then(|v| v.as_str())
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

/// Defines the school year covering its start date. Courses and classes of
/// later imports attach to it.
fn handle_school_year_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(start) = param_date(req, "start") else {
        return err(&req.id, "bad_params", "missing or bad params.start", None);
    };
    let Some(end) = param_date(req, "end") else {
        return err(&req.id, "bad_params", "missing or bad params.end", None);
    };
    if end < start {
        return err(&req.id, "bad_params", "end before start", None);
    }

    match Store::new(conn).upsert_school_year(start, end) {
        Ok(year) => ok(
            &req.id,
            json!({
                "schoolYearId": year.id,
                "start": year.start.format("%Y-%m-%d").to_string(),
                "end": year.end.format("%Y-%m-%d").to_string()
            }),
        ),
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schoolYear.set" => Some(handle_school_year_set(state, req)),
        _ => None,
    }
}
