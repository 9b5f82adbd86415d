use crate::config::DisplayOptions;
use crate::grouping::{self, PlanItem};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::Store;
use chrono::{Local, NaiveDate};
use serde_json::json;

const DEFAULT_DAYS: usize = 2;

fn param_date(req: &Request, name: &str) -> Option<NaiveDate> {
    req.params
        .get(name)
        .and_then(|v| v.as_str())
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

fn item_json(item: &PlanItem, display: &DisplayOptions) -> serde_json::Value {
    let base = item.base();
    json!({
        "hour": item.hour_label(),
        "timeStart": base.time_start.format("%H:%M").to_string(),
        "timeEnd": base.time_end.format("%H:%M").to_string(),
        "course": base.course_name,
        "room": base.room,
        "supplyTeacher": base.supply_teacher.as_ref().map(|t| t.display_name(display)),
        "supplySubject": base.supply_subject.as_ref().map(|s| s.display_name(display)),
        "supplyRoom": base.supply_room,
        "supplyDate": base.supply_date.map(|d| d.format("%Y-%m-%d").to_string()),
        "supplyHour": item.supply_hour_label(),
        "note": base.note,
        "cancelled": base.flags.is_cancelled(),
        "free": base.flags.is_free(),
        "movedFrom": base.flags.is_moved_from(),
        "movedTo": base.flags.is_moved_to(),
        "grouped": matches!(item, PlanItem::Group(_))
    })
}

/// Renders the active plan as the nested Day -> Grade -> entries tree the
/// pupil frontend shows.
fn handle_plan_view(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let store = Store::new(conn);

    let plan = match store.active_plan() {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "no active plan", None),
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };

    let days = req
        .params
        .get("days")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_DAYS);
    let from = param_date(req, "from").unwrap_or_else(|| Local::now().date_naive());
    let group = req
        .params
        .get("group")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let grades: Option<Vec<String>> = req.params.get("grades").and_then(|v| {
        v.as_array().map(|a| {
            a.iter()
                .filter_map(|g| g.as_str().map(str::to_string))
                .collect()
        })
    });
    let display: DisplayOptions = match req.params.get("display") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(d) => d,
            Err(e) => return err(&req.id, "bad_params", format!("bad display: {e}"), None),
        },
        None => DisplayOptions::default(),
    };

    let day_list = match store.next_days(plan.id, from, days) {
        Ok(d) => d,
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };
    let entries = match store.entries_for_view(plan.id, &day_list, grades.as_deref()) {
        Ok(e) => e,
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };

    let items = grouping::group_entries(entries, group);
    let view = grouping::build_view(&day_list, items);

    let mut days_json = Vec::with_capacity(view.days.len());
    for day in &view.days {
        let mut grades_json = Vec::with_capacity(day.grades.len());
        for g in &day.grades {
            let division = match store.division_name_for_grade(&g.grade_id) {
                Ok(d) => d,
                Err(e) => return err(&req.id, e.code(), e.to_string(), None),
            };
            grades_json.push(json!({
                "grade": g.grade_code,
                "division": division,
                "entries": g.items.iter().map(|i| item_json(i, &display)).collect::<Vec<_>>()
            }));
        }
        days_json.push(json!({
            "day": day.day.format("%Y-%m-%d").to_string(),
            "grades": grades_json
        }));
    }

    ok(
        &req.id,
        json!({
            "planId": plan.id,
            "stand": plan.stand.format("%Y-%m-%d %H:%M:%S").to_string(),
            "uploadedAt": plan.uploaded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            "days": days_json
        }),
    )
}

fn handle_plan_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match Store::new(conn).list_plans() {
        Ok(plans) => {
            let rows: Vec<serde_json::Value> = plans
                .iter()
                .map(|p| {
                    json!({
                        "id": p.id,
                        "uploadedAt": p.uploaded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        "stand": p.stand.format("%Y-%m-%d %H:%M:%S").to_string(),
                        "active": p.active
                    })
                })
                .collect();
            ok(&req.id, json!({ "plans": rows }))
        }
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "plan.view" => Some(handle_plan_view(state, req)),
        "plan.list" => Some(handle_plan_list(state, req)),
        _ => None,
    }
}
