//! Groups an ordered record sequence into compact display ranges and builds
//! the Day -> Grade -> entries tree for the pupil view.

use crate::records::StandinRecord;
use chrono::NaiveDate;

/// Two records are similar when everything but hour and the time window is
/// equal and their hours are at most one apart. Notes compare byte-for-byte
/// on purpose; records differing only in note whitespace stay separate.
pub fn similar(prev: &StandinRecord, next: &StandinRecord) -> bool {
    match (next.hour, prev.hour) {
        (Some(a), Some(b)) if i64::from(a) - i64::from(b) > 1 => return false,
        (Some(_), None) | (None, Some(_)) => return false,
        _ => {}
    }
    prev.day == next.day
        && prev.grade_id == next.grade_id
        && prev.grade_code == next.grade_code
        && prev.course_id == next.course_id
        && prev.course_name == next.course_name
        && prev.room == next.room
        && prev.supply_teacher == next.supply_teacher
        && prev.supply_subject == next.supply_subject
        && prev.supply_room == next.supply_room
        && prev.supply_date == next.supply_date
        && prev.supply_hour == next.supply_hour
        && prev.supply_time_start == next.supply_time_start
        && prev.supply_time_end == next.supply_time_end
        && prev.note == next.note
        && prev.flags == next.flags
}

/// Two or more adjacent similar records merged for display. All fields read
/// from the first member except the hour, which is the maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryGroup {
    members: Vec<StandinRecord>,
}

impl EntryGroup {
    fn new(first: StandinRecord, second: StandinRecord) -> EntryGroup {
        EntryGroup {
            members: vec![first, second],
        }
    }

    fn push(&mut self, rec: StandinRecord) {
        self.members.push(rec);
    }

    pub fn base(&self) -> &StandinRecord {
        &self.members[0]
    }

    /// Newly arriving records compare against the last absorbed member, not
    /// against an aggregate.
    pub fn last(&self) -> &StandinRecord {
        self.members.last().expect("group has at least two members")
    }

    pub fn members(&self) -> &[StandinRecord] {
        &self.members
    }

    pub fn hour(&self) -> Option<u32> {
        self.members.iter().filter_map(|m| m.hour).max()
    }

    fn bounds(hours: impl Iterator<Item = Option<u32>>) -> Option<(u32, u32)> {
        let hours: Vec<u32> = hours.flatten().collect();
        let min = *hours.iter().min()?;
        let max = *hours.iter().max()?;
        Some((min, max))
    }

    /// Formatted range like "3.-4.".
    pub fn hour_label(&self) -> String {
        match Self::bounds(self.members.iter().map(|m| m.hour)) {
            Some((min, max)) => format!("{min}.-{max}."),
            None => String::new(),
        }
    }

    pub fn supply_hour_label(&self) -> String {
        match Self::bounds(self.members.iter().map(|m| m.supply_hour)) {
            Some((min, max)) => format!("{min}.-{max}."),
            None => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanItem {
    Single(StandinRecord),
    Group(EntryGroup),
}

impl PlanItem {
    pub fn base(&self) -> &StandinRecord {
        match self {
            PlanItem::Single(rec) => rec,
            PlanItem::Group(g) => g.base(),
        }
    }

    fn last(&self) -> &StandinRecord {
        match self {
            PlanItem::Single(rec) => rec,
            PlanItem::Group(g) => g.last(),
        }
    }

    pub fn hour_label(&self) -> String {
        match self {
            PlanItem::Single(rec) => rec.hour_label(),
            PlanItem::Group(g) => g.hour_label(),
        }
    }

    pub fn supply_hour_label(&self) -> String {
        match self {
            PlanItem::Single(rec) => rec.supply_hour_label(),
            PlanItem::Group(g) => g.supply_hour_label(),
        }
    }
}

/// Single left-to-right pass with one pending slot. Similarity is only ever
/// checked against the immediately preceding record, so chains merge through
/// adjacency even when the ends would not compare similar directly.
pub fn group_entries(entries: Vec<StandinRecord>, group: bool) -> Vec<PlanItem> {
    let mut out: Vec<PlanItem> = Vec::new();
    let mut pending: Option<PlanItem> = None;

    for rec in entries {
        let Some(prev) = pending.take() else {
            pending = Some(PlanItem::Single(rec));
            continue;
        };
        if group && similar(prev.last(), &rec) {
            pending = Some(match prev {
                PlanItem::Group(mut g) => {
                    g.push(rec);
                    PlanItem::Group(g)
                }
                PlanItem::Single(first) => PlanItem::Group(EntryGroup::new(first, rec)),
            });
        } else {
            out.push(prev);
            pending = Some(PlanItem::Single(rec));
        }
    }
    if let Some(prev) = pending {
        out.push(prev);
    }
    out
}

#[derive(Debug)]
pub struct GradeBucket {
    pub grade_id: String,
    pub grade_code: String,
    pub items: Vec<PlanItem>,
}

#[derive(Debug)]
pub struct DayBucket {
    pub day: NaiveDate,
    pub grades: Vec<GradeBucket>,
}

/// Nested Day -> Grade -> entries view, buckets in first-seen order.
#[derive(Debug, Default)]
pub struct PlanView {
    pub days: Vec<DayBucket>,
}

impl PlanView {
    pub fn new() -> PlanView {
        PlanView { days: Vec::new() }
    }

    pub fn add_day(&mut self, day: NaiveDate) {
        self.days.push(DayBucket {
            day,
            grades: Vec::new(),
        });
    }

    /// Items for unregistered days are dropped; the day list is fixed up
    /// front from the selected horizon.
    pub fn add_item(&mut self, item: PlanItem) {
        let day = item.base().day;
        let Some(bucket) = self.days.iter_mut().find(|d| d.day == day) else {
            return;
        };
        let grade_id = &item.base().grade_id;
        match bucket.grades.iter_mut().find(|g| &g.grade_id == grade_id) {
            Some(g) => g.items.push(item),
            None => bucket.grades.push(GradeBucket {
                grade_id: item.base().grade_id.clone(),
                grade_code: item.base().grade_code.clone(),
                items: vec![item],
            }),
        }
    }
}

pub fn build_view(days: &[NaiveDate], items: Vec<PlanItem>) -> PlanView {
    let mut view = PlanView::new();
    for d in days {
        view.add_day(*d);
    }
    for item in items {
        view.add_item(item);
    }
    view
}
