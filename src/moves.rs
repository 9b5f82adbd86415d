use crate::davinci::TimeframeTable;
use crate::errors::ImportError;
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};
use regex::Regex;

/// Result of resolving a "moved to/from <day>.<month> <weekday> <hour>"
/// caption against a reference instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedMove {
    pub day: NaiveDate,
    pub hour: u32,
}

fn captured_num(caps: &regex::Captures, name: &'static str) -> Result<u32, ImportError> {
    let m = caps.name(name).ok_or_else(|| {
        ImportError::ParseFormat(format!("caption pattern has no '{name}' group"))
    })?;
    m.as_str()
        .parse::<u32>()
        .map_err(|e| ImportError::ParseFormat(format!("caption group '{name}': {e}")))
}

fn shift_year(dt: NaiveDateTime, delta: i32) -> Result<NaiveDateTime, ImportError> {
    dt.with_year(dt.year() + delta).ok_or_else(|| {
        ImportError::ParseFormat(format!("cannot shift {dt} by {delta} year(s)"))
    })
}

/// Resolves a caption to a concrete date. The caption carries no year; the
/// implied date is the one of the two calendar-year candidates closer to the
/// reference instant, ties going to the future one.
///
/// A non-matching caption means no date move is encoded: Ok(None).
pub fn resolve_move(
    caption: &str,
    pattern: &Regex,
    timeframes: &TimeframeTable,
    reference: NaiveDateTime,
) -> Result<Option<ResolvedMove>, ImportError> {
    let Some(caps) = pattern.captures(caption) else {
        return Ok(None);
    };

    let day = captured_num(&caps, "day")?;
    let month = captured_num(&caps, "month")?;
    let hour_label = captured_num(&caps, "startHour")?;

    // Map the hour label back to a clock time via the timetable. When no slot
    // carries that label, fall back to the current wall-clock time; this only
    // influences the candidate choice around midnight.
    let time = match timeframes.time_for_hour(hour_label) {
        Some(t) => t,
        None => Local::now().time(),
    };

    let candidate = NaiveDate::from_ymd_opt(reference.year(), month, day)
        .ok_or_else(|| {
            ImportError::ParseFormat(format!("caption names invalid date {day}.{month}."))
        })?
        .and_time(time);

    // The future candidate must lie ahead of the reference; the past one is
    // exactly one year earlier.
    let (future, past) = if candidate < reference {
        (shift_year(candidate, 1)?, candidate)
    } else {
        (candidate, shift_year(candidate, -1)?)
    };

    let chosen = if future - reference <= reference - past {
        future
    } else {
        past
    };

    Ok(Some(ResolvedMove {
        day: chosen.date(),
        hour: hour_label,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImportConfig, DEFAULT_MOVED_FROM_PATTERN};
    use chrono::NaiveTime;

    fn timeframes() -> TimeframeTable {
        // Standard timetable with hour 5 starting at 11:30.
        TimeframeTable::from_slots(vec![
            ("0800".to_string(), 1),
            ("0945".to_string(), 3),
            ("1130".to_string(), 5),
        ])
    }

    fn moved_to() -> Regex {
        ImportConfig::default()
            .compile_patterns()
            .expect("compile")
            .moved_to
            .expect("pattern")
    }

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .expect("date")
            .and_time(NaiveTime::parse_from_str(time, "%H:%M").expect("time"))
    }

    #[test]
    fn nearer_future_candidate_wins() {
        // 2016-03-14 is 63 days ahead of the reference; 2015-03-14 is 303
        // days behind. The future candidate is closer.
        let mv = resolve_move(
            "Auf 14.3. Do 5 verschoben",
            &moved_to(),
            &timeframes(),
            at("2016-01-11", "07:55"),
        )
        .expect("resolve")
        .expect("match");
        assert_eq!(mv.day, NaiveDate::from_ymd_opt(2016, 3, 14).unwrap());
        assert_eq!(mv.hour, 5);
    }

    #[test]
    fn nearer_past_candidate_wins() {
        // 2016-10-02 would be ~265 days ahead; 2015-10-02 is ~101 days back.
        let mv = resolve_move(
            "Auf 2.10. Fr 3 verschoben",
            &moved_to(),
            &timeframes(),
            at("2016-01-11", "07:55"),
        )
        .expect("resolve")
        .expect("match");
        assert_eq!(mv.day, NaiveDate::from_ymd_opt(2015, 10, 2).unwrap());
        assert_eq!(mv.hour, 3);
    }

    #[test]
    fn tie_resolves_toward_the_future() {
        // Hour 1 starts 08:00. From 2015-07-02 20:00, both 2016-01-01 08:00
        // and 2015-01-01 08:00 are exactly 182d12h away.
        let mv = resolve_move(
            "Auf 1.1. Fr 1 verschoben",
            &moved_to(),
            &timeframes(),
            at("2015-07-02", "20:00"),
        )
        .expect("resolve")
        .expect("match");
        assert_eq!(mv.day, NaiveDate::from_ymd_opt(2016, 1, 1).unwrap());
    }

    #[test]
    fn non_matching_caption_is_not_an_error() {
        let res = resolve_move(
            "Raum geändert",
            &moved_to(),
            &timeframes(),
            at("2016-01-11", "07:55"),
        )
        .expect("resolve");
        assert_eq!(res, None);
    }

    #[test]
    fn moved_from_pattern_resolves_the_same_way() {
        let re = Regex::new(DEFAULT_MOVED_FROM_PATTERN).expect("compile");
        let mv = resolve_move(
            "Von 14.3. Do 5 verschoben",
            &re,
            &timeframes(),
            at("2016-01-11", "07:55"),
        )
        .expect("resolve")
        .expect("match");
        assert_eq!(mv.day, NaiveDate::from_ymd_opt(2016, 3, 14).unwrap());
    }

    #[test]
    fn unknown_hour_label_still_resolves_a_date() {
        // Hour 9 has no slot; the wall-clock fallback only affects the time
        // of day, the chosen date is stable this far from the year boundary.
        let mv = resolve_move(
            "Auf 14.3. Mo 9 verschoben",
            &moved_to(),
            &timeframes(),
            at("2016-01-11", "07:55"),
        )
        .expect("resolve")
        .expect("match");
        assert_eq!(mv.day, NaiveDate::from_ymd_opt(2016, 3, 14).unwrap());
        assert_eq!(mv.hour, 9);
    }

    #[test]
    fn invalid_caption_date_fails_the_import() {
        let err = resolve_move(
            "Auf 31.2. Mo 1 verschoben",
            &moved_to(),
            &timeframes(),
            at("2016-01-11", "07:55"),
        )
        .unwrap_err();
        assert_eq!(err.code(), "parse_format");
    }
}
