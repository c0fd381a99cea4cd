//! Common free time across several users' weekly timetables.
//!
//! Times are handled as minutes since midnight. A slot is free only when no
//! requested user is busy, inside the daily working window 08:00–22:00.

use std::collections::BTreeSet;

use chrono::{NaiveTime, Timelike};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{schedules, with_transaction, RetryConfig, TxMode};
use crate::error::{AppError, AppResult};
use crate::models::BusyRow;

pub const DAYS_PER_WEEK: u8 = 7;

/// Range of minutes since midnight; `start < end` for a non-empty interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    pub start: u16,
    pub end: u16,
}

impl Interval {
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn from_times(start: NaiveTime, end: NaiveTime) -> Self {
        Self::new(minute_of_day(start), minute_of_day(end))
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    fn clip_to(&self, window: Interval) -> Interval {
        Interval::new(self.start.max(window.start), self.end.min(window.end))
    }
}

pub const WORKING_WINDOW: Interval = Interval::new(8 * 60, 22 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSlot {
    pub day: u8,
    pub range: Interval,
}

impl FreeSlot {
    pub fn start_time(&self) -> String {
        format_minutes(self.range.start)
    }

    pub fn end_time(&self) -> String {
        format_minutes(self.range.end)
    }
}

pub fn minute_of_day(t: NaiveTime) -> u16 {
    (t.hour() * 60 + t.minute()) as u16
}

/// `HH:MM`, 24-hour.
pub fn format_minutes(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Parses `HH:MM`; a trailing `:SS` is accepted and dropped.
pub fn parse_clock(s: &str) -> AppResult<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map(|t| t.with_second(0).unwrap_or(t))
        .map_err(|_| AppError::InvalidArgument(format!("invalid time '{}': expected HH:MM", s)))
}

/// Sorts and merges intervals; overlapping and touching ones collapse together.
pub fn merge_busy(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.retain(|i| !i.is_empty());
    intervals.sort();

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for next in intervals {
        match merged.last_mut() {
            Some(current) if next.start <= current.end => {
                current.end = current.end.max(next.end);
            }
            _ => merged.push(next),
        }
    }
    merged
}

/// Gaps of `window` not covered by `busy`, which must already be merged.
pub fn gaps_in_window(window: Interval, busy: &[Interval]) -> Vec<Interval> {
    let mut free = Vec::new();
    let mut cursor = window.start;

    for interval in busy.iter().map(|b| b.clip_to(window)) {
        if interval.is_empty() {
            continue;
        }
        if interval.start > cursor {
            free.push(Interval::new(cursor, interval.start));
        }
        cursor = cursor.max(interval.end);
    }
    if window.end > cursor {
        free.push(Interval::new(cursor, window.end));
    }
    free
}

/// Free slots of `days`, in day order, from everyone's busy rows.
pub fn free_slots(busy: &[BusyRow], days: &[u8]) -> Vec<FreeSlot> {
    days.iter()
        .flat_map(|&day| {
            let intervals = busy
                .iter()
                .filter(|row| row.day_of_week == i16::from(day))
                .map(|row| Interval::from_times(row.start_time, row.end_time))
                .collect();
            gaps_in_window(WORKING_WINDOW, &merge_busy(intervals))
                .into_iter()
                .map(move |range| FreeSlot { day, range })
        })
        .collect()
}

/// The requested day alone, or the whole week.
pub fn requested_days(day: Option<i32>) -> AppResult<Vec<u8>> {
    match day {
        None => Ok((0..DAYS_PER_WEEK).collect()),
        Some(d) if (0..i32::from(DAYS_PER_WEEK)).contains(&d) => Ok(vec![d as u8]),
        Some(d) => Err(AppError::InvalidArgument(format!(
            "day_of_week must be between 0 and 6 (got {})",
            d
        ))),
    }
}

/// Parses every identifier, adds the caller and removes duplicates.
pub fn resolve_user_ids(raw: &[String], caller: Uuid) -> AppResult<Vec<Uuid>> {
    let mut ids = BTreeSet::new();
    ids.insert(caller);
    for s in raw {
        let id = Uuid::parse_str(s.trim())
            .map_err(|_| AppError::InvalidArgument(format!("invalid user id '{}'", s)))?;
        ids.insert(id);
    }
    Ok(ids.into_iter().collect())
}

/// Free slots shared by `caller` and every user in `user_ids`.
///
/// Input is fully validated before the store is read; all schedules are read
/// from one snapshot.
pub async fn compute_free_slots(
    pool: &PgPool,
    retry: &RetryConfig,
    caller: Uuid,
    user_ids: &[String],
    day: Option<i32>,
) -> AppResult<Vec<FreeSlot>> {
    let users = resolve_user_ids(user_ids, caller)?;
    let days = requested_days(day)?;
    let day_filter = day.map(|d| d as i16);

    let busy = with_transaction(pool, TxMode::ReadOnlySnapshot, retry, |conn| {
        let users = users.clone();
        Box::pin(async move { schedules::busy_rows_for_users(conn, &users, day_filter).await })
    })
    .await?;

    let slots = free_slots(&busy, &days);
    tracing::debug!(
        "Free slots for {} users over {} days: {} busy rows -> {} slots",
        users.len(),
        days.len(),
        busy.len(),
        slots.len()
    );
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(s: &str) -> u16 {
        minute_of_day(parse_clock(s).unwrap())
    }

    fn iv(start: &str, end: &str) -> Interval {
        Interval::new(hm(start), hm(end))
    }

    fn row(day: i16, start: &str, end: &str) -> BusyRow {
        BusyRow {
            day_of_week: day,
            start_time: parse_clock(start).unwrap(),
            end_time: parse_clock(end).unwrap(),
        }
    }

    fn rendered(slots: &[FreeSlot]) -> Vec<(u8, String, String)> {
        slots
            .iter()
            .map(|s| (s.day, s.start_time(), s.end_time()))
            .collect()
    }

    #[test]
    fn test_touching_intervals_merge() {
        let merged = merge_busy(vec![iv("08:00", "10:00"), iv("10:00", "12:00")]);
        assert_eq!(merged, vec![iv("08:00", "12:00")]);
        assert_eq!(gaps_in_window(WORKING_WINDOW, &merged), vec![iv("12:00", "22:00")]);
    }

    #[test]
    fn test_overlapping_intervals_from_two_users_merge() {
        let busy = [row(2, "09:00", "11:00"), row(2, "10:30", "13:00")];
        let merged = merge_busy(
            busy.iter()
                .map(|r| Interval::from_times(r.start_time, r.end_time))
                .collect(),
        );
        assert_eq!(merged, vec![iv("09:00", "13:00")]);

        let slots = free_slots(&busy, &[2]);
        assert_eq!(
            rendered(&slots),
            vec![
                (2, "08:00".to_string(), "09:00".to_string()),
                (2, "13:00".to_string(), "22:00".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_day_is_whole_window() {
        let slots = free_slots(&[], &[4]);
        assert_eq!(rendered(&slots), vec![(4, "08:00".to_string(), "22:00".to_string())]);
    }

    #[test]
    fn test_contained_interval_absorbed() {
        let merged = merge_busy(vec![iv("09:00", "15:00"), iv("10:00", "11:00")]);
        assert_eq!(merged, vec![iv("09:00", "15:00")]);
    }

    #[test]
    fn test_unsorted_input() {
        let merged = merge_busy(vec![
            iv("14:00", "15:00"),
            iv("09:00", "10:00"),
            iv("09:30", "09:45"),
        ]);
        assert_eq!(merged, vec![iv("09:00", "10:00"), iv("14:00", "15:00")]);
    }

    #[test]
    fn test_zero_length_gaps_not_emitted() {
        let busy = merge_busy(vec![iv("08:00", "09:00"), iv("20:00", "22:00")]);
        assert_eq!(gaps_in_window(WORKING_WINDOW, &busy), vec![iv("09:00", "20:00")]);

        let full = merge_busy(vec![iv("07:00", "23:00")]);
        assert!(gaps_in_window(WORKING_WINDOW, &full).is_empty());
    }

    #[test]
    fn test_intervals_outside_window_are_clipped() {
        let busy = merge_busy(vec![
            iv("06:00", "09:00"),
            iv("12:00", "13:00"),
            iv("22:30", "23:30"),
        ]);
        assert_eq!(
            gaps_in_window(WORKING_WINDOW, &busy),
            vec![iv("09:00", "12:00"), iv("13:00", "22:00")]
        );
    }

    #[test]
    fn test_every_day_in_order() {
        let busy = [row(6, "08:00", "22:00"), row(0, "12:00", "13:00")];
        let slots = free_slots(&busy, &requested_days(None).unwrap());

        let days: Vec<u8> = slots.iter().map(|s| s.day).collect();
        assert_eq!(days, vec![0, 0, 1, 2, 3, 4, 5]);
        assert_eq!(slots[0].end_time(), "12:00");
        assert_eq!(slots[1].start_time(), "13:00");
    }

    #[test]
    fn test_other_days_ignored() {
        let busy = [row(1, "09:00", "17:00")];
        let slots = free_slots(&busy, &[3]);
        assert_eq!(rendered(&slots), vec![(3, "08:00".to_string(), "22:00".to_string())]);
    }

    #[test]
    fn test_requested_days_validation() {
        assert_eq!(requested_days(Some(3)).unwrap(), vec![3]);
        assert_eq!(requested_days(None).unwrap().len(), 7);
        assert!(matches!(requested_days(Some(7)), Err(AppError::InvalidArgument(_))));
        assert!(matches!(requested_days(Some(-1)), Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn test_malformed_user_id_fails_whole_request() {
        let caller = Uuid::new_v4();
        let raw = vec![Uuid::new_v4().to_string(), "not-a-uuid".to_string()];
        assert!(matches!(
            resolve_user_ids(&raw, caller),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_user_ids_include_caller_once() {
        let caller = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let raw = vec![
            friend.to_string(),
            caller.to_string(),
            format!(" {} ", friend),
        ];
        let ids = resolve_user_ids(&raw, caller).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&caller));
        assert!(ids.contains(&friend));
    }

    #[test]
    fn test_parse_clock() {
        assert_eq!(format_minutes(hm("09:05")), "09:05");
        assert_eq!(format_minutes(hm("21:30:00")), "21:30");
        assert!(matches!(parse_clock("25:00"), Err(AppError::InvalidArgument(_))));
        assert!(matches!(parse_clock("nine"), Err(AppError::InvalidArgument(_))));
        assert!(parse_clock("").is_err());
    }
}
