use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScheduleModel {
    pub id: i64,
    pub user_id: uuid::Uuid,
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub title: String,
    pub venue: Option<String>,
}

/// A validated weekly entry, ready to be written for its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub title: String,
    pub venue: Option<String>,
}

/// The part of a schedule row the free-slot search needs.
#[derive(Debug, Clone, Copy, FromRow, PartialEq, Eq)]
pub struct BusyRow {
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}
