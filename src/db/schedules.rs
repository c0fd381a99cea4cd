use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{BusyRow, ScheduleEntry, ScheduleModel};

const SCHEDULE_COLUMNS: &str = "id, user_id, day_of_week, start_time, end_time, title, venue";

pub async fn list_for_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Vec<ScheduleModel>> {
    let sql = format!(
        "SELECT {} FROM schedules WHERE user_id = $1 ORDER BY day_of_week, start_time",
        SCHEDULE_COLUMNS
    );
    let rows = sqlx::query_as::<_, ScheduleModel>(&sql)
        .bind(user_id)
        .fetch_all(conn)
        .await?;
    Ok(rows)
}

pub async fn get_schedule(conn: &mut PgConnection, id: i64) -> AppResult<ScheduleModel> {
    let sql = format!("SELECT {} FROM schedules WHERE id = $1", SCHEDULE_COLUMNS);
    sqlx::query_as::<_, ScheduleModel>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Schedule not found".to_string()))
}

pub async fn insert_schedule(
    conn: &mut PgConnection,
    user_id: Uuid,
    entry: &ScheduleEntry,
) -> AppResult<ScheduleModel> {
    let sql = format!(
        "INSERT INTO schedules (user_id, day_of_week, start_time, end_time, title, venue) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
        SCHEDULE_COLUMNS
    );
    let row = sqlx::query_as::<_, ScheduleModel>(&sql)
        .bind(user_id)
        .bind(entry.day_of_week)
        .bind(entry.start_time)
        .bind(entry.end_time)
        .bind(&entry.title)
        .bind(entry.venue.as_deref())
        .fetch_one(conn)
        .await?;
    Ok(row)
}

pub async fn update_schedule(
    conn: &mut PgConnection,
    id: i64,
    entry: &ScheduleEntry,
) -> AppResult<ScheduleModel> {
    let sql = format!(
        "UPDATE schedules SET day_of_week = $1, start_time = $2, end_time = $3, title = $4, venue = $5 \
         WHERE id = $6 RETURNING {}",
        SCHEDULE_COLUMNS
    );
    sqlx::query_as::<_, ScheduleModel>(&sql)
        .bind(entry.day_of_week)
        .bind(entry.start_time)
        .bind(entry.end_time)
        .bind(&entry.title)
        .bind(entry.venue.as_deref())
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Schedule not found".to_string()))
}

pub async fn delete_schedule(conn: &mut PgConnection, id: i64) -> AppResult<()> {
    let rows_affected = sqlx::query("DELETE FROM schedules WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?
        .rows_affected();

    if rows_affected == 0 {
        return Err(AppError::NotFound("Schedule not found".to_string()));
    }
    Ok(())
}

/// Busy intervals of every listed user, optionally restricted to one day.
pub async fn busy_rows_for_users(
    conn: &mut PgConnection,
    user_ids: &[Uuid],
    day_of_week: Option<i16>,
) -> AppResult<Vec<BusyRow>> {
    let rows = sqlx::query_as::<_, BusyRow>(
        "SELECT day_of_week, start_time, end_time FROM schedules \
         WHERE user_id = ANY($1) AND ($2::smallint IS NULL OR day_of_week = $2) \
         ORDER BY day_of_week, start_time",
    )
    .bind(user_ids)
    .bind(day_of_week)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}
