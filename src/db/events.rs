use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{EventDraft, EventFilter, EventModel};

// $1 is the viewing user (nullable) that `is_rsvped` is computed for.
const EVENT_SELECT: &str = "SELECT e.id, e.title, e.description, e.start_time, e.end_time, \
     e.venue, e.organizer_id, u.name AS organizer_name, e.tags, e.max_attendees, \
     (SELECT COUNT(*) FROM event_rsvps r WHERE r.event_id = e.id) AS attendee_count, \
     EXISTS (SELECT 1 FROM event_rsvps r WHERE r.event_id = e.id AND r.user_id = $1) AS is_rsvped, \
     e.created_at, e.updated_at \
     FROM events e LEFT JOIN app_users u ON u.id = e.organizer_id";

pub async fn get_event(
    conn: &mut PgConnection,
    id: i64,
    viewer: Option<Uuid>,
) -> AppResult<EventModel> {
    let sql = format!("{} WHERE e.id = $2", EVENT_SELECT);
    sqlx::query_as::<_, EventModel>(&sql)
        .bind(viewer)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
}

/// Row-locks the event until the surrounding transaction ends, serializing RSVPs and edits.
pub async fn lock_event(conn: &mut PgConnection, id: i64) -> AppResult<()> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM events WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
}

pub async fn list_events(
    conn: &mut PgConnection,
    filter: &EventFilter,
    viewer: Option<Uuid>,
) -> AppResult<Vec<EventModel>> {
    let mut conditions = Vec::new();
    let mut param_idx = 2u32;

    if filter.upcoming {
        conditions.push("e.start_time >= NOW()".to_string());
    }
    if filter.query.is_some() {
        conditions.push(format!(
            "(e.title ILIKE ${0} OR e.description ILIKE ${0})",
            param_idx
        ));
        param_idx += 1;
    }
    if filter.tag.is_some() {
        conditions.push(format!("${} = ANY(e.tags)", param_idx));
        param_idx += 1;
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "{} {} ORDER BY e.start_time ASC, e.id ASC LIMIT ${} OFFSET ${}",
        EVENT_SELECT,
        where_clause,
        param_idx,
        param_idx + 1
    );

    let mut query = sqlx::query_as::<_, EventModel>(&sql).bind(viewer);
    if let Some(ref q) = filter.query {
        query = query.bind(format!("%{}%", q));
    }
    if let Some(ref tag) = filter.tag {
        query = query.bind(tag);
    }

    let events = query
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(conn)
        .await?;
    Ok(events)
}

pub async fn insert_event(
    conn: &mut PgConnection,
    organizer_id: Uuid,
    draft: &EventDraft,
) -> AppResult<EventModel> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO events (title, description, start_time, end_time, venue, organizer_id, \
         tags, max_attendees) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
    )
    .bind(&draft.title)
    .bind(draft.description.as_deref())
    .bind(draft.start_time)
    .bind(draft.end_time)
    .bind(draft.venue.as_deref())
    .bind(organizer_id)
    .bind(&draft.tags)
    .bind(draft.max_attendees)
    .fetch_one(&mut *conn)
    .await?;

    get_event(conn, id, Some(organizer_id)).await
}

pub async fn update_event(
    conn: &mut PgConnection,
    id: i64,
    draft: &EventDraft,
    viewer: Uuid,
) -> AppResult<EventModel> {
    let rows_affected = sqlx::query(
        "UPDATE events SET title = $1, description = $2, start_time = $3, end_time = $4, \
         venue = $5, tags = $6, max_attendees = $7, updated_at = NOW() WHERE id = $8",
    )
    .bind(&draft.title)
    .bind(draft.description.as_deref())
    .bind(draft.start_time)
    .bind(draft.end_time)
    .bind(draft.venue.as_deref())
    .bind(&draft.tags)
    .bind(draft.max_attendees)
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if rows_affected == 0 {
        return Err(AppError::NotFound("Event not found".to_string()));
    }
    get_event(conn, id, Some(viewer)).await
}

pub async fn delete_event(conn: &mut PgConnection, id: i64) -> AppResult<()> {
    let rows_affected = sqlx::query("DELETE FROM events WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?
        .rows_affected();

    if rows_affected == 0 {
        return Err(AppError::NotFound("Event not found".to_string()));
    }
    Ok(())
}

pub async fn insert_rsvp(conn: &mut PgConnection, event_id: i64, user_id: Uuid) -> AppResult<()> {
    sqlx::query("INSERT INTO event_rsvps (event_id, user_id) VALUES ($1, $2)")
        .bind(event_id)
        .bind(user_id)
        .execute(conn)
        .await
        .map_err(|e| AppError::on_unique_violation(e, "Already RSVPed to this event"))?;
    Ok(())
}

pub async fn delete_rsvp(conn: &mut PgConnection, event_id: i64, user_id: Uuid) -> AppResult<()> {
    let rows_affected = sqlx::query("DELETE FROM event_rsvps WHERE event_id = $1 AND user_id = $2")
        .bind(event_id)
        .bind(user_id)
        .execute(conn)
        .await?
        .rows_affected();

    if rows_affected == 0 {
        return Err(AppError::NotFound("Not RSVPed to this event".to_string()));
    }
    Ok(())
}
