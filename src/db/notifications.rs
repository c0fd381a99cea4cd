use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{NewNotification, NotificationModel, NotificationPage};

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, title, message, link, read, created_at";

pub async fn insert_notification(
    conn: &mut PgConnection,
    notification: &NewNotification,
) -> AppResult<NotificationModel> {
    let sql = format!(
        "INSERT INTO notifications (user_id, kind, title, message, link) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {}",
        NOTIFICATION_COLUMNS
    );
    let model = sqlx::query_as::<_, NotificationModel>(&sql)
        .bind(notification.user_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.link.as_deref())
        .fetch_one(conn)
        .await?;
    Ok(model)
}

/// Newest first. `total` honours `unread_only`; `unread` never does.
pub async fn list_for_user(
    conn: &mut PgConnection,
    user_id: Uuid,
    unread_only: bool,
    limit: i64,
    offset: i64,
) -> AppResult<NotificationPage> {
    let sql = format!(
        "SELECT {} FROM notifications WHERE user_id = $1 AND ($2 = FALSE OR read = FALSE) \
         ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4",
        NOTIFICATION_COLUMNS
    );
    let notifications = sqlx::query_as::<_, NotificationModel>(&sql)
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await?;

    let (total, unread): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*) FILTER (WHERE $2 = FALSE OR read = FALSE), \
                COUNT(*) FILTER (WHERE read = FALSE) \
         FROM notifications WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(unread_only)
    .fetch_one(conn)
    .await?;

    Ok(NotificationPage {
        total,
        unread,
        notifications,
    })
}

/// Only the owner's notifications are visible; anything else is `NotFound`.
pub async fn mark_read(
    conn: &mut PgConnection,
    id: i64,
    user_id: Uuid,
) -> AppResult<NotificationModel> {
    let sql = format!(
        "UPDATE notifications SET read = TRUE WHERE id = $1 AND user_id = $2 RETURNING {}",
        NOTIFICATION_COLUMNS
    );
    sqlx::query_as::<_, NotificationModel>(&sql)
        .bind(id)
        .bind(user_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Notification not found".to_string()))
}

/// Returns how many notifications changed.
pub async fn mark_all_read(conn: &mut PgConnection, user_id: Uuid) -> AppResult<u64> {
    let rows_affected =
        sqlx::query("UPDATE notifications SET read = TRUE WHERE user_id = $1 AND read = FALSE")
            .bind(user_id)
            .execute(conn)
            .await?
            .rows_affected();
    Ok(rows_affected)
}

pub async fn delete_notification(conn: &mut PgConnection, id: i64, user_id: Uuid) -> AppResult<()> {
    let rows_affected = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(conn)
        .await?
        .rows_affected();

    if rows_affected == 0 {
        return Err(AppError::NotFound("Notification not found".to_string()));
    }
    Ok(())
}
