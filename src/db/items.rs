use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ItemChanges, ItemFilter, ItemModel, ItemStatus, NewItem};

const ITEM_COLUMNS: &str = "id, title, description, image_url, category, location, status, \
     finder_id, claimant_id, created_at, updated_at";

pub async fn insert_item(
    conn: &mut PgConnection,
    finder_id: Uuid,
    item: &NewItem,
) -> AppResult<ItemModel> {
    let sql = format!(
        "INSERT INTO items (title, description, image_url, category, location, status, finder_id) \
         VALUES ($1, $2, $3, $4, $5, 'active', $6) RETURNING {}",
        ITEM_COLUMNS
    );
    let model = sqlx::query_as::<_, ItemModel>(&sql)
        .bind(&item.title)
        .bind(item.description.as_deref())
        .bind(item.image_url.as_deref())
        .bind(item.category.as_deref())
        .bind(item.location.as_deref())
        .bind(finder_id)
        .fetch_one(conn)
        .await?;
    Ok(model)
}

pub async fn get_item(conn: &mut PgConnection, id: i64) -> AppResult<ItemModel> {
    let sql = format!("SELECT {} FROM items WHERE id = $1", ITEM_COLUMNS);
    sqlx::query_as::<_, ItemModel>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Item not found".to_string()))
}

/// Like [`get_item`], holding a row lock until the surrounding transaction ends.
pub async fn lock_item(conn: &mut PgConnection, id: i64) -> AppResult<ItemModel> {
    let sql = format!("SELECT {} FROM items WHERE id = $1 FOR UPDATE", ITEM_COLUMNS);
    sqlx::query_as::<_, ItemModel>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Item not found".to_string()))
}

pub async fn list_items(conn: &mut PgConnection, filter: &ItemFilter) -> AppResult<Vec<ItemModel>> {
    // Build dynamic WHERE clause
    let mut conditions = Vec::new();
    let mut param_idx = 1u32;

    if filter.status.is_some() {
        conditions.push(format!("status = ${}", param_idx));
        param_idx += 1;
    }
    if filter.category.is_some() {
        conditions.push(format!("category = ${}", param_idx));
        param_idx += 1;
    }
    if filter.query.is_some() {
        conditions.push(format!(
            "(title ILIKE ${0} OR description ILIKE ${0})",
            param_idx
        ));
        param_idx += 1;
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT {} FROM items {} ORDER BY created_at DESC, id DESC LIMIT ${} OFFSET ${}",
        ITEM_COLUMNS,
        where_clause,
        param_idx,
        param_idx + 1
    );

    let mut query = sqlx::query_as::<_, ItemModel>(&sql);
    if let Some(status) = filter.status {
        query = query.bind(status.as_str());
    }
    if let Some(ref category) = filter.category {
        query = query.bind(category);
    }
    if let Some(ref q) = filter.query {
        query = query.bind(format!("%{}%", q));
    }

    let items = query
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(conn)
        .await?;
    Ok(items)
}

pub async fn update_item_details(
    conn: &mut PgConnection,
    id: i64,
    changes: &ItemChanges,
) -> AppResult<ItemModel> {
    let sql = format!(
        "UPDATE items SET title = COALESCE($1, title), description = COALESCE($2, description), \
         image_url = COALESCE($3, image_url), category = COALESCE($4, category), \
         location = COALESCE($5, location), updated_at = NOW() \
         WHERE id = $6 RETURNING {}",
        ITEM_COLUMNS
    );
    sqlx::query_as::<_, ItemModel>(&sql)
        .bind(changes.title.as_deref())
        .bind(changes.description.as_deref())
        .bind(changes.image_url.as_deref())
        .bind(changes.category.as_deref())
        .bind(changes.location.as_deref())
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Item not found".to_string()))
}

/// Writes the arbitration-owned columns of an item.
pub async fn set_claim_state(
    conn: &mut PgConnection,
    id: i64,
    status: ItemStatus,
    claimant_id: Option<Uuid>,
) -> AppResult<ItemModel> {
    let sql = format!(
        "UPDATE items SET status = $1, claimant_id = $2, updated_at = NOW() \
         WHERE id = $3 RETURNING {}",
        ITEM_COLUMNS
    );
    sqlx::query_as::<_, ItemModel>(&sql)
        .bind(status.as_str())
        .bind(claimant_id)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Item not found".to_string()))
}

pub async fn delete_item(conn: &mut PgConnection, id: i64) -> AppResult<()> {
    let rows_affected = sqlx::query("DELETE FROM items WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?
        .rows_affected();

    if rows_affected == 0 {
        return Err(AppError::NotFound("Item not found".to_string()));
    }
    Ok(())
}
