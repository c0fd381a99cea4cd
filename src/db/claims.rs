use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ClaimStatus, ItemClaimModel};

const CLAIM_COLUMNS: &str = "id, item_id, claimant_id, message, status, created_at, updated_at";

pub async fn insert_claim(
    conn: &mut PgConnection,
    item_id: i64,
    claimant_id: Uuid,
    message: Option<&str>,
) -> AppResult<ItemClaimModel> {
    let sql = format!(
        "INSERT INTO item_claims (item_id, claimant_id, message, status) \
         VALUES ($1, $2, $3, 'pending') RETURNING {}",
        CLAIM_COLUMNS
    );
    sqlx::query_as::<_, ItemClaimModel>(&sql)
        .bind(item_id)
        .bind(claimant_id)
        .bind(message)
        .fetch_one(conn)
        .await
        .map_err(|e| AppError::on_unique_violation(e, "You already claimed this item"))
}

/// Any claim by `claimant_id` on the item, whatever its status.
pub async fn find_claim_by_claimant(
    conn: &mut PgConnection,
    item_id: i64,
    claimant_id: Uuid,
) -> AppResult<Option<ItemClaimModel>> {
    let sql = format!(
        "SELECT {} FROM item_claims WHERE item_id = $1 AND claimant_id = $2",
        CLAIM_COLUMNS
    );
    let claim = sqlx::query_as::<_, ItemClaimModel>(&sql)
        .bind(item_id)
        .bind(claimant_id)
        .fetch_optional(conn)
        .await?;
    Ok(claim)
}

pub async fn list_claims_for_item(
    conn: &mut PgConnection,
    item_id: i64,
) -> AppResult<Vec<ItemClaimModel>> {
    let sql = format!(
        "SELECT {} FROM item_claims WHERE item_id = $1 ORDER BY created_at ASC, id ASC",
        CLAIM_COLUMNS
    );
    let claims = sqlx::query_as::<_, ItemClaimModel>(&sql)
        .bind(item_id)
        .fetch_all(conn)
        .await?;
    Ok(claims)
}

/// Loads the whole claim set of an item with row locks held until commit.
pub async fn lock_claims_for_item(
    conn: &mut PgConnection,
    item_id: i64,
) -> AppResult<Vec<ItemClaimModel>> {
    let sql = format!(
        "SELECT {} FROM item_claims WHERE item_id = $1 ORDER BY id ASC FOR UPDATE",
        CLAIM_COLUMNS
    );
    let claims = sqlx::query_as::<_, ItemClaimModel>(&sql)
        .bind(item_id)
        .fetch_all(conn)
        .await?;
    Ok(claims)
}

pub async fn set_claim_status(
    conn: &mut PgConnection,
    id: i64,
    status: ClaimStatus,
) -> AppResult<ItemClaimModel> {
    let sql = format!(
        "UPDATE item_claims SET status = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
        CLAIM_COLUMNS
    );
    sqlx::query_as::<_, ItemClaimModel>(&sql)
        .bind(status.as_str())
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Claim not found".to_string()))
}
