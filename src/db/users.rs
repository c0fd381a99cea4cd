use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{AppUser, ProfileChanges, Role, UserFilter, UserProfile};

const USER_COLUMNS: &str = "id, email, password_hash, name, role, created_at";
const PROFILE_COLUMNS: &str = "id, email, name, role, roll_no, department, section, hostel, \
     phone, avatar_url, created_at";

pub async fn insert_user(
    conn: &mut PgConnection,
    email: &str,
    password_hash: &str,
    name: &str,
    role: Role,
) -> AppResult<AppUser> {
    let sql = format!(
        "INSERT INTO app_users (email, password_hash, name, role) VALUES ($1, $2, $3, $4) \
         RETURNING {}",
        USER_COLUMNS
    );
    sqlx::query_as::<_, AppUser>(&sql)
        .bind(email)
        .bind(password_hash)
        .bind(name)
        .bind(role.as_str())
        .fetch_one(conn)
        .await
        .map_err(|e| AppError::on_unique_violation(e, "Email already registered"))
}

pub async fn find_by_email(conn: &mut PgConnection, email: &str) -> AppResult<Option<AppUser>> {
    let sql = format!("SELECT {} FROM app_users WHERE email = $1", USER_COLUMNS);
    let user = sqlx::query_as::<_, AppUser>(&sql)
        .bind(email)
        .fetch_optional(conn)
        .await?;
    Ok(user)
}

pub async fn get_user(conn: &mut PgConnection, id: Uuid) -> AppResult<AppUser> {
    let sql = format!("SELECT {} FROM app_users WHERE id = $1", USER_COLUMNS);
    sqlx::query_as::<_, AppUser>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

/// Current role of a user, `None` if the account no longer exists.
pub async fn current_role(pool: &PgPool, id: Uuid) -> AppResult<Option<Role>> {
    let role: Option<String> = sqlx::query_scalar("SELECT role FROM app_users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    role.map(|r| r.parse()).transpose()
}

pub async fn get_profile(conn: &mut PgConnection, id: Uuid) -> AppResult<UserProfile> {
    let sql = format!("SELECT {} FROM app_users WHERE id = $1", PROFILE_COLUMNS);
    sqlx::query_as::<_, UserProfile>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

pub async fn update_profile(
    conn: &mut PgConnection,
    id: Uuid,
    changes: &ProfileChanges,
) -> AppResult<UserProfile> {
    let sql = format!(
        "UPDATE app_users SET name = COALESCE($1, name), roll_no = COALESCE($2, roll_no), \
         department = COALESCE($3, department), section = COALESCE($4, section), \
         hostel = COALESCE($5, hostel), phone = COALESCE($6, phone), \
         avatar_url = COALESCE($7, avatar_url) \
         WHERE id = $8 RETURNING {}",
        PROFILE_COLUMNS
    );
    sqlx::query_as::<_, UserProfile>(&sql)
        .bind(changes.name.as_deref())
        .bind(changes.roll_no.as_deref())
        .bind(changes.department.as_deref())
        .bind(changes.section.as_deref())
        .bind(changes.hostel.as_deref())
        .bind(changes.phone.as_deref())
        .bind(changes.avatar_url.as_deref())
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

pub async fn set_role(conn: &mut PgConnection, id: Uuid, role: Role) -> AppResult<UserProfile> {
    let sql = format!(
        "UPDATE app_users SET role = $1 WHERE id = $2 RETURNING {}",
        PROFILE_COLUMNS
    );
    sqlx::query_as::<_, UserProfile>(&sql)
        .bind(role.as_str())
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

/// Promotes the account with `email` to admin. Returns `false` if no such account exists.
pub async fn promote_to_admin(pool: &PgPool, email: &str) -> AppResult<bool> {
    let rows_affected = sqlx::query("UPDATE app_users SET role = 'admin' WHERE email = $1")
        .bind(email)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows_affected > 0)
}

/// Users matching `filter`, newest first, and the total number of matches.
pub async fn list_users(
    conn: &mut PgConnection,
    filter: &UserFilter,
) -> AppResult<(Vec<UserProfile>, i64)> {
    let mut conditions = Vec::new();
    let mut param_idx = 1u32;

    if filter.role.is_some() {
        conditions.push(format!("role = ${}", param_idx));
        param_idx += 1;
    }
    if filter.search.is_some() {
        conditions.push(format!(
            "(name ILIKE ${0} OR email ILIKE ${0} OR roll_no ILIKE ${0})",
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
        "SELECT {} FROM app_users {} ORDER BY created_at DESC, id LIMIT ${} OFFSET ${}",
        PROFILE_COLUMNS,
        where_clause,
        param_idx,
        param_idx + 1
    );

    let mut query = sqlx::query_as::<_, UserProfile>(&sql);
    if let Some(role) = filter.role {
        query = query.bind(role.as_str());
    }
    if let Some(ref search) = filter.search {
        query = query.bind(format!("%{}%", search));
    }

    let users = query
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&mut *conn)
        .await?;
    let total = count_users(conn, filter).await?;
    Ok((users, total))
}

async fn count_users(conn: &mut PgConnection, filter: &UserFilter) -> AppResult<i64> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM app_users \
         WHERE ($1::text IS NULL OR role = $1) \
           AND ($2::text IS NULL OR name ILIKE $2 OR email ILIKE $2 OR roll_no ILIKE $2)",
    )
    .bind(filter.role.map(|r| r.as_str()))
    .bind(filter.search.as_ref().map(|s| format!("%{}%", s)))
    .fetch_one(conn)
    .await?;
    Ok(total)
}
